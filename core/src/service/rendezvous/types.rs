//! Value types shared by both linking roles

use std::{collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a device as published by the homeserver (e.g. `DEV1`)
pub type DeviceId = String;

/// Fully qualified user id (e.g. `@alice:example.org`)
pub type UserId = String;

/// Published identity keys of one device, keyed by algorithm-qualified key id
pub type DeviceKeys = BTreeMap<String, String>;

/// Rendezvous code handed to the other device (usually rendered as a QR code)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendezvousCode(String);

impl RendezvousCode {
	pub fn new(code: impl Into<String>) -> Self {
		Self(code.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RendezvousCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Short code both devices display so the user can confirm they share one channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationDigits(String);

impl ConfirmationDigits {
	pub fn new(digits: impl Into<String>) -> Self {
		Self(digits.into())
	}

	/// Derive six decimal digits from a secret both ends hold
	pub fn from_secret(secret: &[u8]) -> Self {
		let hash = blake3::hash(secret);
		let bytes = hash.as_bytes();
		let value = u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]) % 1_000_000;
		Self(format!("{:06}", value))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ConfirmationDigits {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// Why a linking session was terminated before it completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
	UserDeclined,
	UserCancelled,
	OtherDeviceNotSignedIn,
	OtherDeviceAlreadySignedIn,
	Expired,
	InvalidCode,
	UnsupportedAlgorithm,
	UnsupportedTransport,
	HomeserverLacksSupport,
	DataMismatch,
	Unknown,
}

impl fmt::Display for CancellationReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let text = match self {
			Self::UserDeclined => "declined by user",
			Self::UserCancelled => "cancelled by user",
			Self::OtherDeviceNotSignedIn => "other device is not signed in",
			Self::OtherDeviceAlreadySignedIn => "other device is already signed in",
			Self::Expired => "rendezvous expired",
			Self::InvalidCode => "invalid rendezvous code",
			Self::UnsupportedAlgorithm => "unsupported algorithm",
			Self::UnsupportedTransport => "unsupported transport",
			Self::HomeserverLacksSupport => "homeserver lacks support",
			Self::DataMismatch => "data mismatch",
			Self::Unknown => "unknown reason",
		};
		f.write_str(text)
	}
}

/// A device record from key storage
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
	pub keys: DeviceKeys,
}

impl DeviceInfo {
	pub fn new(keys: DeviceKeys) -> Self {
		Self { keys }
	}
}

/// Result of marking a device's trust level in key storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationRecord {
	pub user_id: UserId,
	pub device_id: DeviceId,
	pub verified: bool,
	pub blocked: bool,
	pub cross_signed: bool,
	pub updated_at: DateTime<Utc>,
}

/// One-time login token obtained by the existing device
///
/// Only leaves the process inside a login offer or a login request body.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginToken(String);

impl LoginToken {
	pub fn new(token: impl Into<String>) -> Self {
		Self(token.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn into_inner(self) -> String {
		self.0
	}
}

impl fmt::Debug for LoginToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("LoginToken(<redacted>)")
	}
}

/// Login request sent to the homeserver by the new device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRequest {
	/// `m.login.token` grant
	Token(LoginToken),
}

impl LoginRequest {
	pub fn method(&self) -> &'static str {
		match self {
			Self::Token(_) => "m.login.token",
		}
	}
}

/// Credentials of a freshly established session
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCredentials {
	pub user_id: UserId,
	pub device_id: DeviceId,
	pub access_token: String,
	pub homeserver: String,
}

impl fmt::Debug for SessionCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionCredentials")
			.field("user_id", &self.user_id)
			.field("device_id", &self.device_id)
			.field("access_token", &"<redacted>")
			.field("homeserver", &self.homeserver)
			.finish()
	}
}
