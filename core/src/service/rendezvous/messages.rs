//! Payloads exchanged over the rendezvous channel
//!
//! The channel moves [`WirePayload`]s, a flat record tagged by `outcome` whose other
//! fields are all optional. The orchestrator only acts on a [`LinkPayload`], which can
//! only be obtained from the wire form through validation.

use serde::{Deserialize, Serialize};

use super::{
	error::{LinkingError, Result},
	types::{DeviceId, DeviceKeys, LoginToken, UserId},
};

pub const OUTCOME_OFFER: &str = "offer";
pub const OUTCOME_DECLINED: &str = "declined";
pub const OUTCOME_SUCCESS: &str = "success";

/// Payload as it travels over the channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirePayload {
	pub outcome: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub homeserver: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub login_token: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_id: Option<UserId>,
	#[serde(
		rename = "deviceId",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub device_id: Option<DeviceId>,
	#[serde(
		rename = "deviceKeys",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	pub device_keys: Option<DeviceKeys>,
}

impl WirePayload {
	/// A payload carrying only an outcome
	pub fn bare(outcome: impl Into<String>) -> Self {
		Self {
			outcome: outcome.into(),
			homeserver: None,
			login_token: None,
			user_id: None,
			device_id: None,
			device_keys: None,
		}
	}

	pub fn to_json(&self) -> Result<Vec<u8>> {
		Ok(serde_json::to_vec(self)?)
	}

	pub fn from_json(data: &[u8]) -> Result<Self> {
		Ok(serde_json::from_slice(data)?)
	}
}

/// Validated payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkPayload {
	/// Existing device -> new device: "log in with this token"
	LoginOffer {
		homeserver: String,
		login_token: LoginToken,
		user_id: Option<UserId>,
	},
	/// Existing device -> new device: the user rejected the link
	Decline,
	/// New device -> existing device: "logged in, these are my keys"
	KeysReport {
		device_id: DeviceId,
		device_keys: Option<DeviceKeys>,
	},
}

impl LinkPayload {
	pub fn outcome(&self) -> &'static str {
		match self {
			Self::LoginOffer { .. } => OUTCOME_OFFER,
			Self::Decline => OUTCOME_DECLINED,
			Self::KeysReport { .. } => OUTCOME_SUCCESS,
		}
	}
}

impl From<LinkPayload> for WirePayload {
	fn from(payload: LinkPayload) -> Self {
		let mut wire = WirePayload::bare(payload.outcome());
		match payload {
			LinkPayload::LoginOffer {
				homeserver,
				login_token,
				user_id,
			} => {
				wire.homeserver = Some(homeserver);
				wire.login_token = Some(login_token.into_inner());
				wire.user_id = user_id;
			}
			LinkPayload::Decline => {}
			LinkPayload::KeysReport {
				device_id,
				device_keys,
			} => {
				wire.device_id = Some(device_id);
				wire.device_keys = device_keys;
			}
		}
		wire
	}
}

impl TryFrom<WirePayload> for LinkPayload {
	type Error = LinkingError;

	fn try_from(wire: WirePayload) -> Result<Self> {
		match wire.outcome.as_str() {
			OUTCOME_OFFER => {
				let homeserver = required(wire.homeserver, OUTCOME_OFFER, "homeserver")?;
				let login_token = required(wire.login_token, OUTCOME_OFFER, "login_token")?;
				Ok(Self::LoginOffer {
					homeserver,
					login_token: LoginToken::new(login_token),
					user_id: wire.user_id,
				})
			}
			OUTCOME_DECLINED => Ok(Self::Decline),
			OUTCOME_SUCCESS => Ok(Self::KeysReport {
				device_id: required(wire.device_id, OUTCOME_SUCCESS, "deviceId")?,
				device_keys: wire.device_keys,
			}),
			other => Err(LinkingError::Protocol(format!(
				"unexpected outcome '{}'",
				other
			))),
		}
	}
}

// Empty strings count as missing
fn required(value: Option<String>, outcome: &'static str, field: &'static str) -> Result<String> {
	match value {
		Some(value) if !value.is_empty() => Ok(value),
		_ => Err(LinkingError::MissingField { outcome, field }),
	}
}
