//! Capabilities a linking session is driven through

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;

use super::{
	error::Result,
	messages::WirePayload,
	types::{
		CancellationReason, ConfirmationDigits, DeviceId, DeviceInfo, LoginRequest, LoginToken,
		RendezvousCode, SessionCredentials, VerificationRecord,
	},
};

/// Secure transport between the two devices
///
/// A `receive` that resolves to `None` means the peer went away (or the channel was
/// cancelled), not that something failed.
#[async_trait]
pub trait RendezvousChannel: Send {
	async fn generate_code(&mut self) -> Result<RendezvousCode>;

	/// Perform the secure handshake, returning digits for out-of-band comparison
	async fn connect(&mut self) -> Result<ConfirmationDigits>;

	async fn send(&mut self, payload: WirePayload) -> Result<()>;

	async fn receive(&mut self) -> Result<Option<WirePayload>>;

	async fn cancel(&mut self, reason: CancellationReason) -> Result<()>;
}

/// Homeserver login, used by the new device
#[async_trait]
pub trait LoginClient: Send + Sync {
	async fn send_login_request(
		&self,
		homeserver: &str,
		device_id: Option<&str>,
		request: LoginRequest,
	) -> Result<SessionCredentials>;
}

/// Installs an established session as the active one
#[async_trait]
pub trait SessionLifecycle: Send + Sync {
	async fn set_logged_in(&self, credentials: &SessionCredentials) -> Result<()>;
}

/// Local device-key storage of the cryptography subsystem
#[async_trait]
pub trait DeviceKeyStore: Send + Sync {
	async fn get_stored_device(
		&self,
		user_id: &str,
		device_id: &str,
	) -> Result<Option<DeviceInfo>>;

	async fn get_raw_stored_devices_for_user(
		&self,
		user_id: &str,
	) -> Result<HashMap<DeviceId, DeviceInfo>>;

	async fn set_device_verification(
		&self,
		user_id: &str,
		device_id: &str,
		verified: bool,
		blocked: bool,
		cross_signed: bool,
	) -> Result<VerificationRecord>;
}

/// Authenticated request for a one-time login token, used by the existing device
#[async_trait]
pub trait LoginTokenIssuer: Send + Sync {
	/// Account the token logs into
	fn user_id(&self) -> &str;

	/// Base URL of the account's homeserver
	fn homeserver(&self) -> &str;

	async fn request_login_token(&self) -> Result<LoginToken>;
}

/// Hooks fired as side effects of the session's progress
pub trait LinkObserver: Send + Sync {
	fn on_confirmation_digits(&self, _digits: &ConfirmationDigits) {}

	fn on_cancelled(&self, _reason: CancellationReason) {}

	/// The channel closed before the peer answered; the session is abandoned
	fn on_peer_gone(&self) {}
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LinkObserver for NoopObserver {}

/// Observable session events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
	ConfirmationDigits(ConfirmationDigits),
	Cancelled(CancellationReason),
	PeerGone,
}

impl LinkObserver for UnboundedSender<LinkEvent> {
	fn on_confirmation_digits(&self, digits: &ConfirmationDigits) {
		let _ = self.send(LinkEvent::ConfirmationDigits(digits.clone()));
	}

	fn on_cancelled(&self, reason: CancellationReason) {
		let _ = self.send(LinkEvent::Cancelled(reason));
	}

	fn on_peer_gone(&self) {
		let _ = self.send(LinkEvent::PeerGone);
	}
}
