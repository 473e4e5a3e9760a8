//! Role of the device that is being signed in

use std::sync::Arc;

use tracing::{info, warn};

use super::{
	error::{LinkingError, Result},
	messages::LinkPayload,
	ports::{DeviceKeyStore, LoginClient, SessionLifecycle},
	types::{CancellationReason, DeviceKeys, LoginRequest, SessionCredentials},
	LinkRole, LinkState, RendezvousSession,
};

/// Dependencies of the device requesting a new session
pub struct NewDevice {
	login: Arc<dyn LoginClient>,
	key_store: Option<Arc<dyn DeviceKeyStore>>,
	lifecycle: Option<Arc<dyn SessionLifecycle>>,
}

impl NewDevice {
	pub fn new(login: Arc<dyn LoginClient>) -> Self {
		Self {
			login,
			key_store: None,
			lifecycle: None,
		}
	}

	/// Enable end-to-end crypto; without a key store no keys are reported
	pub fn with_key_store(mut self, key_store: Arc<dyn DeviceKeyStore>) -> Self {
		self.key_store = Some(key_store);
		self
	}

	/// Install the new session as soon as the login succeeds
	pub fn with_session_lifecycle(mut self, lifecycle: Arc<dyn SessionLifecycle>) -> Self {
		self.lifecycle = Some(lifecycle);
		self
	}

	pub fn is_crypto_capable(&self) -> bool {
		self.key_store.is_some()
	}
}

impl LinkRole for NewDevice {
	const LABEL: &'static str = "[NEW_DEVICE]";
}

impl RendezvousSession<NewDevice> {
	/// Receive the login offer, sign in with it and report this device's keys
	///
	/// Returns `None` when the channel closed first or the other device declined.
	pub async fn complete_on_new_device(&mut self) -> Result<Option<SessionCredentials>> {
		self.ensure_open()?;
		if !matches!(self.state, LinkState::Connected) {
			return Err(self.invalid_state("complete login"));
		}

		let Some(wire) = self.receive_payload().await? else {
			return Ok(None);
		};

		let (homeserver, login_token) = match LinkPayload::try_from(wire) {
			Ok(LinkPayload::LoginOffer {
				homeserver,
				login_token,
				..
			}) => (homeserver, login_token),
			Ok(LinkPayload::Decline) => {
				info!(session_id = %self.id, "{} Other device declined the login", NewDevice::LABEL);
				let result = self.cancel(CancellationReason::UserDeclined).await;
				self.state = LinkState::Declined;
				result?;
				return Ok(None);
			}
			Ok(other) => {
				return Err(self.fail(LinkingError::Protocol(format!(
					"expected a login offer, received '{}'",
					other.outcome()
				))))
			}
			Err(err) => return Err(self.fail(err)),
		};

		info!(
			session_id = %self.id,
			%homeserver,
			"{} Exchanging login token",
			NewDevice::LABEL
		);
		let result = self
			.role
			.login
			.send_login_request(&homeserver, None, LoginRequest::Token(login_token))
			.await;
		let credentials = self.check(result)?;

		if let Some(lifecycle) = self.role.lifecycle.clone() {
			let result = lifecycle.set_logged_in(&credentials).await;
			self.check(result)?;
		}

		let device_keys = self.own_device_keys(&credentials).await?;
		self.send_payload(LinkPayload::KeysReport {
			device_id: credentials.device_id.clone(),
			device_keys,
		})
		.await?;
		self.state = LinkState::Completed;

		info!(
			session_id = %self.id,
			user_id = %credentials.user_id,
			device_id = %credentials.device_id,
			"{} Signed in",
			NewDevice::LABEL
		);
		Ok(Some(credentials))
	}

	async fn own_device_keys(
		&mut self,
		credentials: &SessionCredentials,
	) -> Result<Option<DeviceKeys>> {
		let Some(key_store) = self.role.key_store.clone() else {
			warn!(
				session_id = %self.id,
				"{} No crypto support, reporting no keys; this device will not be cross-signed",
				NewDevice::LABEL
			);
			return Ok(None);
		};

		let result = key_store
			.get_raw_stored_devices_for_user(&credentials.user_id)
			.await;
		let mut devices = self.check(result)?;

		match devices.remove(&credentials.device_id) {
			Some(device) => Ok(Some(device.keys)),
			None => Err(self.fail(LinkingError::UnknownDevice {
				user_id: credentials.user_id.clone(),
				device_id: credentials.device_id.clone(),
			})),
		}
	}
}
