//! Role of the already signed-in device that approves the link

use std::{sync::Arc, time::Duration};

use tracing::{debug, info, warn};

use super::{
	error::{LinkingError, Result},
	messages::{LinkPayload, OUTCOME_SUCCESS},
	ports::{DeviceKeyStore, LoginTokenIssuer},
	types::{DeviceId, DeviceInfo, DeviceKeys, VerificationRecord},
	verification::check_reported_keys,
	LinkRole, LinkState, RendezvousSession,
};
use crate::config::LinkingConfig;

/// Dependencies and remembered peer state of the approving device
pub struct ExistingDevice {
	token_issuer: Arc<dyn LoginTokenIssuer>,
	key_store: Arc<dyn DeviceKeyStore>,
	cross_sign_timeout: Duration,
	require_cross_signing: bool,
	new_device_id: Option<DeviceId>,
	new_device_keys: Option<DeviceKeys>,
}

impl ExistingDevice {
	pub fn new(token_issuer: Arc<dyn LoginTokenIssuer>, key_store: Arc<dyn DeviceKeyStore>) -> Self {
		let config = LinkingConfig::default();
		Self {
			token_issuer,
			key_store,
			cross_sign_timeout: config.cross_sign_timeout(),
			require_cross_signing: config.require_cross_signing,
			new_device_id: None,
			new_device_keys: None,
		}
	}

	pub fn with_config(mut self, config: &LinkingConfig) -> Self {
		self.cross_sign_timeout = config.cross_sign_timeout();
		self.require_cross_signing = config.require_cross_signing;
		self
	}
}

impl LinkRole for ExistingDevice {
	const LABEL: &'static str = "[EXISTING_DEVICE]";
}

impl RendezvousSession<ExistingDevice> {
	/// Connect and surface the confirmation digits
	///
	/// The caller then shows the digits and either confirms or declines.
	pub async fn start_on_existing_device(&mut self) -> Result<()> {
		self.connect().await?;
		Ok(())
	}

	pub async fn decline_login_on_existing_device(&mut self) -> Result<()> {
		self.ensure_open()?;
		if !matches!(self.state, LinkState::Connected) {
			return Err(self.invalid_state("decline login"));
		}

		self.send_payload(LinkPayload::Decline).await?;
		self.state = LinkState::Declined;

		info!(session_id = %self.id, "{} Declined login", ExistingDevice::LABEL);
		Ok(())
	}

	/// Hand a login token to the new device and wait for it to report back
	///
	/// Returns the id of the new device, or `None` if the channel closed first.
	pub async fn confirm_login_on_existing_device(&mut self) -> Result<Option<DeviceId>> {
		self.ensure_open()?;
		if !matches!(self.state, LinkState::Connected) {
			return Err(self.invalid_state("confirm login"));
		}

		let issuer = self.role.token_issuer.clone();
		let result = issuer.request_login_token().await;
		let login_token = self.check(result)?;
		debug!(session_id = %self.id, "{} Obtained login token", ExistingDevice::LABEL);

		self.send_payload(LinkPayload::LoginOffer {
			homeserver: issuer.homeserver().to_string(),
			login_token,
			user_id: Some(issuer.user_id().to_string()),
		})
		.await?;

		let Some(wire) = self.receive_payload().await? else {
			return Ok(None);
		};

		if wire.outcome != OUTCOME_SUCCESS {
			return Err(self.fail(LinkingError::LinkingFailed {
				outcome: wire.outcome,
			}));
		}

		let (device_id, device_keys) = match LinkPayload::try_from(wire) {
			Ok(LinkPayload::KeysReport {
				device_id,
				device_keys,
			}) => (device_id, device_keys),
			Ok(other) => {
				return Err(self.fail(LinkingError::Protocol(format!(
					"expected a keys report, received '{}'",
					other.outcome()
				))))
			}
			Err(err) => return Err(self.fail(err)),
		};

		info!(
			session_id = %self.id,
			%device_id,
			reported_keys = device_keys.as_ref().map_or(0, |keys| keys.len()),
			"{} New device signed in",
			ExistingDevice::LABEL
		);

		self.role.new_device_id = Some(device_id.clone());
		self.role.new_device_keys = device_keys;
		self.state = LinkState::Completed;
		Ok(Some(device_id))
	}

	pub fn new_device_id(&self) -> Option<&str> {
		self.role.new_device_id.as_deref()
	}

	pub fn new_device_keys(&self) -> Option<&DeviceKeys> {
		self.role.new_device_keys.as_ref()
	}

	/// Cross-sign the new device, waiting up to the configured timeout for its keys
	pub async fn cross_sign(&mut self) -> Result<Option<VerificationRecord>> {
		let timeout = self.role.cross_sign_timeout;
		self.cross_sign_within(timeout).await
	}

	/// Verify the new device's published keys against its report and cross-sign it
	///
	/// Returns `None` when the new device reported no keys. If the device is not yet in
	/// key storage, waits once for `timeout` and looks again.
	pub async fn cross_sign_within(
		&mut self,
		timeout: Duration,
	) -> Result<Option<VerificationRecord>> {
		let Some(device_id) = self.role.new_device_id.clone() else {
			return Err(LinkingError::NoDeviceToSign);
		};
		if !matches!(self.state, LinkState::Completed) {
			return Err(self.invalid_state("cross-sign"));
		}

		let reported = match self.role.new_device_keys.clone() {
			Some(keys) if !keys.is_empty() => keys,
			_ if self.role.require_cross_signing => {
				return Err(self.fail(LinkingError::CrossSigningUnavailable { device_id }));
			}
			_ => {
				warn!(
					session_id = %self.id,
					%device_id,
					"{} New device reported no keys, skipping cross-signing",
					ExistingDevice::LABEL
				);
				return Ok(None);
			}
		};

		let user_id = self.role.token_issuer.user_id().to_string();
		let stored = match self.lookup_device(&user_id, &device_id).await? {
			Some(device) => device,
			None => {
				debug!(
					session_id = %self.id,
					%device_id,
					?timeout,
					"{} Device keys not published yet, waiting",
					ExistingDevice::LABEL
				);
				tokio::time::sleep(timeout).await;

				match self.lookup_device(&user_id, &device_id).await? {
					Some(device) => device,
					None => {
						return Err(self.fail(LinkingError::DeviceTimeout {
							device_id,
							waited: timeout,
						}))
					}
				}
			}
		};

		if let Err(mismatch) = check_reported_keys(&stored, &reported) {
			return Err(self.fail(mismatch.into()));
		}

		let key_store = self.role.key_store.clone();
		let result = key_store
			.set_device_verification(&user_id, &device_id, true, false, true)
			.await;
		let record = self.check(result)?;

		info!(
			session_id = %self.id,
			%device_id,
			"{} Cross-signed new device",
			ExistingDevice::LABEL
		);
		Ok(Some(record))
	}

	async fn lookup_device(&mut self, user_id: &str, device_id: &str) -> Result<Option<DeviceInfo>> {
		let key_store = self.role.key_store.clone();
		let result = key_store.get_stored_device(user_id, device_id).await;
		self.check(result)
	}
}
