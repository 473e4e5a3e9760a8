//! Scripted capabilities shared by the rendezvous tests

#![allow(dead_code)]

use std::{
	collections::VecDeque,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc,
	},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use sd_rendezvous::{
	adapters::MemoryDeviceStore,
	service::rendezvous::{
		CancellationReason, ConfirmationDigits, DeviceId, DeviceInfo, DeviceKeyStore, DeviceKeys,
		LinkingError, LoginClient, LoginRequest, LoginToken, LoginTokenIssuer, RendezvousChannel,
		RendezvousCode, Result, SessionCredentials, SessionLifecycle, VerificationRecord,
		WirePayload,
	},
};

pub const HOMESERVER: &str = "https://example.org";
pub const USER_ID: &str = "@alice:example.org";

pub fn keys(pairs: &[(&str, &str)]) -> DeviceKeys {
	pairs
		.iter()
		.map(|(k, v)| (k.to_string(), v.to_string()))
		.collect()
}

pub fn offer(homeserver: Option<&str>, login_token: Option<&str>) -> WirePayload {
	WirePayload {
		homeserver: homeserver.map(str::to_string),
		login_token: login_token.map(str::to_string),
		..WirePayload::bare("offer")
	}
}

pub fn keys_report(device_id: &str, device_keys: Option<DeviceKeys>) -> WirePayload {
	WirePayload {
		device_id: Some(device_id.to_string()),
		device_keys,
		..WirePayload::bare("success")
	}
}

/// Everything a [`ScriptedChannel`] was asked to do
#[derive(Debug, Default)]
pub struct ChannelLog {
	pub codes_generated: usize,
	pub connects: usize,
	pub sent: Vec<WirePayload>,
	pub receives: usize,
	pub cancels: Vec<CancellationReason>,
}

impl ChannelLog {
	pub fn operations(&self) -> usize {
		self.codes_generated + self.connects + self.sent.len() + self.receives + self.cancels.len()
	}
}

/// Channel that replays queued payloads and records every call
pub struct ScriptedChannel {
	incoming: VecDeque<WirePayload>,
	fail_sends: bool,
	log: Arc<Mutex<ChannelLog>>,
}

impl ScriptedChannel {
	pub fn new(incoming: Vec<WirePayload>) -> (Box<Self>, Arc<Mutex<ChannelLog>>) {
		Self::build(incoming, false)
	}

	/// Channel whose every `send` fails, as if the relay went away mid-exchange
	pub fn failing_sends(incoming: Vec<WirePayload>) -> (Box<Self>, Arc<Mutex<ChannelLog>>) {
		Self::build(incoming, true)
	}

	fn build(incoming: Vec<WirePayload>, fail_sends: bool) -> (Box<Self>, Arc<Mutex<ChannelLog>>) {
		let log = Arc::new(Mutex::new(ChannelLog::default()));
		let channel = Box::new(Self {
			incoming: incoming.into(),
			fail_sends,
			log: log.clone(),
		});
		(channel, log)
	}
}

#[async_trait]
impl RendezvousChannel for ScriptedChannel {
	async fn generate_code(&mut self) -> Result<RendezvousCode> {
		let mut log = self.log.lock();
		log.codes_generated += 1;
		Ok(RendezvousCode::new(format!("code-{}", log.codes_generated)))
	}

	async fn connect(&mut self) -> Result<ConfirmationDigits> {
		self.log.lock().connects += 1;
		Ok(ConfirmationDigits::new("042137"))
	}

	async fn send(&mut self, payload: WirePayload) -> Result<()> {
		if self.fail_sends {
			return Err(LinkingError::Channel("relay unavailable".to_string()));
		}
		self.log.lock().sent.push(payload);
		Ok(())
	}

	async fn receive(&mut self) -> Result<Option<WirePayload>> {
		self.log.lock().receives += 1;
		Ok(self.incoming.pop_front())
	}

	async fn cancel(&mut self, reason: CancellationReason) -> Result<()> {
		self.log.lock().cancels.push(reason);
		Ok(())
	}
}

/// Login capability returning fixed credentials, or failing when none are set
pub struct RecordingLogin {
	credentials: Option<SessionCredentials>,
	pub requests: Mutex<Vec<(String, String)>>,
}

impl RecordingLogin {
	pub fn succeeding(device_id: &str) -> Arc<Self> {
		Arc::new(Self {
			credentials: Some(SessionCredentials {
				user_id: USER_ID.to_string(),
				device_id: device_id.to_string(),
				access_token: "syt_access".to_string(),
				homeserver: HOMESERVER.to_string(),
			}),
			requests: Mutex::new(Vec::new()),
		})
	}

	pub fn failing() -> Arc<Self> {
		Arc::new(Self {
			credentials: None,
			requests: Mutex::new(Vec::new()),
		})
	}

	pub fn calls(&self) -> usize {
		self.requests.lock().len()
	}
}

#[async_trait]
impl LoginClient for RecordingLogin {
	async fn send_login_request(
		&self,
		homeserver: &str,
		_device_id: Option<&str>,
		request: LoginRequest,
	) -> Result<SessionCredentials> {
		let LoginRequest::Token(token) = request;
		self.requests
			.lock()
			.push((homeserver.to_string(), token.expose().to_string()));
		self.credentials
			.clone()
			.ok_or_else(|| LinkingError::Login("M_FORBIDDEN".to_string()))
	}
}

/// Token issuer for the existing device's account
pub struct FixedTokenIssuer {
	pub token: String,
	pub issued: AtomicUsize,
}

impl FixedTokenIssuer {
	pub fn new(token: &str) -> Arc<Self> {
		Arc::new(Self {
			token: token.to_string(),
			issued: AtomicUsize::new(0),
		})
	}
}

#[async_trait]
impl LoginTokenIssuer for FixedTokenIssuer {
	fn user_id(&self) -> &str {
		USER_ID
	}

	fn homeserver(&self) -> &str {
		HOMESERVER
	}

	async fn request_login_token(&self) -> Result<LoginToken> {
		self.issued.fetch_add(1, Ordering::SeqCst);
		Ok(LoginToken::new(self.token.clone()))
	}
}

/// Key store that counts device lookups
pub struct CountingStore {
	pub inner: Arc<MemoryDeviceStore>,
	pub lookups: AtomicUsize,
}

impl CountingStore {
	pub fn new(inner: Arc<MemoryDeviceStore>) -> Arc<Self> {
		Arc::new(Self {
			inner,
			lookups: AtomicUsize::new(0),
		})
	}

	pub fn lookups(&self) -> usize {
		self.lookups.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl DeviceKeyStore for CountingStore {
	async fn get_stored_device(
		&self,
		user_id: &str,
		device_id: &str,
	) -> Result<Option<DeviceInfo>> {
		self.lookups.fetch_add(1, Ordering::SeqCst);
		self.inner.get_stored_device(user_id, device_id).await
	}

	async fn get_raw_stored_devices_for_user(
		&self,
		user_id: &str,
	) -> Result<std::collections::HashMap<DeviceId, DeviceInfo>> {
		self.inner.get_raw_stored_devices_for_user(user_id).await
	}

	async fn set_device_verification(
		&self,
		user_id: &str,
		device_id: &str,
		verified: bool,
		blocked: bool,
		cross_signed: bool,
	) -> Result<VerificationRecord> {
		self.inner
			.set_device_verification(user_id, device_id, verified, blocked, cross_signed)
			.await
	}
}

/// Publishes fixed keys for whichever device logs in
pub struct PublishOnLogin {
	pub keys: DeviceKeys,
	pub stores: Vec<Arc<MemoryDeviceStore>>,
}

#[async_trait]
impl SessionLifecycle for PublishOnLogin {
	async fn set_logged_in(&self, credentials: &SessionCredentials) -> Result<()> {
		for store in &self.stores {
			store.publish_device(&credentials.user_id, &credentials.device_id, self.keys.clone());
		}
		Ok(())
	}
}
