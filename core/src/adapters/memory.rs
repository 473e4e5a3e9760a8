//! In-process implementations of the linking capabilities

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::{distributions::Alphanumeric, Rng, RngCore};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::service::rendezvous::{
	CancellationReason, ConfirmationDigits, DeviceId, DeviceInfo, DeviceKeyStore, DeviceKeys,
	LinkingError, LoginClient, LoginRequest, LoginToken, LoginTokenIssuer, RendezvousChannel,
	RendezvousCode, Result, SessionCredentials, SessionLifecycle, UserId, VerificationRecord,
	WirePayload,
};

/// One end of a loopback channel
///
/// Payloads cross as JSON so both ends exercise the wire form. Cancelling an end closes
/// its outgoing half; the peer's `receive` then resolves to `None`.
pub struct MemoryChannel {
	code: RendezvousCode,
	secret: Arc<[u8; 32]>,
	tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
	rx: mpsc::UnboundedReceiver<Vec<u8>>,
	cancellation: Arc<Mutex<Option<CancellationReason>>>,
}

impl MemoryChannel {
	pub fn pair() -> (Self, Self) {
		let mut secret = [0u8; 32];
		rand::thread_rng().fill_bytes(&mut secret);
		let secret = Arc::new(secret);
		let code = RendezvousCode::new(format!("sd-link:{}", Uuid::new_v4()));
		let cancellation = Arc::new(Mutex::new(None));

		let (a_tx, b_rx) = mpsc::unbounded_channel();
		let (b_tx, a_rx) = mpsc::unbounded_channel();

		let a = Self {
			code: code.clone(),
			secret: secret.clone(),
			tx: Some(a_tx),
			rx: a_rx,
			cancellation: cancellation.clone(),
		};
		let b = Self {
			code,
			secret,
			tx: Some(b_tx),
			rx: b_rx,
			cancellation,
		};
		(a, b)
	}

	/// Reason either end cancelled with, if any
	pub fn cancellation(&self) -> Option<CancellationReason> {
		*self.cancellation.lock()
	}

	/// Shared view of the cancellation reason that outlives the channel
	pub fn cancellation_handle(&self) -> Arc<Mutex<Option<CancellationReason>>> {
		self.cancellation.clone()
	}
}

#[async_trait]
impl RendezvousChannel for MemoryChannel {
	async fn generate_code(&mut self) -> Result<RendezvousCode> {
		Ok(self.code.clone())
	}

	async fn connect(&mut self) -> Result<ConfirmationDigits> {
		if let Some(reason) = self.cancellation() {
			return Err(LinkingError::Channel(format!("channel cancelled: {}", reason)));
		}
		Ok(ConfirmationDigits::from_secret(self.secret.as_slice()))
	}

	async fn send(&mut self, payload: WirePayload) -> Result<()> {
		let tx = self
			.tx
			.as_ref()
			.ok_or_else(|| LinkingError::Channel("channel cancelled".to_string()))?;
		tx.send(payload.to_json()?)
			.map_err(|_| LinkingError::Channel("peer closed the channel".to_string()))
	}

	async fn receive(&mut self) -> Result<Option<WirePayload>> {
		if self.tx.is_none() {
			return Ok(None);
		}
		match self.rx.recv().await {
			Some(data) => Ok(Some(WirePayload::from_json(&data)?)),
			None => Ok(None),
		}
	}

	async fn cancel(&mut self, reason: CancellationReason) -> Result<()> {
		self.cancellation.lock().get_or_insert(reason);
		self.tx = None;
		self.rx.close();
		Ok(())
	}
}

/// Device-key storage held in memory
#[derive(Default)]
pub struct MemoryDeviceStore {
	devices: RwLock<HashMap<UserId, HashMap<DeviceId, DeviceInfo>>>,
	verifications: RwLock<HashMap<(UserId, DeviceId), VerificationRecord>>,
}

impl MemoryDeviceStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Record the keys a device published
	pub fn publish_device(&self, user_id: &str, device_id: &str, keys: DeviceKeys) {
		self.devices
			.write()
			.entry(user_id.to_string())
			.or_default()
			.insert(device_id.to_string(), DeviceInfo::new(keys));
	}

	pub fn verification(&self, user_id: &str, device_id: &str) -> Option<VerificationRecord> {
		self.verifications
			.read()
			.get(&(user_id.to_string(), device_id.to_string()))
			.cloned()
	}
}

#[async_trait]
impl DeviceKeyStore for MemoryDeviceStore {
	async fn get_stored_device(
		&self,
		user_id: &str,
		device_id: &str,
	) -> Result<Option<DeviceInfo>> {
		Ok(self
			.devices
			.read()
			.get(user_id)
			.and_then(|devices| devices.get(device_id))
			.cloned())
	}

	async fn get_raw_stored_devices_for_user(
		&self,
		user_id: &str,
	) -> Result<HashMap<DeviceId, DeviceInfo>> {
		Ok(self
			.devices
			.read()
			.get(user_id)
			.cloned()
			.unwrap_or_default())
	}

	async fn set_device_verification(
		&self,
		user_id: &str,
		device_id: &str,
		verified: bool,
		blocked: bool,
		cross_signed: bool,
	) -> Result<VerificationRecord> {
		let known = self
			.devices
			.read()
			.get(user_id)
			.is_some_and(|devices| devices.contains_key(device_id));
		if !known {
			return Err(LinkingError::Storage(format!(
				"Unknown device {} for user {}",
				device_id, user_id
			)));
		}

		let record = VerificationRecord {
			user_id: user_id.to_string(),
			device_id: device_id.to_string(),
			verified,
			blocked,
			cross_signed,
			updated_at: chrono::Utc::now(),
		};
		self.verifications
			.write()
			.insert((user_id.to_string(), device_id.to_string()), record.clone());
		Ok(record)
	}
}

/// The session the process is currently signed in with
#[derive(Default)]
pub struct ActiveSession {
	current: RwLock<Option<SessionCredentials>>,
}

impl ActiveSession {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn current(&self) -> Option<SessionCredentials> {
		self.current.read().clone()
	}
}

#[async_trait]
impl SessionLifecycle for ActiveSession {
	async fn set_logged_in(&self, credentials: &SessionCredentials) -> Result<()> {
		*self.current.write() = Some(credentials.clone());
		Ok(())
	}
}

fn random_string(len: usize) -> String {
	rand::thread_rng()
		.sample_iter(&Alphanumeric)
		.take(len)
		.map(char::from)
		.collect()
}

/// Homeserver stand-in for one account
///
/// Issues single-use login tokens and redeems them for new device sessions.
pub struct MemoryHomeserver {
	base_url: String,
	user_id: UserId,
	tokens: Mutex<HashSet<String>>,
}

impl MemoryHomeserver {
	pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			user_id: user_id.into(),
			tokens: Mutex::new(HashSet::new()),
		}
	}

	pub fn outstanding_tokens(&self) -> usize {
		self.tokens.lock().len()
	}
}

#[async_trait]
impl LoginTokenIssuer for MemoryHomeserver {
	fn user_id(&self) -> &str {
		&self.user_id
	}

	fn homeserver(&self) -> &str {
		&self.base_url
	}

	async fn request_login_token(&self) -> Result<LoginToken> {
		let token = random_string(24);
		self.tokens.lock().insert(token.clone());
		Ok(LoginToken::new(token))
	}
}

#[async_trait]
impl LoginClient for MemoryHomeserver {
	async fn send_login_request(
		&self,
		homeserver: &str,
		device_id: Option<&str>,
		request: LoginRequest,
	) -> Result<SessionCredentials> {
		if homeserver.trim_end_matches('/') != self.base_url.trim_end_matches('/') {
			return Err(LinkingError::Login(format!("Unknown homeserver {}", homeserver)));
		}

		let LoginRequest::Token(token) = request;
		if !self.tokens.lock().remove(token.expose()) {
			return Err(LinkingError::Login("Invalid login token".to_string()));
		}

		Ok(SessionCredentials {
			user_id: self.user_id.clone(),
			device_id: device_id
				.map(str::to_string)
				.unwrap_or_else(|| random_string(10).to_uppercase()),
			access_token: format!("sdat_{}", random_string(32)),
			homeserver: self.base_url.clone(),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::service::rendezvous::LinkPayload;

	#[tokio::test]
	async fn both_ends_derive_the_same_digits_and_code() {
		let (mut a, mut b) = MemoryChannel::pair();
		assert_eq!(a.generate_code().await.unwrap(), b.generate_code().await.unwrap());
		assert_eq!(a.connect().await.unwrap(), b.connect().await.unwrap());
	}

	#[tokio::test]
	async fn payloads_cross_in_wire_form() {
		let (mut a, mut b) = MemoryChannel::pair();
		a.send(LinkPayload::Decline.into()).await.unwrap();
		let received = b.receive().await.unwrap().unwrap();
		assert_eq!(received, WirePayload::bare("declined"));
	}

	#[tokio::test]
	async fn cancel_closes_the_peer_receive() {
		let (mut a, mut b) = MemoryChannel::pair();
		a.cancel(CancellationReason::UserCancelled).await.unwrap();

		assert_eq!(b.receive().await.unwrap(), None);
		assert_eq!(b.cancellation(), Some(CancellationReason::UserCancelled));
		assert!(a.send(LinkPayload::Decline.into()).await.is_err());
	}

	#[tokio::test]
	async fn login_tokens_are_single_use() {
		let homeserver = MemoryHomeserver::new("https://example.org", "@alice:example.org");
		let token = homeserver.request_login_token().await.unwrap();

		let credentials = homeserver
			.send_login_request(
				"https://example.org/",
				None,
				LoginRequest::Token(token.clone()),
			)
			.await
			.unwrap();
		assert_eq!(credentials.user_id, "@alice:example.org");
		assert_eq!(homeserver.outstanding_tokens(), 0);

		let err = homeserver
			.send_login_request("https://example.org", None, LoginRequest::Token(token))
			.await
			.unwrap_err();
		assert!(matches!(err, LinkingError::Login(_)));
	}

	#[tokio::test]
	async fn verification_of_unknown_device_fails() {
		let store = MemoryDeviceStore::new();
		let err = store
			.set_device_verification("@alice:example.org", "DEV1", true, false, true)
			.await
			.unwrap_err();
		assert!(matches!(err, LinkingError::Storage(_)));
	}
}
