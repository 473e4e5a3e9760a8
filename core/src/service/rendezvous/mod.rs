//! Device-linking rendezvous
//!
//! A [`RendezvousSession`] drives one attempt at linking a new device to an account that
//! is already signed in on another device. The session is parameterised by its role:
//! [`NewDevice`] receives a login token and reports its keys back, while
//! [`ExistingDevice`] hands out the token and cross-signs the new device afterwards.
//! Both roles share code generation, connection, and cancellation.

pub mod error;
pub mod existing_device;
pub mod messages;
pub mod new_device;
pub mod ports;
pub mod types;
pub mod verification;

use std::{fmt, sync::Arc};

use tracing::{debug, info, warn};
use uuid::Uuid;

pub use error::{KeyMismatch, LinkingError, Result};
pub use existing_device::ExistingDevice;
pub use messages::{LinkPayload, WirePayload};
pub use new_device::NewDevice;
pub use ports::{
	DeviceKeyStore, LinkEvent, LinkObserver, LoginClient, LoginTokenIssuer, NoopObserver,
	RendezvousChannel, SessionLifecycle,
};
pub use types::{
	CancellationReason, ConfirmationDigits, DeviceId, DeviceInfo, DeviceKeys, LoginRequest,
	LoginToken, RendezvousCode, SessionCredentials, UserId, VerificationRecord,
};

/// Role a device plays in a linking session
pub trait LinkRole: Send {
	/// Prefix for log lines emitted by this role
	const LABEL: &'static str;
}

/// Progress of a linking session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
	Created,
	CodeReady,
	Connected,
	AwaitingPeer,
	Completed,
	Declined,
	Cancelled { reason: CancellationReason },
	Failed { reason: String },
	/// The channel closed before the peer sent anything
	Abandoned,
}

impl LinkState {
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			Self::Completed
				| Self::Declined
				| Self::Cancelled { .. }
				| Self::Failed { .. }
				| Self::Abandoned
		)
	}
}

impl fmt::Display for LinkState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Created => f.write_str("created"),
			Self::CodeReady => f.write_str("code ready"),
			Self::Connected => f.write_str("connected"),
			Self::AwaitingPeer => f.write_str("awaiting peer"),
			Self::Completed => f.write_str("completed"),
			Self::Declined => f.write_str("declined"),
			Self::Cancelled { reason } => write!(f, "cancelled: {}", reason),
			Self::Failed { reason } => write!(f, "failed: {}", reason),
			Self::Abandoned => f.write_str("abandoned"),
		}
	}
}

/// One linking attempt between two devices
///
/// Calls must be serialised by the owner; every step takes `&mut self`.
pub struct RendezvousSession<R: LinkRole> {
	id: Uuid,
	channel: Box<dyn RendezvousChannel>,
	observer: Arc<dyn LinkObserver>,
	code: Option<RendezvousCode>,
	digits: Option<ConfirmationDigits>,
	state: LinkState,
	role: R,
}

impl<R: LinkRole> RendezvousSession<R> {
	pub fn new(channel: Box<dyn RendezvousChannel>, role: R) -> Self {
		Self {
			id: Uuid::new_v4(),
			channel,
			observer: Arc::new(NoopObserver),
			code: None,
			digits: None,
			state: LinkState::Created,
			role,
		}
	}

	pub fn with_observer(mut self, observer: Arc<dyn LinkObserver>) -> Self {
		self.observer = observer;
		self
	}

	pub fn id(&self) -> Uuid {
		self.id
	}

	pub fn state(&self) -> &LinkState {
		&self.state
	}

	pub fn code(&self) -> Option<&RendezvousCode> {
		self.code.as_ref()
	}

	pub fn confirmation_digits(&self) -> Option<&ConfirmationDigits> {
		self.digits.as_ref()
	}

	/// Generate the rendezvous code, returning the cached one on repeated calls
	pub async fn generate_code(&mut self) -> Result<RendezvousCode> {
		if let Some(code) = &self.code {
			return Ok(code.clone());
		}
		self.ensure_open()?;

		let result = self.channel.generate_code().await;
		let code = self.check(result)?;
		self.code = Some(code.clone());
		if matches!(self.state, LinkState::Created) {
			self.state = LinkState::CodeReady;
		}

		debug!(session_id = %self.id, "{} Generated rendezvous code", R::LABEL);
		Ok(code)
	}

	/// Establish the secure channel and surface the confirmation digits
	pub async fn connect(&mut self) -> Result<ConfirmationDigits> {
		self.ensure_open()?;
		if !matches!(self.state, LinkState::Created | LinkState::CodeReady) {
			return Err(self.invalid_state("connect"));
		}

		let result = self.channel.connect().await;
		let digits = self.check(result)?;
		self.digits = Some(digits.clone());
		self.state = LinkState::Connected;
		self.observer.on_confirmation_digits(&digits);

		info!(session_id = %self.id, "{} Connected, confirmation digits ready", R::LABEL);
		Ok(digits)
	}

	/// Terminate the session, forwarding `reason` to the channel
	///
	/// Also reaches the channel after a failure or an abandoned exchange, so the peer
	/// learns the link is over. No-op once the session was cancelled or declined.
	pub async fn cancel(&mut self, reason: CancellationReason) -> Result<()> {
		if matches!(
			self.state,
			LinkState::Cancelled { .. } | LinkState::Declined
		) {
			debug!(
				session_id = %self.id,
				state = %self.state,
				"{} Ignoring cancel on cancelled session",
				R::LABEL
			);
			return Ok(());
		}

		let result = self.channel.cancel(reason).await;
		self.state = LinkState::Cancelled { reason };
		self.observer.on_cancelled(reason);

		info!(session_id = %self.id, %reason, "{} Session cancelled", R::LABEL);
		result
	}

	pub async fn user_cancelled(&mut self) -> Result<()> {
		self.cancel(CancellationReason::UserCancelled).await
	}

	async fn send_payload(&mut self, payload: LinkPayload) -> Result<()> {
		let outcome = payload.outcome();
		let result = self.channel.send(payload.into()).await;
		self.check(result)?;
		debug!(session_id = %self.id, outcome, "{} Sent payload", R::LABEL);
		Ok(())
	}

	/// Wait for the peer; `None` marks the session abandoned
	async fn receive_payload(&mut self) -> Result<Option<WirePayload>> {
		self.state = LinkState::AwaitingPeer;
		let result = self.channel.receive().await;
		match self.check(result)? {
			Some(payload) => {
				debug!(
					session_id = %self.id,
					outcome = %payload.outcome,
					"{} Received payload",
					R::LABEL
				);
				Ok(Some(payload))
			}
			None => {
				self.state = LinkState::Abandoned;
				self.observer.on_peer_gone();
				info!(session_id = %self.id, "{} Channel closed without a response", R::LABEL);
				Ok(None)
			}
		}
	}

	fn ensure_open(&self) -> Result<()> {
		if self.state.is_terminal() {
			return Err(LinkingError::SessionClosed {
				state: self.state.to_string(),
			});
		}
		Ok(())
	}

	fn invalid_state(&self, operation: &'static str) -> LinkingError {
		LinkingError::InvalidState {
			operation,
			state: self.state.to_string(),
		}
	}

	fn check<T>(&mut self, result: Result<T>) -> Result<T> {
		result.map_err(|err| self.fail(err))
	}

	/// Record `err` as the reason the session ended
	fn fail(&mut self, err: LinkingError) -> LinkingError {
		warn!(session_id = %self.id, error = %err, "{} Linking failed", R::LABEL);
		self.state = LinkState::Failed {
			reason: err.to_string(),
		};
		err
	}
}

impl<R: LinkRole> fmt::Debug for RendezvousSession<R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RendezvousSession")
			.field("id", &self.id)
			.field("role", &R::LABEL)
			.field("state", &self.state)
			.field("code", &self.code)
			.field("digits", &self.digits)
			.finish()
	}
}
