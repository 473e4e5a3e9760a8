//! Links two in-process devices over a loopback rendezvous channel

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::Parser;
use sd_rendezvous::{
	adapters::{ActiveSession, MemoryChannel, MemoryDeviceStore, MemoryHomeserver},
	logging,
	service::rendezvous::{
		CancellationReason, DeviceKeys, SessionCredentials, SessionLifecycle, VerificationRecord,
	},
	ExistingDevice, LinkingConfig, NewDevice, RendezvousSession,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sd-link-demo", about = "Link a new device to an account over a loopback channel")]
struct Args {
	/// TOML linking configuration
	#[arg(long)]
	config: Option<PathBuf>,

	/// Decline the login on the existing device
	#[arg(long)]
	decline: bool,

	/// Override the cross-signing wait
	#[arg(long)]
	timeout_ms: Option<u64>,

	/// Delay before the new device's keys reach the existing device
	#[arg(long, default_value_t = 0)]
	publish_delay_ms: u64,

	/// Link without end-to-end crypto on the new device
	#[arg(long)]
	no_crypto: bool,

	#[arg(long, env = "SD_LINK_HOMESERVER", default_value = "https://example.org")]
	homeserver: String,

	#[arg(long, default_value = "@alice:example.org")]
	user_id: String,
}

/// Installs the new session and publishes the device's keys, locally at once and to the
/// existing device after a delay
struct DeviceBootstrap {
	active: ActiveSession,
	local: Arc<MemoryDeviceStore>,
	remote: Arc<MemoryDeviceStore>,
	publish_delay: Duration,
}

fn identity_keys(device_id: &str) -> DeviceKeys {
	["ed25519", "curve25519"]
		.into_iter()
		.map(|algorithm| {
			let seed = format!("{}:{}", algorithm, device_id);
			(
				format!("{}:{}", algorithm, device_id),
				blake3::hash(seed.as_bytes()).to_hex().to_string(),
			)
		})
		.collect()
}

#[async_trait]
impl SessionLifecycle for DeviceBootstrap {
	async fn set_logged_in(
		&self,
		credentials: &SessionCredentials,
	) -> sd_rendezvous::Result<()> {
		self.active.set_logged_in(credentials).await?;

		let keys = identity_keys(&credentials.device_id);
		self.local
			.publish_device(&credentials.user_id, &credentials.device_id, keys.clone());

		let remote = self.remote.clone();
		let delay = self.publish_delay;
		let user_id = credentials.user_id.clone();
		let device_id = credentials.device_id.clone();
		tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			remote.publish_device(&user_id, &device_id, keys);
		});

		Ok(())
	}
}

async fn run_existing(
	session: &mut RendezvousSession<ExistingDevice>,
	decline: bool,
) -> sd_rendezvous::Result<Option<VerificationRecord>> {
	if decline {
		session.decline_login_on_existing_device().await?;
		return Ok(None);
	}

	match session.confirm_login_on_existing_device().await? {
		Some(_) => session.cross_sign().await,
		None => Ok(None),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	let mut config = match &args.config {
		Some(path) => LinkingConfig::load(path)
			.with_context(|| format!("loading {}", path.display()))?,
		None => LinkingConfig::default(),
	};
	if let Some(timeout_ms) = args.timeout_ms {
		config.cross_sign_timeout_ms = timeout_ms;
	}
	logging::init(&config.log_filter);

	let homeserver = Arc::new(MemoryHomeserver::new(&args.homeserver, &args.user_id));
	let existing_store = Arc::new(MemoryDeviceStore::new());
	let new_store = Arc::new(MemoryDeviceStore::new());
	let bootstrap = Arc::new(DeviceBootstrap {
		active: ActiveSession::new(),
		local: new_store.clone(),
		remote: existing_store.clone(),
		publish_delay: Duration::from_millis(args.publish_delay_ms),
	});

	let (existing_channel, new_channel) = MemoryChannel::pair();

	let mut existing = RendezvousSession::new(
		Box::new(existing_channel),
		ExistingDevice::new(homeserver.clone(), existing_store.clone()).with_config(&config),
	);

	let mut new_role =
		NewDevice::new(homeserver.clone()).with_session_lifecycle(bootstrap.clone());
	if !args.no_crypto {
		new_role = new_role.with_key_store(new_store.clone());
	}
	let mut new_device = RendezvousSession::new(Box::new(new_channel), new_role);

	let code = existing.generate_code().await?;
	info!(%code, "Rendezvous code ready");

	existing.start_on_existing_device().await?;
	let new_digits = new_device.connect().await?;
	let existing_digits = existing.confirmation_digits().cloned();

	if existing_digits.as_ref() != Some(&new_digits) {
		warn!("Confirmation digits differ, aborting");
		existing.cancel(CancellationReason::DataMismatch).await?;
		bail!("confirmation digits do not match");
	}
	info!(digits = %new_digits, "Both devices show the same digits");

	let (existing_result, new_result) = tokio::join!(
		run_existing(&mut existing, args.decline),
		new_device.complete_on_new_device()
	);

	match new_result? {
		Some(credentials) => info!(
			user_id = %credentials.user_id,
			device_id = %credentials.device_id,
			"New device signed in"
		),
		None => info!(state = %new_device.state(), "New device was not signed in"),
	}

	match existing_result? {
		Some(record) => info!(
			device_id = %record.device_id,
			cross_signed = record.cross_signed,
			"New device cross-signed"
		),
		None => info!(state = %existing.state(), "Nothing was cross-signed"),
	}

	if let Some(active) = bootstrap.active.current() {
		info!(device_id = %active.device_id, "Active session installed");
	}

	Ok(())
}
