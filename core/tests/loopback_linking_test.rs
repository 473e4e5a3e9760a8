//! Both roles linked end to end over an in-process channel

mod common;

use std::{sync::Arc, time::Duration};

use common::*;
use pretty_assertions::assert_eq;
use sd_rendezvous::{
	adapters::{MemoryChannel, MemoryDeviceStore, MemoryHomeserver},
	service::rendezvous::CancellationReason,
	ExistingDevice, LinkState, NewDevice, RendezvousSession,
};

struct Devices {
	homeserver: Arc<MemoryHomeserver>,
	existing_store: Arc<MemoryDeviceStore>,
	new_store: Arc<MemoryDeviceStore>,
	existing: RendezvousSession<ExistingDevice>,
	new_device: RendezvousSession<NewDevice>,
}

/// Pair two devices and bring both to the point where they show confirmation digits
async fn paired(publish_to_existing: bool) -> Devices {
	let homeserver = Arc::new(MemoryHomeserver::new(HOMESERVER, USER_ID));
	let existing_store = Arc::new(MemoryDeviceStore::new());
	let new_store = Arc::new(MemoryDeviceStore::new());

	let mut stores = vec![new_store.clone()];
	if publish_to_existing {
		stores.push(existing_store.clone());
	}
	let lifecycle = Arc::new(PublishOnLogin {
		keys: keys(&[("ed25519", "K1"), ("curve25519", "C1")]),
		stores,
	});

	let (existing_channel, new_channel) = MemoryChannel::pair();
	let mut existing = RendezvousSession::new(
		Box::new(existing_channel),
		ExistingDevice::new(homeserver.clone(), existing_store.clone()),
	);
	let mut new_device = RendezvousSession::new(
		Box::new(new_channel),
		NewDevice::new(homeserver.clone())
			.with_key_store(new_store.clone())
			.with_session_lifecycle(lifecycle),
	);

	existing.start_on_existing_device().await.unwrap();
	let digits = new_device.connect().await.unwrap();
	assert_eq!(existing.confirmation_digits(), Some(&digits));

	Devices {
		homeserver,
		existing_store,
		new_store,
		existing,
		new_device,
	}
}

#[tokio::test]
async fn new_device_is_signed_in_and_cross_signed() {
	let Devices {
		homeserver,
		existing_store,
		new_store,
		mut existing,
		mut new_device,
	} = paired(true).await;

	let (confirmed, completed) = tokio::join!(
		existing.confirm_login_on_existing_device(),
		new_device.complete_on_new_device()
	);
	let device_id = confirmed.unwrap().unwrap();
	let credentials = completed.unwrap().unwrap();

	assert_eq!(device_id, credentials.device_id);
	assert_eq!(credentials.user_id, USER_ID);
	assert_eq!(homeserver.outstanding_tokens(), 0);
	assert_eq!(
		existing.new_device_keys(),
		Some(&keys(&[("ed25519", "K1"), ("curve25519", "C1")]))
	);

	let record = existing.cross_sign().await.unwrap().unwrap();
	assert!(record.cross_signed);
	assert_eq!(existing_store.verification(USER_ID, &device_id), Some(record));
	assert_eq!(new_store.verification(USER_ID, &device_id), None);

	assert_eq!(existing.state(), &LinkState::Completed);
	assert_eq!(new_device.state(), &LinkState::Completed);
}

#[tokio::test(start_paused = true)]
async fn keys_arriving_late_are_picked_up_after_the_wait() {
	let Devices {
		existing_store,
		mut existing,
		mut new_device,
		..
	} = paired(false).await;

	let (confirmed, completed) = tokio::join!(
		existing.confirm_login_on_existing_device(),
		new_device.complete_on_new_device()
	);
	let device_id = confirmed.unwrap().unwrap();
	completed.unwrap().unwrap();

	let published = existing.new_device_keys().cloned().unwrap();
	let store = existing_store.clone();
	let publish_id = device_id.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_secs(2)).await;
		store.publish_device(USER_ID, &publish_id, published);
	});

	let record = existing.cross_sign().await.unwrap().unwrap();
	assert_eq!(record.device_id, device_id);
	assert!(existing_store.verification(USER_ID, &device_id).is_some());
}

#[tokio::test]
async fn declined_login_ends_both_sides() {
	let Devices {
		homeserver,
		mut existing,
		mut new_device,
		..
	} = paired(true).await;

	existing.decline_login_on_existing_device().await.unwrap();
	let completed = new_device.complete_on_new_device().await.unwrap();

	assert_eq!(completed, None);
	assert_eq!(existing.state(), &LinkState::Declined);
	assert_eq!(new_device.state(), &LinkState::Declined);
	assert_eq!(homeserver.outstanding_tokens(), 0);
	assert_eq!(existing.new_device_id(), None);
}

#[tokio::test]
async fn new_device_cancelling_abandons_the_existing_side() {
	let Devices {
		homeserver,
		mut existing,
		mut new_device,
		..
	} = paired(true).await;

	let (confirmed, cancelled) = tokio::join!(
		existing.confirm_login_on_existing_device(),
		new_device.user_cancelled()
	);
	cancelled.unwrap();

	assert_eq!(confirmed.unwrap(), None);
	assert_eq!(existing.state(), &LinkState::Abandoned);
	assert_eq!(
		new_device.state(),
		&LinkState::Cancelled {
			reason: CancellationReason::UserCancelled
		}
	);
	// The offered token was never redeemed
	assert_eq!(homeserver.outstanding_tokens(), 1);
}
