//! Device linking for Spacedrive accounts
//!
//! Links a new device to an account that is signed in elsewhere: the signed-in device
//! hands over a one-time login token through an out-of-band verified rendezvous
//! channel, then cross-signs the new device once its keys are published.

pub mod adapters;
pub mod config;
pub mod logging;
pub mod service;

pub use config::LinkingConfig;
pub use service::rendezvous::{
	ExistingDevice, LinkState, LinkingError, NewDevice, RendezvousSession, Result,
};
