use std::time::Duration;

use thiserror::Error;

use super::types::{DeviceId, UserId};

/// Errors that terminate a linking session
#[derive(Error, Debug)]
pub enum LinkingError {
	#[error("Protocol error: '{outcome}' payload is missing required field '{field}'")]
	MissingField {
		outcome: &'static str,
		field: &'static str,
	},

	#[error("Protocol error: {0}")]
	Protocol(String),

	#[error("Unknown device {device_id} for user {user_id}")]
	UnknownDevice { user_id: UserId, device_id: DeviceId },

	#[error("Linking failed: other device reported outcome '{outcome}'")]
	LinkingFailed { outcome: String },

	#[error("No new device to cross-sign")]
	NoDeviceToSign,

	#[error("Device {device_id} did not publish its keys within {waited:?}")]
	DeviceTimeout { device_id: DeviceId, waited: Duration },

	#[error("Key mismatch: {0}")]
	KeyMismatch(#[from] KeyMismatch),

	#[error("New device {device_id} reported no keys and cross-signing is required")]
	CrossSigningUnavailable { device_id: DeviceId },

	#[error("Session is closed ({state})")]
	SessionClosed { state: String },

	#[error("Cannot {operation} while session is {state}")]
	InvalidState {
		operation: &'static str,
		state: String,
	},

	#[error("Channel error: {0}")]
	Channel(String),

	#[error("Login error: {0}")]
	Login(String),

	#[error("Login token request failed: {0}")]
	TokenRequest(String),

	#[error("Storage error: {0}")]
	Storage(String),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Config error: {0}")]
	Config(String),
}

/// Why the stored keys of a device differ from what it reported over the channel
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyMismatch {
	#[error("expected {expected} keys but device has {actual}")]
	Count { expected: usize, actual: usize },

	#[error("key '{key_id}' does not match the reported value")]
	Value { key_id: String },
}

pub type Result<T> = std::result::Result<T, LinkingError>;
