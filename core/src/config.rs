//! Linking configuration

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::service::rendezvous::{LinkingError, Result};

/// Default wait for a new device's keys to reach key storage
pub const DEFAULT_CROSS_SIGN_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkingConfig {
	/// How long the existing device waits once for the new device's keys
	pub cross_sign_timeout_ms: u64,

	/// Refuse to finish linking a device that reported no identity keys
	pub require_cross_signing: bool,

	/// Tracing filter used when `RUST_LOG` is not set
	pub log_filter: String,
}

impl Default for LinkingConfig {
	fn default() -> Self {
		Self {
			cross_sign_timeout_ms: DEFAULT_CROSS_SIGN_TIMEOUT_MS,
			require_cross_signing: false,
			log_filter: "info".to_string(),
		}
	}
}

impl LinkingConfig {
	pub fn cross_sign_timeout(&self) -> Duration {
		Duration::from_millis(self.cross_sign_timeout_ms)
	}

	pub fn from_toml_str(contents: &str) -> Result<Self> {
		toml::from_str(contents)
			.map_err(|e| LinkingError::Config(format!("Failed to parse config: {}", e)))
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let contents = std::fs::read_to_string(path).map_err(|e| {
			LinkingError::Config(format!("Failed to read {}: {}", path.display(), e))
		})?;
		Self::from_toml_str(&contents)
	}

	pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
		let path = path.as_ref();
		let contents = toml::to_string_pretty(self)
			.map_err(|e| LinkingError::Config(format!("Failed to serialize config: {}", e)))?;
		std::fs::write(path, contents).map_err(|e| {
			LinkingError::Config(format!("Failed to write {}: {}", path.display(), e))
		})
	}
}
