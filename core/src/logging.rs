//! Tracing subscriber setup

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install a fmt subscriber filtered by `RUST_LOG`, falling back to `default_filter`
///
/// Returns `false` if a global subscriber was already installed.
pub fn init(default_filter: &str) -> bool {
	let filter = EnvFilter::try_from_default_env()
		.or_else(|_| EnvFilter::try_new(default_filter))
		.unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::registry()
		.with(fmt::layer().with_target(false))
		.with(filter)
		.try_init()
		.is_ok()
}
