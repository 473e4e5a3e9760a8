//! Comparison of a device's stored keys with the keys it reported over the channel

use super::{
	error::KeyMismatch,
	types::{DeviceInfo, DeviceKeys},
};

/// Check that `stored` holds exactly the keys in `reported`
///
/// The reported keys arrived over the out-of-band-verified channel, the stored ones via
/// the homeserver. Values must be byte-for-byte equal.
pub fn check_reported_keys(
	stored: &DeviceInfo,
	reported: &DeviceKeys,
) -> Result<(), KeyMismatch> {
	if stored.keys.len() != reported.len() {
		return Err(KeyMismatch::Count {
			expected: reported.len(),
			actual: stored.keys.len(),
		});
	}

	for (key_id, reported_value) in reported {
		match stored.keys.get(key_id) {
			Some(stored_value) if stored_value == reported_value => {}
			_ => {
				return Err(KeyMismatch::Value {
					key_id: key_id.clone(),
				})
			}
		}
	}

	Ok(())
}
