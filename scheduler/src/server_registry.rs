//! C2: per-origin active-request counters and concurrency caps.

use std::collections::HashMap;

use crate::config::SchedulerConfig;

/// Tracks, per `server_key`, how many requests are currently active against
/// that origin, checked against either a configured override or the
/// process-wide default cap.
#[derive(Debug, Default)]
pub struct ServerRegistry {
	active_counts: HashMap<String, usize>,
}

impl ServerRegistry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// `true` iff admitting `desired` more requests to `server_key` would
	/// not exceed its cap.
	#[must_use]
	pub fn has_open_slot(&self, config: &SchedulerConfig, server_key: &str, desired: usize) -> bool {
		let active = self.active_counts.get(server_key).copied().unwrap_or(0);
		active + desired <= config.cap_for_server(server_key)
	}

	/// Increments the active count for `server_key`.
	pub fn acquire(&mut self, server_key: &str) {
		*self.active_counts.entry(server_key.to_string()).or_insert(0) += 1;
	}

	/// Decrements the active count for `server_key`. A no-op, aside from a
	/// debug assertion, if the count was already zero.
	pub fn release(&mut self, server_key: &str) {
		if let Some(count) = self.active_counts.get_mut(server_key) {
			debug_assert!(*count > 0, "releasing server key '{server_key}' with zero active count");
			*count = count.saturating_sub(1);
			if *count == 0 {
				self.active_counts.remove(server_key);
			}
		}
	}

	/// Active count currently attributed to `server_key`.
	#[must_use]
	pub fn active_count(&self, server_key: &str) -> usize {
		self.active_counts.get(server_key).copied().unwrap_or(0)
	}

	/// Sum of active counts across all server keys. Used by invariant
	/// checks (it must equal the scheduler's global active-list length).
	#[must_use]
	pub fn total_active(&self) -> usize {
		self.active_counts.values().sum()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use rstest::rstest;

	#[rstest]
	#[case::under_cap(3, 1, 1, true)]
	#[case::exactly_at_cap(3, 2, 1, true)]
	#[case::would_exceed_cap(3, 2, 2, false)]
	#[case::already_over_cap(1, 2, 1, false)]
	fn has_open_slot_boundary(#[case] cap: usize, #[case] preloaded: usize, #[case] desired: usize, #[case] expected: bool) {
		let mut config = SchedulerConfig::default();
		config.requests_by_server.insert("s:443".to_string(), cap);
		let mut registry = ServerRegistry::new();
		for _ in 0..preloaded {
			registry.acquire("s:443");
		}
		assert_eq!(registry.has_open_slot(&config, "s:443", desired), expected);
	}

	#[test]
	fn acquire_and_release_round_trip() {
		let mut registry = ServerRegistry::new();
		registry.acquire("api.example.com:443");
		registry.acquire("api.example.com:443");
		assert_eq!(registry.active_count("api.example.com:443"), 2);
		registry.release("api.example.com:443");
		assert_eq!(registry.active_count("api.example.com:443"), 1);
		registry.release("api.example.com:443");
		assert_eq!(registry.active_count("api.example.com:443"), 0);
	}

	#[test]
	fn has_open_slot_respects_override() {
		let mut config = SchedulerConfig::default();
		config.requests_by_server.insert("api.example.com:443".to_string(), 2);
		let mut registry = ServerRegistry::new();
		registry.acquire("api.example.com:443");
		registry.acquire("api.example.com:443");
		assert!(!registry.has_open_slot(&config, "api.example.com:443", 1));
		assert!(registry.has_open_slot(&config, "other.example.com:443", 1));
	}

	#[test]
	fn total_active_sums_across_keys() {
		let mut registry = ServerRegistry::new();
		registry.acquire("a:443");
		registry.acquire("b:443");
		registry.acquire("b:443");
		assert_eq!(registry.total_active(), 3);
	}
}
