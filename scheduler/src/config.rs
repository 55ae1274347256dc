//! Process-wide scheduler configuration.

use std::collections::HashMap;

use scheduler_macros::context;

/// Tunables for a [`Scheduler`](crate::scheduler::Scheduler) instance.
///
/// There is no hidden global state: a `SchedulerConfig` is constructed
/// explicitly by the embedding application and passed to
/// [`Scheduler::new`](crate::scheduler::Scheduler::new).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	/// Global cap on concurrently active (in-flight) requests.
	pub max_requests: usize,
	/// Per-server cap applied when no entry exists in `requests_by_server`.
	pub max_requests_per_server: usize,
	/// Per-server cap overrides, keyed by `server_key` (see [`crate::url`]).
	pub requests_by_server: HashMap<String, usize>,
	/// Master switch. When `false`, every request starts immediately,
	/// bypassing the priority heap and both concurrency caps.
	pub throttle_requests: bool,
	/// Bound on the number of pending (issued, not-yet-active) requests.
	pub priority_heap_length: usize,
	/// When the active count returns to zero after being non-zero, log a
	/// `debug!`-level summary of the interval's statistics.
	pub log_quiescent_stats: bool,
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		SchedulerConfig {
			max_requests: 50,
			max_requests_per_server: 18,
			requests_by_server: HashMap::new(),
			throttle_requests: true,
			priority_heap_length: 20,
			log_quiescent_stats: true,
		}
	}
}

impl SchedulerConfig {
	/// Returns the defaults from §6 of the scheduler contract.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Checks this configuration for internal consistency.
	///
	/// `max_requests == 0` is accepted: nothing forbids it, and a scheduler
	/// configured that way simply never admits a throttled request (every
	/// `schedule()` call for one heap-inserts and waits for a capacity bump).
	///
	/// # Errors
	///
	/// Returns an error naming the offending field if `priority_heap_length`
	/// is zero, or if a `requests_by_server` key is not a well-formed
	/// `host:port` server key.
	#[context("while validating scheduler configuration")]
	pub fn validate(&self) -> anyhow::Result<()> {
		anyhow::ensure!(
			self.priority_heap_length > 0,
			"priority_heap_length must be greater than zero"
		);
		for key in self.requests_by_server.keys() {
			validate_server_key(key)?;
		}
		Ok(())
	}

	/// Returns the configured cap for `server_key`, falling back to
	/// `max_requests_per_server` when no override is registered.
	#[must_use]
	pub fn cap_for_server(&self, server_key: &str) -> usize {
		self
			.requests_by_server
			.get(server_key)
			.copied()
			.unwrap_or(self.max_requests_per_server)
	}
}

#[context("while validating server-key override '{key}'")]
fn validate_server_key(key: &str) -> anyhow::Result<()> {
	let with_scheme = format!("http://{key}");
	let url = url::Url::parse(&with_scheme)?;
	anyhow::ensure!(
		url.host_str().is_some_and(|h| !h.is_empty()),
		"expected a 'host:port' server key, got '{key}'"
	);
	Ok(())
}
