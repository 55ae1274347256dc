//! Statistics snapshot: counters tracked since the last reset or quiescence.

/// A plain, cloneable snapshot of scheduler activity counters.
///
/// Counters accumulate monotonically until [`Statistics::clear_for_tests`]
/// is called; they are not reset automatically on quiescence (see the
/// crate's design notes on why a periodic reset was rejected). The
/// quiescent-interval debug log line reads this snapshot but does not
/// zero it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
	/// Requests for which `request()`/`schedule()` was called and admission
	/// was not refused (i.e. started immediately, whether bypassing
	/// throttling or admitted directly to a free slot, or inserted into the
	/// heap without evicting itself).
	pub attempted: u64,
	/// Requests currently in the `ACTIVE` state.
	pub active: u64,
	/// Requests cancelled while `ISSUED` (pending in the heap).
	pub cancelled: u64,
	/// Requests cancelled while `ACTIVE`.
	pub cancelled_active: u64,
	/// Requests that transitioned to `FAILED`.
	pub failed: u64,
	/// High-water mark of `active`.
	pub active_ever: u64,
	/// `active` as observed at the end of the previous `update()`.
	pub last_active: u64,
}

impl Statistics {
	/// Zeroes every counter. Exposed for test harnesses that want a clean
	/// slate between scenarios without reconstructing the scheduler.
	pub fn clear_for_tests(&mut self) {
		*self = Statistics::default();
	}

	pub(crate) fn record_attempt(&mut self) {
		self.attempted += 1;
	}

	pub(crate) fn set_active(&mut self, active: u64) {
		self.active = active;
		self.active_ever = self.active_ever.max(active);
	}

	pub(crate) fn record_cancelled_pending(&mut self) {
		self.cancelled += 1;
	}

	pub(crate) fn record_cancelled_active(&mut self) {
		self.cancelled_active += 1;
	}

	pub(crate) fn record_failed(&mut self) {
		self.failed += 1;
	}

	/// `true` exactly when this `update()` observed the active count drop
	/// to zero having been non-zero at the end of the previous one.
	pub(crate) fn just_quiesced(&self, active_now: u64) -> bool {
		self.last_active > 0 && active_now == 0
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn clear_for_tests_zeroes_everything() {
		let mut stats = Statistics {
			attempted: 3,
			active: 1,
			cancelled: 2,
			cancelled_active: 1,
			failed: 1,
			active_ever: 4,
			last_active: 1,
		};
		stats.clear_for_tests();
		assert_eq!(stats, Statistics::default());
	}

	#[test]
	fn active_ever_tracks_high_water_mark() {
		let mut stats = Statistics::default();
		stats.set_active(5);
		stats.set_active(2);
		assert_eq!(stats.active, 2);
		assert_eq!(stats.active_ever, 5);
	}

	#[test]
	fn quiescence_requires_prior_nonzero_active() {
		let mut stats = Statistics::default();
		assert!(!stats.just_quiesced(0));
		stats.last_active = 3;
		assert!(stats.just_quiesced(0));
		assert!(!stats.just_quiesced(1));
	}
}
