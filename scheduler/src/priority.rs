//! C6: the per-tile priority function.
//!
//! Lower composite values sort first (the heap in [`crate::priority_heap`]
//! is a min-heap). The composite is a lexicographic ordering over six
//! sub-priorities, most significant first, packed into the low 51 bits of a
//! `u64` so every distinct input combination round-trips losslessly through
//! `f64` (an `f64` mantissa holds 52 bits exactly) and compares with plain
//! integer semantics rather than base-10 digit arithmetic.

const FOVEATED_FACTOR_BITS: u32 = 12;
const PREFERRED_SORTING_BITS: u32 = 12;
const TREE_DEPTH_BITS: u32 = 24;

const TREE_DEPTH_SHIFT: u32 = 0;
const PROGRESSIVE_FLAG_SHIFT: u32 = TREE_DEPTH_SHIFT + TREE_DEPTH_BITS;
const PREFERRED_SORTING_SHIFT: u32 = PROGRESSIVE_FLAG_SHIFT + 1;
const FOVEATED_FACTOR_SHIFT: u32 = PREFERRED_SORTING_SHIFT + PREFERRED_SORTING_BITS;
const FOVEATED_DEFER_SHIFT: u32 = FOVEATED_FACTOR_SHIFT + FOVEATED_FACTOR_BITS;
const PRELOAD_FLIGHT_SHIFT: u32 = FOVEATED_DEFER_SHIFT + 1;

/// A vanishingly small margin subtracted after normalization so a value of
/// exactly `max` still packs strictly below the sub-priority's top bucket,
/// matching the spec's `clamp(...) - epsilon` normalization.
const EPSILON: f64 = 1e-9;

/// Inputs to the composite priority function, one per candidate tile.
#[derive(Debug, Clone, Copy)]
pub struct PriorityInputs {
	/// `true` when the current scheduling pass is a preload-flight pass
	/// (preload work sorts *after* in-flight work, hence inverted below).
	pub is_preload_flight: bool,
	/// `true` if this tile is outside the foveated cone and should defer.
	pub foveated_deferred: bool,
	/// Normalized angular offset from the view direction, in `[0, 1]`.
	pub foveated_factor: f64,
	/// `true` if the tile passes the progressive-resolution screen-space-error test.
	pub passes_progressive_resolution: bool,
	/// Normalized depth or inverse screen-space error, in `[0, 1]`, depending
	/// on the tileset's refinement mode.
	pub preferred_sorting: f64,
	/// Tree depth normalized against the tileset's observed min/max, in `[0, 1]`.
	pub depth_fraction: f64,
	/// `true` if the tileset prefers leaves, inverting the depth digit.
	pub prefer_leaves: bool,
}

/// A packed composite priority key. Ordered the same as the `u64` it wraps,
/// and convertible to `f64` for storage in [`crate::request::Request::priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PackedPriority(u64);

impl PackedPriority {
	/// Packs `inputs` into a composite key, most-significant sub-priority
	/// first: preload-flight flag, foveated-defer flag, foveated factor,
	/// progressive-resolution flag, preferred sorting, tree depth.
	#[must_use]
	pub fn pack(inputs: &PriorityInputs) -> Self {
		let preload_bit = u64::from(!inputs.is_preload_flight);
		let defer_bit = u64::from(inputs.foveated_deferred);
		let foveated = scale_to_bits(inputs.foveated_factor, FOVEATED_FACTOR_BITS);
		let progressive_bit = u64::from(!inputs.passes_progressive_resolution);
		let preferred = scale_to_bits(inputs.preferred_sorting, PREFERRED_SORTING_BITS);
		let depth = if inputs.prefer_leaves {
			1.0 - inputs.depth_fraction
		} else {
			inputs.depth_fraction
		};
		let depth = scale_to_bits(depth, TREE_DEPTH_BITS);

		let packed = (preload_bit << PRELOAD_FLIGHT_SHIFT)
			| (defer_bit << FOVEATED_DEFER_SHIFT)
			| (foveated << FOVEATED_FACTOR_SHIFT)
			| (progressive_bit << PROGRESSIVE_FLAG_SHIFT)
			| (preferred << PREFERRED_SORTING_SHIFT)
			| (depth << TREE_DEPTH_SHIFT);
		PackedPriority(packed)
	}

	/// Converts this key to an `f64` for use as [`crate::request::Request::priority`].
	///
	/// Exact: the packed key never exceeds 51 bits, well within the 52-bit
	/// mantissa of an `f64`, so this conversion and its inverse agree.
	#[must_use]
	pub fn as_f64(self) -> f64 {
		self.0 as f64
	}
}

/// Normalizes `x` into `[0, 1)` via `clamp((x - min) / (max - min), 0, 1) - epsilon`.
#[must_use]
pub fn normalize(x: f64, min: f64, max: f64) -> f64 {
	if max <= min {
		return 0.0;
	}
	let t = ((x - min) / (max - min)).clamp(0.0, 1.0);
	(t - EPSILON).max(0.0)
}

/// A tile is priority-deferred when it sits outside the foveated cone *and*
/// its (interpolation-relaxed) screen-space error is below the current
/// adjusted threshold.
#[must_use]
pub fn is_foveated_deferred(angular_offset: f64, cone_size: f64, screen_space_error: f64, adjusted_threshold: f64) -> bool {
	angular_offset > cone_size && screen_space_error < adjusted_threshold
}

fn scale_to_bits(normalized: f64, bits: u32) -> u64 {
	let max = ((1u64 << bits) - 1) as f64;
	let clamped = normalized.clamp(0.0, 1.0);
	(clamped * max).round() as u64
}

#[cfg(test)]
mod tests {
	use super::*;

	fn base_inputs() -> PriorityInputs {
		PriorityInputs {
			is_preload_flight: false,
			foveated_deferred: false,
			foveated_factor: 0.0,
			passes_progressive_resolution: true,
			preferred_sorting: 0.0,
			depth_fraction: 0.0,
			prefer_leaves: false,
		}
	}

	#[test]
	fn preload_flight_sorts_before_non_preload() {
		let mut preload = base_inputs();
		preload.is_preload_flight = true;
		let mut normal = base_inputs();
		normal.is_preload_flight = false;

		assert!(PackedPriority::pack(&preload).as_f64() < PackedPriority::pack(&normal).as_f64());
	}

	#[test]
	fn foveated_deferred_sorts_after_non_deferred_when_flags_otherwise_equal() {
		let mut deferred = base_inputs();
		deferred.foveated_deferred = true;
		let non_deferred = base_inputs();

		assert!(PackedPriority::pack(&non_deferred).as_f64() < PackedPriority::pack(&deferred).as_f64());
	}

	#[test]
	fn more_significant_digit_dominates_less_significant() {
		let mut a = base_inputs();
		a.foveated_factor = 0.01;
		a.preferred_sorting = 1.0; // large, but less significant
		let mut b = base_inputs();
		b.foveated_factor = 0.02;
		b.preferred_sorting = 0.0; // small, but more significant digit wins for b anyway here

		// a has smaller foveated_factor (more significant than preferred_sorting),
		// so a must sort before b regardless of preferred_sorting.
		assert!(PackedPriority::pack(&a).as_f64() < PackedPriority::pack(&b).as_f64());
	}

	#[test]
	fn leaf_preference_inverts_depth_digit() {
		let mut shallow = base_inputs();
		shallow.depth_fraction = 0.1;
		shallow.prefer_leaves = true;
		let mut deep = base_inputs();
		deep.depth_fraction = 0.9;
		deep.prefer_leaves = true;

		// with leaf preference, deeper (closer to 1.0) should sort first (lower composite)
		assert!(PackedPriority::pack(&deep).as_f64() < PackedPriority::pack(&shallow).as_f64());
	}

	#[test]
	fn packed_value_fits_f64_mantissa_exactly() {
		let inputs = PriorityInputs {
			is_preload_flight: true,
			foveated_deferred: true,
			foveated_factor: 1.0,
			passes_progressive_resolution: false,
			preferred_sorting: 1.0,
			depth_fraction: 1.0,
			prefer_leaves: false,
		};
		let packed = PackedPriority::pack(&inputs);
		assert!(packed.0 < (1u64 << 52));
		assert_eq!(packed.as_f64() as u64, packed.0);
	}

	#[test]
	fn normalize_clamps_and_subtracts_epsilon() {
		assert!(normalize(5.0, 0.0, 10.0) < 0.5);
		assert_eq!(normalize(-5.0, 0.0, 10.0), 0.0);
		assert!(normalize(50.0, 0.0, 10.0) < 1.0);
	}

	#[test]
	fn deferral_requires_both_conditions() {
		assert!(is_foveated_deferred(1.0, 0.5, 0.1, 0.5));
		assert!(!is_foveated_deferred(0.2, 0.5, 0.1, 0.5));
		assert!(!is_foveated_deferred(1.0, 0.5, 0.9, 0.5));
	}
}
