use crate::error::{Result, ZebraError};

/// Share of the arena that quarantined slabs may occupy, always in `[0, 1]`.
///
/// The quarantine invariant is `quarantined * slab_size <= ratio * heap_size`.
/// With `heap_size = slab_count * slab_size` it reduces to comparing slab counts.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct QuarantineRatio(f32);

impl QuarantineRatio {
    /// Validate `ratio`. NaN and values outside `[0, 1]` are rejected rather
    /// than clamped.
    pub fn new(ratio: f32) -> Result<Self> {
        if (0.0..=1.0).contains(&ratio) {
            Ok(QuarantineRatio(ratio))
        } else {
            Err(ZebraError::ConfigurationOutOfRange { ratio })
        }
    }

    #[inline]
    pub fn get(self) -> f32 {
        self.0
    }

    /// True if `quarantined` slabs out of `slab_count` respect the ratio.
    /// The bound is inclusive.
    #[inline]
    pub fn admits(self, quarantined: usize, slab_count: usize) -> bool {
        quarantined <= self.budget_slabs(slab_count)
    }

    /// Largest number of slabs the quarantine may hold.
    ///
    /// The product stays in `f32`. Widening first would expose the binary
    /// error of ratios like 0.7 (0.699999988) and floor `0.7 * 10` to 6; in
    /// `f32` the product rounds back to 7.
    #[inline]
    pub fn budget_slabs(self, slab_count: usize) -> usize {
        (self.0 * slab_count as f32).floor() as usize
    }
}
