//! Flush threshold policy.
//!
//! The batch is the magnitude at which a unit's local delta is folded into
//! the shared total. It scales with the number of active units so that the
//! flush rate per unit stays roughly constant as the pool grows:
//!
//! ```text
//! batch = max(min_batch, per_unit × active_units)
//! ```
//!
//! The published value is advisory. Callers read it with a relaxed load and
//! may observe a stale value; that only changes how often flushes happen,
//! never what the counter sums to.

use std::sync::atomic::{AtomicI32, Ordering};

/// Smallest batch ever published.
pub const DEFAULT_MIN_BATCH: i32 = 32;

/// Batch contribution of each active unit.
pub const DEFAULT_PER_UNIT_BATCH: i32 = 2;

/// Computes and publishes the default flush threshold of a pool.
#[derive(Debug)]
pub struct BatchPolicy {
    min_batch: i32,
    per_unit: i32,
    current: AtomicI32,
    /// Largest batch published so far. Accumulators filled under a larger
    /// batch survive a shrink, so drift bounds must use this value.
    ceiling: AtomicI32,
}

impl BatchPolicy {
    /// Creates a policy and publishes the batch for zero active units.
    pub fn new(min_batch: i32, per_unit: i32) -> Self {
        let min_batch = min_batch.max(1);
        Self {
            min_batch,
            per_unit: per_unit.max(0),
            current: AtomicI32::new(min_batch),
            ceiling: AtomicI32::new(min_batch),
        }
    }

    /// Returns the batch for `active_units` without publishing it.
    pub fn compute(&self, active_units: usize) -> i32 {
        let active = i32::try_from(active_units).unwrap_or(i32::MAX);
        self.min_batch.max(self.per_unit.saturating_mul(active))
    }

    /// Recomputes the batch and publishes it. Returns the new value.
    pub fn recompute(&self, active_units: usize) -> i32 {
        let batch = self.compute(active_units);
        self.current.store(batch, Ordering::Relaxed);
        self.ceiling.fetch_max(batch, Ordering::Relaxed);
        batch
    }

    /// Returns the currently published batch.
    #[inline]
    pub fn get(&self) -> i32 {
        self.current.load(Ordering::Relaxed)
    }

    /// Returns the largest batch ever published.
    #[inline]
    pub fn ceiling(&self) -> i32 {
        self.ceiling.load(Ordering::Relaxed)
    }
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BATCH, DEFAULT_PER_UNIT_BATCH)
    }
}
