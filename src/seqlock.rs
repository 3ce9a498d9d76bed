//! Flush sequence word used by the consistent sum.
//!
//! A flush moves a value between two locations (a unit accumulator and the
//! shared total), so a reader walking both can observe it half done. Flushes
//! are bracketed on a single `AtomicU64`:
//!
//! ```text
//!  63                               16 15             0
//! ┌───────────────────────────────────┬───────────────┐
//! │  generation (completed flushes)   │  in progress  │
//! └───────────────────────────────────┴───────────────┘
//! ```
//!
//! `begin` adds one to the in-progress field, `end` subtracts it and bumps the
//! generation in the same read-modify-write, so the generation changes exactly
//! once per flush. Several units may flush at once; a reader accepts its
//! snapshot only if it started with nothing in progress and the whole word is
//! unchanged when it finishes.

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_utils::Backoff;

const IN_PROGRESS_BITS: u32 = 16;
const IN_PROGRESS_MASK: u64 = (1 << IN_PROGRESS_BITS) - 1;
const GENERATION: u64 = 1 << IN_PROGRESS_BITS;

/// Multi-writer sequence word guarding flushes of one counter.
#[derive(Debug, Default)]
pub(crate) struct FlushSequence(AtomicU64);

impl FlushSequence {
    pub(crate) const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Runs `flush` inside a begin/end bracket.
    #[inline]
    pub(crate) fn flush<R>(&self, flush: impl FnOnce() -> R) -> R {
        self.0.fetch_add(1, Ordering::AcqRel);
        let result = flush();
        self.0.fetch_add(GENERATION - 1, Ordering::AcqRel);
        result
    }

    /// Waits until no flush is in progress and returns the word to validate
    /// against with [`FlushSequence::changed_since`].
    #[inline]
    pub(crate) fn read_begin(&self) -> u64 {
        let backoff = Backoff::new();
        loop {
            let word = self.0.load(Ordering::Acquire);
            if word & IN_PROGRESS_MASK == 0 {
                return word;
            }
            backoff.snooze();
        }
    }

    /// Returns `true` if a flush started or completed since `start`.
    ///
    /// The data reads made between `read_begin` and this call must use
    /// `Acquire` so that this load is not hoisted above them.
    #[inline]
    pub(crate) fn changed_since(&self, start: u64) -> bool {
        self.0.load(Ordering::Acquire) != start
    }

    /// Number of completed flushes (modulo 2^48).
    pub(crate) fn generation(&self) -> u64 {
        self.0.load(Ordering::Acquire) >> IN_PROGRESS_BITS
    }

    /// Number of flushes currently in progress.
    #[cfg(test)]
    pub(crate) fn in_progress(&self) -> u64 {
        self.0.load(Ordering::Acquire) & IN_PROGRESS_MASK
    }
}
