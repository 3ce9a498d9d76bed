//! Error type for counter and pool operations.
//!
//! Only the cold paths can fail: creating a counter, adding or removing a
//! processing unit, and the lifecycle checks performed by
//! [`LeakTracker`](crate::debug::LeakTracker). `update`, `sum`, `read` and
//! `compare` are total on a live counter and never return an error.

use thiserror::Error;

use crate::unit::UnitId;

/// Unified error type for counter operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// The per-unit accumulator storage could not be allocated.
    ///
    /// Nothing is left registered: the caller may simply retry.
    #[error("out of memory allocating {slots} accumulator slots")]
    OutOfMemory {
        /// Number of slots that were requested.
        slots: usize,
    },

    /// Every unit slot of the pool is already active.
    #[error("unit pool exhausted: all {capacity} units are active")]
    PoolExhausted {
        /// Capacity of the pool.
        capacity: usize,
    },

    /// The unit is outside the pool or not currently active.
    #[error("unit {0} is not active in this pool")]
    UnitNotActive(UnitId),

    /// A thread is bound to the unit, so it cannot be removed or entered.
    #[error("unit {0} is bound to a thread")]
    UnitBusy(UnitId),

    /// The calling thread is already bound to a unit of this pool.
    #[error("thread already bound to unit {0} of this pool")]
    AlreadyBound(UnitId),

    /// A lifecycle rule was broken (double destroy, destroy of an unknown
    /// counter). Only detected when a lifecycle hook is installed.
    #[error("counter misuse: {0}")]
    Misuse(String),
}

/// Result type for counter operations.
pub type Result<T> = std::result::Result<T, CounterError>;
