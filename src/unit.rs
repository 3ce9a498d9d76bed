//! Processing units and their binding to threads.
//!
//! A processing unit is one slot of a [`UnitPool`](crate::pool::UnitPool).
//! Every counter owns one accumulator per slot, and a thread writes to the
//! accumulator of the unit it is bound to:
//!
//! ```text
//!                      ┌──────────────────────────────────┐
//!                      │        Counter accumulators      │
//!                      ├──────────────────────────────────┤
//!   Thread A (unit 0) ─► [Slot 0] i32 (CachePadded)       │
//!   Thread B (unit 1) ─► [Slot 1] i32 (CachePadded)       │
//!        ...           │    ...                           │
//!                      │ [Slot 63] i32 (CachePadded)      │
//!                      └──────────────────────────────────┘
//!                                      │ |local| ≥ batch
//!                                      ▼
//!                              shared total (AtomicI64)
//! ```
//!
//! The binding lives in thread-local storage, one entry per pool. A pool
//! hands each unit to at most one thread at a time, so accumulators need no
//! read-modify-write atomics.

use std::cell::RefCell;
use std::fmt;

/// Maximum number of units a pool can hold.
///
/// Each counter reserves one cache-padded slot per possible unit, so the
/// storage cost is at most 64 cache lines per counter.
pub const MAX_UNITS: usize = 64;

/// Index of a processing unit within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(usize);

impl UnitId {
    /// Creates a unit id from a slot index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the slot index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A set of units, stored as a bitmask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnitSet(u64);

impl UnitSet {
    /// The empty set.
    pub const EMPTY: UnitSet = UnitSet(0);

    /// Creates a set from its raw bitmask.
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Returns the raw bitmask.
    #[inline]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Number of units in the set.
    #[inline]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Returns `true` if no unit is in the set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if `unit` is in the set.
    #[inline]
    pub const fn contains(self, unit: UnitId) -> bool {
        unit.0 < MAX_UNITS && self.0 & (1 << unit.0) != 0
    }

    /// Iterates over the units in ascending order.
    pub fn iter(self) -> UnitSetIter {
        UnitSetIter(self.0)
    }
}

impl IntoIterator for UnitSet {
    type Item = UnitId;
    type IntoIter = UnitSetIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the units of a [`UnitSet`].
#[derive(Debug, Clone)]
pub struct UnitSetIter(u64);

impl Iterator for UnitSetIter {
    type Item = UnitId;

    #[inline]
    fn next(&mut self) -> Option<UnitId> {
        if self.0 == 0 {
            return None;
        }
        let index = self.0.trailing_zeros() as usize;
        self.0 &= self.0 - 1;
        Some(UnitId(index))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.0.count_ones() as usize;
        (n, Some(n))
    }
}

impl ExactSizeIterator for UnitSetIter {}

/// Which pool and unit the current thread is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Binding {
    pub(crate) pool: u64,
    pub(crate) unit: UnitId,
}

thread_local! {
    /// At most one entry per pool.
    static BINDINGS: RefCell<Vec<Binding>> = const { RefCell::new(Vec::new()) };
}

/// Binds the current thread to `binding.unit` of `binding.pool`.
///
/// Fails with the unit already bound if the thread holds a binding in that
/// pool.
pub(crate) fn bind(binding: Binding) -> Result<(), UnitId> {
    BINDINGS.with(|cell| {
        let mut bindings = cell.borrow_mut();
        if let Some(existing) = bindings.iter().find(|b| b.pool == binding.pool) {
            return Err(existing.unit);
        }
        bindings.push(binding);
        Ok(())
    })
}

/// Removes `binding` from the current thread, whatever was bound after it.
pub(crate) fn unbind(binding: Binding) {
    BINDINGS.with(|cell| cell.borrow_mut().retain(|b| *b != binding));
}

/// Returns the unit the current thread is bound to in `pool`, if any.
#[inline]
pub(crate) fn current_unit(pool: u64) -> Option<UnitId> {
    BINDINGS.with(|cell| {
        cell.borrow()
            .iter()
            .find(|binding| binding.pool == pool)
            .map(|binding| binding.unit)
    })
}
