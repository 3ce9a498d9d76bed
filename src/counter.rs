//! Batched per-unit counter.
//!
//! This module provides [`Counter`], a signed 64-bit counter whose updates
//! are accumulated in a small per-unit delta and only folded ("flushed") into
//! the shared total once that delta reaches the batch threshold.
//!
//! # Design
//!
//! Each counter holds:
//!
//! - one cache-padded `i32` accumulator per unit slot of its pool,
//! - a shared `AtomicI64` total, updated once per flush,
//! - a fallback `AtomicI64` total that absorbs updates while a sum runs,
//! - a flush sequence word and a count of sums in flight.
//!
//! ```text
//!   update(delta) ──► active sums? ──yes──► fallback += delta
//!                          │ no
//!                          ▼
//!                   local += delta ──|local| ≥ batch──► shared += local
//!                                                       local  = 0
//!                                                       sequence bumped
//! ```
//!
//! Reads come in two flavours:
//!
//! - [`Counter::read`] returns the shared total in O(1). It lags the exact
//!   value by at most `(batch - 1) × active units`.
//! - [`Counter::sum`] walks every active unit under a seqlock-style retry and
//!   returns a value that was the exact count at some instant during the call.
//!
//! [`Counter::compare`] uses the drift bound to answer from `read` whenever
//! the comparand is far enough away, and only falls back to `sum` otherwise.

use std::cmp::Ordering as CmpOrdering;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_utils::{Backoff, CachePadded};
use tracing::warn;

use crate::error::{CounterError, Result};
use crate::observable::Observable;
use crate::pool::{Drain, UnitPool};
use crate::seqlock::FlushSequence;
use crate::unit::{self, UnitId};

/// Identifier of a counter within its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CounterId(u64);

impl CounterId {
    /// Creates a counter id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Storage owned by one counter and shared with the pool registry.
struct CounterState {
    shared: CachePadded<AtomicI64>,
    fallback: CachePadded<AtomicI64>,
    sequence: CachePadded<FlushSequence>,
    active_sums: CachePadded<AtomicUsize>,
    slots: Box<[CachePadded<AtomicI32>]>,
}

impl CounterState {
    fn allocate(slots: usize, initial: i64) -> Result<Self> {
        let mut storage = Vec::new();
        storage
            .try_reserve_exact(slots)
            .map_err(|_| CounterError::OutOfMemory { slots })?;
        storage.extend((0..slots).map(|_| CachePadded::new(AtomicI32::new(0))));

        Ok(Self {
            shared: CachePadded::new(AtomicI64::new(initial)),
            fallback: CachePadded::new(AtomicI64::new(0)),
            sequence: CachePadded::new(FlushSequence::new()),
            active_sums: CachePadded::new(AtomicUsize::new(0)),
            slots: storage.into_boxed_slice(),
        })
    }

    /// Adds `delta` to the accumulator of `unit`, flushing past the batch.
    ///
    /// Only the thread bound to `unit` writes its slot, so a plain load and
    /// store is enough.
    #[inline]
    fn add_local(&self, unit: UnitId, delta: i64, batch: i32) {
        let slot = &self.slots[unit.index()];
        let local = i64::from(slot.load(Ordering::Relaxed)).wrapping_add(delta);
        if batch <= 0 || local.unsigned_abs() >= batch as u64 {
            self.sequence.flush(|| {
                self.shared.fetch_add(local, Ordering::AcqRel);
                slot.store(0, Ordering::Release);
            });
        } else {
            // |local| < batch <= i32::MAX
            slot.store(local as i32, Ordering::Release);
        }
    }

    /// Adds `delta` to the fallback total while a sum is in flight.
    #[inline]
    fn add_fallback(&self, delta: i64) {
        self.fallback.fetch_add(delta, Ordering::SeqCst);
        // The last sum may have left between the routing check and the add.
        if self.active_sums.load(Ordering::SeqCst) == 0 {
            self.fold_fallback();
        }
    }

    /// Moves the fallback total into the shared total.
    ///
    /// Pairs with [`CounterState::add_fallback`]: both sides publish with
    /// `SeqCst` and then load the other side's word with `SeqCst`, so at
    /// least one of them sees the pending delta.
    fn fold_fallback(&self) {
        if self.fallback.load(Ordering::SeqCst) == 0 {
            return;
        }
        self.sequence.flush(|| {
            let pending = self.fallback.swap(0, Ordering::SeqCst);
            self.shared.fetch_add(pending, Ordering::AcqRel);
        });
    }
}

impl Drain for CounterState {
    fn drain_unit(&self, unit: UnitId) -> i64 {
        let Some(slot) = self.slots.get(unit.index()) else {
            return 0;
        };
        self.sequence.flush(|| {
            let pending = i64::from(slot.swap(0, Ordering::AcqRel));
            self.shared.fetch_add(pending, Ordering::AcqRel);
            pending
        })
    }
}

/// A batched signed counter.
///
/// Share it between threads with `Arc<Counter>`. Threads bound to a unit of
/// the counter's pool (see [`UnitPool::enter`]) accumulate locally; other
/// threads add straight into the shared total.
///
/// # Examples
///
/// ```rust
/// use percount::counter::Counter;
/// use percount::pool::UnitPool;
///
/// let pool = UnitPool::new().into_shared();
/// let counter = Counter::new(&pool, 100).unwrap().with_name("free_blocks");
///
/// let _unit = pool.enter().unwrap();
/// counter.update(-10, 32);
///
/// // Still pending in this unit's accumulator.
/// assert_eq!(counter.read(), 100);
/// assert_eq!(counter.local_value(), -10);
/// assert_eq!(counter.sum(), 90);
///
/// // Crossing the batch flushes into the shared total.
/// counter.update(-30, 32);
/// assert_eq!(counter.read(), 60);
/// assert_eq!(counter.sum(), 60);
/// ```
pub struct Counter {
    name: &'static str,
    id: CounterId,
    pool: Arc<UnitPool>,
    state: Arc<CounterState>,
}

impl Counter {
    /// Creates a counter holding `initial`, registered with `pool`.
    ///
    /// Allocates one accumulator per unit slot of the pool. Only that
    /// accumulator storage is allocated fallibly: if it fails the call
    /// returns [`CounterError::OutOfMemory`] and nothing is registered. The
    /// small fixed-size header is allocated like any other `Arc`.
    pub fn new(pool: &Arc<UnitPool>, initial: i64) -> Result<Self> {
        Self::with_slots(pool, pool.capacity(), initial)
    }

    fn with_slots(pool: &Arc<UnitPool>, slots: usize, initial: i64) -> Result<Self> {
        let state = match CounterState::allocate(slots, initial) {
            Ok(state) => Arc::new(state),
            Err(err) => {
                warn!(%err, "counter allocation failed");
                return Err(err);
            }
        };

        let weak = Arc::downgrade(&state);
        let drain: Weak<dyn Drain> = weak;
        let id = pool.subscribe(drain);
        if let Some(hook) = pool.hook() {
            hook.activate(id, "");
        }

        Ok(Self {
            name: "",
            id,
            pool: Arc::clone(pool),
            state,
        })
    }

    /// Sets the name of this counter, returning `self` for method chaining.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        if let Some(hook) = self.pool.hook() {
            hook.rename(self.id, name);
        }
        self
    }

    /// Returns the id of this counter within its pool.
    pub fn id(&self) -> CounterId {
        self.id
    }

    /// Returns the pool this counter belongs to.
    pub fn pool(&self) -> &Arc<UnitPool> {
        &self.pool
    }

    /// Destroys the counter: unregisters it from the pool and releases its
    /// storage. Equivalent to dropping it.
    pub fn destroy(self) {
        drop(self)
    }

    /// Sets the counter to `value` and clears every accumulator.
    ///
    /// Not safe against concurrent updates: callers must ensure no other
    /// thread is updating or summing this counter.
    pub fn set(&self, value: i64) {
        let state = &*self.state;
        state.sequence.flush(|| {
            for slot in state.slots.iter() {
                slot.store(0, Ordering::Release);
            }
            state.shared.store(value, Ordering::Release);
            state.fallback.store(0, Ordering::Release);
        });
    }

    /// Adds `delta`, flushing the local accumulator once it reaches `batch`.
    ///
    /// A `batch` of zero or less flushes on every update.
    #[inline]
    pub fn update(&self, delta: i64, batch: i32) {
        let state = &*self.state;
        if state.active_sums.load(Ordering::Acquire) > 0 {
            state.add_fallback(delta);
            return;
        }
        match unit::current_unit(self.pool.id()) {
            Some(unit) => state.add_local(unit, delta, batch),
            None => {
                state.shared.fetch_add(delta, Ordering::AcqRel);
            }
        }
    }

    /// Adds `delta` using the pool's default batch.
    #[inline]
    pub fn add(&self, delta: i64) {
        self.update(delta, self.pool.default_batch());
    }

    /// Subtracts `delta` using the pool's default batch.
    #[inline]
    pub fn sub(&self, delta: i64) {
        self.update(delta.wrapping_neg(), self.pool.default_batch());
    }

    /// Adds one.
    #[inline]
    pub fn inc(&self) {
        self.add(1);
    }

    /// Subtracts one.
    #[inline]
    pub fn dec(&self) {
        self.add(-1);
    }

    /// Returns the exact value at some instant during the call.
    ///
    /// Costs time proportional to the number of active units and retries
    /// while flushes race with the walk.
    pub fn sum(&self) -> i64 {
        let state = &*self.state;
        state.active_sums.fetch_add(1, Ordering::SeqCst);

        let backoff = Backoff::new();
        let total = loop {
            let start = state.sequence.read_begin();
            let mut total = state.shared.load(Ordering::Acquire);
            for unit in self.pool.active_units() {
                if let Some(slot) = state.slots.get(unit.index()) {
                    total = total.wrapping_add(i64::from(slot.load(Ordering::Acquire)));
                }
            }
            total = total.wrapping_add(state.fallback.load(Ordering::Acquire));
            if !state.sequence.changed_since(start) {
                break total;
            }
            backoff.spin();
        };

        if state.active_sums.fetch_sub(1, Ordering::SeqCst) == 1 {
            state.fold_fallback();
        }
        total
    }

    /// Like [`Counter::sum`], clamped at zero.
    pub fn sum_positive(&self) -> i64 {
        self.sum().max(0)
    }

    /// Returns the shared total without visiting the accumulators.
    #[inline]
    pub fn read(&self) -> i64 {
        self.state.shared.load(Ordering::Relaxed)
    }

    /// Like [`Counter::read`], clamped at zero.
    ///
    /// The approximate value can dip below zero for a counter whose exact
    /// value never does.
    #[inline]
    pub fn read_positive(&self) -> i64 {
        self.read().max(0)
    }

    /// Compares the counter with `rhs` from the approximate value alone.
    ///
    /// Returns `None` when `rhs` is within the drift bound
    /// `batch × active units` and only an exact sum can decide.
    pub fn try_compare_approx(&self, rhs: i64, batch: i32) -> Option<CmpOrdering> {
        let approx = self.read();
        let batch = batch.max(self.pool.batch_ceiling()).unsigned_abs();
        let bound = u64::from(batch).saturating_mul(self.pool.active_count() as u64);
        (approx.abs_diff(rhs) > bound).then(|| approx.cmp(&rhs))
    }

    /// Compares the counter with `rhs`.
    ///
    /// `batch` must be at least the batch the updates were made with.
    pub fn compare(&self, rhs: i64, batch: i32) -> CmpOrdering {
        self.try_compare_approx(rhs, batch)
            .unwrap_or_else(|| self.sum().cmp(&rhs))
    }

    /// Compares the counter with `rhs` using the pool's default batch.
    pub fn compare_default(&self, rhs: i64) -> CmpOrdering {
        self.compare(rhs, self.pool.default_batch())
    }

    /// Returns the pending delta of the current thread's unit.
    ///
    /// Zero if the thread is not bound to a unit of this counter's pool.
    pub fn local_value(&self) -> i32 {
        unit::current_unit(self.pool.id())
            .and_then(|unit| self.state.slots.get(unit.index()))
            .map_or(0, |slot| slot.load(Ordering::Relaxed))
    }

    /// Number of flushes performed on this counter (modulo 2^48).
    pub fn flushes(&self) -> u64 {
        self.state.sequence.generation()
    }
}

impl Observable for Counter {
    fn name(&self) -> &str {
        self.name
    }

    fn value(&self) -> i64 {
        self.sum()
    }

    fn approximate(&self) -> i64 {
        self.read()
    }
}

impl Drop for Counter {
    fn drop(&mut self) {
        if let Some(hook) = self.pool.hook() {
            hook.deactivate(self.id);
        }
        self.pool.unsubscribe(self.id);
    }
}

impl Debug for Counter {
    /// Formats the counter showing its totals and non-zero accumulators.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = &*self.state;
        write!(
            f,
            "{}{{ shared:{} fallback:{}",
            self.name,
            state.shared.load(Ordering::Relaxed),
            state.fallback.load(Ordering::Relaxed)
        )?;
        for (i, slot) in state.slots.iter().enumerate() {
            let val = slot.load(Ordering::Relaxed);
            if val != 0 {
                write!(f, " [{i}]:{val}")?;
            }
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::debug::LeakTracker;
    use crate::pool::{PoolConfig, PoolEvent};

    fn pool() -> Arc<UnitPool> {
        UnitPool::new().into_shared()
    }

    #[test]
    fn test_new() {
        let pool = pool();
        let counter = Counter::new(&pool, 42).unwrap();
        assert_eq!(counter.read(), 42);
        assert_eq!(counter.sum(), 42);
        assert_eq!(pool.counters(), 1);
    }

    #[test]
    fn test_update_below_batch_stays_local() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let _unit = pool.enter().unwrap();

        counter.update(10, 32);
        assert_eq!(counter.local_value(), 10);
        assert_eq!(counter.read(), 0);
        assert_eq!(counter.sum(), 10);
        assert_eq!(counter.flushes(), 0);
    }

    #[test]
    fn test_update_at_batch_flushes() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let _unit = pool.enter().unwrap();

        counter.update(32, 32);
        assert_eq!(counter.local_value(), 0);
        assert_eq!(counter.read(), 32);
        assert_eq!(counter.flushes(), 1);
    }

    #[test]
    fn test_negative_flush() {
        let pool = pool();
        let counter = Counter::new(&pool, 100).unwrap();
        let _unit = pool.enter().unwrap();

        counter.update(-50, 32);
        assert_eq!(counter.local_value(), 0);
        assert_eq!(counter.read(), 50);
        assert_eq!(counter.sum(), 50);
    }

    #[test]
    fn test_accumulates_then_flushes() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let _unit = pool.enter().unwrap();

        for _ in 0..31 {
            counter.update(1, 32);
        }
        assert_eq!(counter.local_value(), 31);
        assert_eq!(counter.read(), 0);
        counter.update(1, 32);
        assert_eq!(counter.local_value(), 0);
        assert_eq!(counter.read(), 32);
        assert_eq!(counter.flushes(), 1);
    }

    #[test]
    fn test_zero_batch_flushes_every_update() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let _unit = pool.enter().unwrap();

        counter.update(1, 0);
        counter.update(1, 0);
        assert_eq!(counter.read(), 2);
        assert_eq!(counter.flushes(), 2);
    }

    #[test]
    fn test_unbound_thread_updates_shared() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        counter.update(5, 32);
        assert_eq!(counter.read(), 5);
        assert_eq!(counter.local_value(), 0);
        assert_eq!(counter.flushes(), 0);
    }

    #[test]
    fn test_add_sub_inc_dec() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let _unit = pool.enter().unwrap();

        counter.add(10);
        counter.sub(3);
        counter.inc();
        counter.dec();
        counter.dec();
        assert_eq!(counter.sum(), 6);
        assert_eq!(counter.local_value(), 6);
    }

    #[test]
    fn test_four_units_flush_immediately() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let entered = std::sync::Barrier::new(4);
        let updated = std::sync::Barrier::new(4);

        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let _unit = pool.enter().unwrap();
                    entered.wait();
                    assert_eq!(pool.active_count(), 4);
                    counter.update(32, 32);
                    assert_eq!(counter.local_value(), 0);
                    updated.wait();
                });
            }
        });

        assert_eq!(counter.read(), 128);
        assert_eq!(counter.sum(), 128);
        assert_eq!(counter.flushes(), 4);
    }

    #[test]
    fn test_second_enter_keeps_updates_visible() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let outer = pool.enter().unwrap();
        assert!(pool.enter().is_err());
        drop(outer);

        counter.update(10, 32);
        assert_eq!(counter.local_value(), 0);
        assert_eq!(counter.read(), 10);
        assert_eq!(counter.sum(), 10);
    }

    #[test]
    fn test_out_of_order_drop_across_pools() {
        let first = pool();
        let second = pool();
        let a = Counter::new(&first, 0).unwrap();
        let b = Counter::new(&second, 0).unwrap();

        let outer = first.enter().unwrap();
        let inner = second.enter().unwrap();
        a.update(3, 32);
        b.update(4, 32);
        drop(outer);
        drop(inner);

        a.update(10, 32);
        b.update(20, 32);
        assert_eq!(a.local_value(), 0);
        assert_eq!(b.local_value(), 0);
        assert_eq!(a.sum(), 13);
        assert_eq!(b.sum(), 24);
    }

    #[test]
    fn test_platform_removal_of_bound_unit_refused() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let guard = pool.enter().unwrap();
        counter.update(10, 32);

        assert_eq!(
            pool.notify(PoolEvent::UnitRemoved(guard.unit())),
            Err(CounterError::UnitBusy(guard.unit()))
        );
        counter.update(5, 32);
        assert_eq!(counter.sum(), 15);
        drop(guard);
        assert_eq!(counter.read(), 15);
        assert_eq!(counter.sum(), 15);
    }

    #[test]
    fn test_platform_added_unit_holds_deltas() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let unit = UnitId::new(7);
        pool.notify(PoolEvent::UnitAdded(unit)).unwrap();

        {
            let _unit = pool.enter_unit(unit).unwrap();
            counter.update(9, 32);
            assert_eq!(counter.local_value(), 9);
        }
        // Still pending in the unit, which the platform keeps active.
        assert_eq!(counter.read(), 0);
        assert_eq!(counter.sum(), 9);

        pool.notify(PoolEvent::UnitRemoved(unit)).unwrap();
        assert_eq!(counter.read(), 9);
        assert_eq!(counter.sum(), 9);
    }

    #[test]
    fn test_set() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let _unit = pool.enter().unwrap();

        counter.update(7, 32);
        counter.set(-3);
        assert_eq!(counter.local_value(), 0);
        assert_eq!(counter.read(), -3);
        assert_eq!(counter.sum(), -3);
    }

    #[test]
    fn test_set_clears_fallback() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        counter.state.fallback.store(9, Ordering::SeqCst);
        counter.set(1);
        assert_eq!(counter.sum(), 1);
    }

    #[test]
    fn test_read_positive() {
        let pool = pool();
        let counter = Counter::new(&pool, -5).unwrap();
        assert_eq!(counter.read(), -5);
        assert_eq!(counter.read_positive(), 0);
        assert_eq!(counter.sum_positive(), 0);
        counter.set(5);
        assert_eq!(counter.read_positive(), 5);
        assert_eq!(counter.sum_positive(), 5);
    }

    #[test]
    fn test_update_routed_to_fallback_during_sum() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let _unit = pool.enter().unwrap();
        let state = &counter.state;

        state.active_sums.fetch_add(1, Ordering::SeqCst);
        counter.update(5, 32);
        assert_eq!(counter.local_value(), 0);
        assert_eq!(state.fallback.load(Ordering::SeqCst), 5);
        // Not the last sum out: the fallback stays put.
        assert_eq!(counter.sum(), 5);
        assert_eq!(state.fallback.load(Ordering::SeqCst), 5);
        assert_eq!(counter.read(), 0);

        state.active_sums.fetch_sub(1, Ordering::SeqCst);
        assert_eq!(counter.sum(), 5);
        assert_eq!(state.fallback.load(Ordering::SeqCst), 0);
        assert_eq!(counter.read(), 5);
    }

    #[test]
    fn test_late_fallback_update_folds_itself() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        counter.state.add_fallback(4);
        assert_eq!(counter.state.fallback.load(Ordering::SeqCst), 0);
        assert_eq!(counter.read(), 4);
    }

    #[test]
    fn test_drain_on_unit_exit() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        {
            let _unit = pool.enter().unwrap();
            counter.update(10, 32);
            assert_eq!(counter.read(), 0);
        }
        assert_eq!(pool.active_count(), 0);
        assert_eq!(counter.read(), 10);
        assert_eq!(counter.sum(), 10);
    }

    #[test]
    fn test_fallback_empty_at_quiescence() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let done = std::sync::atomic::AtomicBool::new(false);

        std::thread::scope(|s| {
            s.spawn(|| {
                while !done.load(Ordering::Relaxed) {
                    counter.sum();
                }
            });
            let writers: Vec<_> = (0..4)
                .map(|_| {
                    s.spawn(|| {
                        let _unit = pool.enter().unwrap();
                        for _ in 0..20_000 {
                            counter.update(1, 8);
                        }
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap();
            }
            done.store(true, Ordering::Relaxed);
        });

        assert_eq!(counter.state.fallback.load(Ordering::SeqCst), 0);
        assert_eq!(counter.read(), 80_000);
        assert_eq!(counter.sum(), 80_000);
    }

    #[test]
    fn test_drain_on_platform_removal() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let unit = pool.add_unit().unwrap();
        counter.state.slots[unit.index()].store(-17, Ordering::SeqCst);
        assert_eq!(counter.sum(), -17);

        pool.notify(PoolEvent::UnitRemoved(unit)).unwrap();
        assert_eq!(counter.read(), -17);
        assert_eq!(counter.sum(), -17);
        assert_eq!(counter.state.slots[unit.index()].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_try_compare_approx_far() {
        let pool = pool();
        for i in 0..4 {
            pool.notify(PoolEvent::UnitAdded(UnitId::new(i))).unwrap();
        }
        let counter = Counter::new(&pool, 10).unwrap();
        assert_eq!(
            counter.try_compare_approx(1_000_000, 32),
            Some(CmpOrdering::Less)
        );
        assert_eq!(
            counter.try_compare_approx(-1_000_000, 32),
            Some(CmpOrdering::Greater)
        );
        assert_eq!(counter.compare(1_000_000, 32), CmpOrdering::Less);
    }

    #[test]
    fn test_compare_near_uses_sum() {
        let pool = pool();
        let counter = Counter::new(&pool, 0).unwrap();
        let _unit = pool.enter().unwrap();
        counter.update(20, 32);

        assert_eq!(counter.try_compare_approx(20, 32), None);
        assert_eq!(counter.compare(20, 32), CmpOrdering::Equal);
        assert_eq!(counter.compare(19, 32), CmpOrdering::Greater);
        assert_eq!(counter.compare(21, 32), CmpOrdering::Less);
        assert_eq!(counter.compare_default(20), CmpOrdering::Equal);
    }

    #[test]
    fn test_compare_bound_survives_shrink() {
        let pool = pool();
        for i in 0..40 {
            pool.notify(PoolEvent::UnitAdded(UnitId::new(i))).unwrap();
        }
        let counter = Counter::new(&pool, 0).unwrap();
        for i in 0..4 {
            counter.state.slots[i].store(79, Ordering::SeqCst);
        }
        for i in 4..40 {
            pool.notify(PoolEvent::UnitRemoved(UnitId::new(i))).unwrap();
        }
        assert_eq!(pool.default_batch(), 32);
        // 4 × 79 > 4 × 32: the current batch alone would wrongly decide.
        assert_eq!(counter.compare(200, 32), CmpOrdering::Greater);
    }

    #[test]
    fn test_destroy_unregisters() {
        let tracker = Arc::new(LeakTracker::new());
        let pool = UnitPool::new().with_hook(tracker.clone()).into_shared();
        let counter = Counter::new(&pool, 0).unwrap().with_name("c");
        assert_eq!(tracker.live(), 1);
        counter.destroy();
        assert_eq!(pool.counters(), 0);
        assert!(tracker.check().is_ok());
    }

    #[test]
    fn test_leak_detected() {
        let tracker = Arc::new(LeakTracker::new());
        let pool = UnitPool::new().with_hook(tracker.clone()).into_shared();
        let counter = Counter::new(&pool, 0).unwrap().with_name("leaky");
        let id = counter.id();
        std::mem::forget(counter);
        assert_eq!(tracker.leaked(), vec![(id, "leaky")]);
    }

    #[test]
    fn test_reinit_is_fresh() {
        let pool = pool();
        let _unit = pool.enter().unwrap();
        let counter = Counter::new(&pool, 5).unwrap();
        counter.update(10, 32);
        counter.update(40, 32);
        counter.destroy();

        let counter = Counter::new(&pool, 5).unwrap();
        assert_eq!(counter.local_value(), 0);
        assert_eq!(counter.read(), 5);
        assert_eq!(counter.sum(), 5);
        assert_eq!(counter.flushes(), 0);
    }

    #[test]
    fn test_allocation_failure_registers_nothing() {
        let tracker = Arc::new(LeakTracker::new());
        let pool = UnitPool::new().with_hook(tracker.clone()).into_shared();
        let err = Counter::with_slots(&pool, usize::MAX, 0).unwrap_err();
        assert_eq!(err, CounterError::OutOfMemory { slots: usize::MAX });
        assert_eq!(pool.counters(), 0);
        assert_eq!(tracker.live(), 0);
        assert!(Counter::new(&pool, 0).is_ok());
    }

    #[test]
    fn test_small_pool_storage() {
        let pool = UnitPool::with_config(PoolConfig::default().with_max_units(2)).into_shared();
        let counter = Counter::new(&pool, 0).unwrap();
        assert_eq!(counter.state.slots.len(), 2);
        assert_eq!(counter.state.drain_unit(UnitId::new(5)), 0);
    }

    #[test]
    fn test_name_and_observable() {
        let pool = pool();
        let counter = Counter::new(&pool, 3).unwrap().with_name("inodes");
        assert_eq!(counter.name(), "inodes");
        assert_eq!(counter.value(), 3);
        assert_eq!(counter.approximate(), 3);
        let formatted = format!("{}", &counter as &dyn Observable);
        assert_eq!(formatted, "inodes:3");
    }

    #[test]
    fn test_debug() {
        let pool = pool();
        let counter = Counter::new(&pool, 1).unwrap().with_name("dbg");
        let _unit = pool.enter().unwrap();
        counter.update(-5, 32);
        let debug_str = format!("{:?}", counter);
        assert!(debug_str.starts_with("dbg{ shared:1 fallback:0"));
        assert!(debug_str.contains("[0]:-5"));
        assert!(debug_str.ends_with("}"));
    }
}
