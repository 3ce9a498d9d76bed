//! The unit pool: active units, default batch and the counter registry.
//!
//! A [`UnitPool`] is the platform side of the counters. It decides which
//! units are active, publishes the default batch for the current pool size,
//! and keeps a registry of every live counter so that a departing unit's
//! unflushed deltas can be drained into each counter's shared total.
//!
//! The registry lock is only taken on cold paths: counter creation and
//! destruction, and capacity changes. `update`, `sum` and `read` never touch
//! it.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use percount::counter::Counter;
//! use percount::pool::UnitPool;
//!
//! let pool = UnitPool::new().into_shared();
//! let counter = Arc::new(Counter::new(&pool, 0).unwrap());
//!
//! let worker = {
//!     let pool = Arc::clone(&pool);
//!     let counter = Arc::clone(&counter);
//!     std::thread::spawn(move || {
//!         // Bind this thread to a unit; the unit leaves the pool on drop.
//!         let _unit = pool.enter().unwrap();
//!         for _ in 0..1000 {
//!             counter.inc();
//!         }
//!     })
//! };
//! worker.join().unwrap();
//!
//! // The worker's unit was drained when it left the pool.
//! assert_eq!(counter.read(), 1000);
//! assert_eq!(counter.sum(), 1000);
//! ```

use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::batch::{BatchPolicy, DEFAULT_MIN_BATCH, DEFAULT_PER_UNIT_BATCH};
use crate::counter::CounterId;
use crate::debug::LifecycleHook;
use crate::error::{CounterError, Result};
use crate::unit::{self, Binding, UnitId, UnitSet, MAX_UNITS};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Configuration of a [`UnitPool`].
///
/// # Examples
///
/// ```rust
/// use percount::pool::{PoolConfig, UnitPool};
///
/// let config = PoolConfig::default().with_max_units(8).with_min_batch(16);
/// let pool = UnitPool::with_config(config);
/// assert_eq!(pool.capacity(), 8);
/// assert_eq!(pool.default_batch(), 16);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Number of unit slots, clamped to [`MAX_UNITS`].
    pub max_units: usize,
    /// Smallest default batch.
    pub min_batch: i32,
    /// Batch contribution of each active unit.
    pub per_unit_batch: i32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_units: MAX_UNITS,
            min_batch: DEFAULT_MIN_BATCH,
            per_unit_batch: DEFAULT_PER_UNIT_BATCH,
        }
    }
}

impl PoolConfig {
    /// Sets the number of unit slots.
    pub fn with_max_units(mut self, max_units: usize) -> Self {
        self.max_units = max_units;
        self
    }

    /// Sets the smallest default batch.
    pub fn with_min_batch(mut self, min_batch: i32) -> Self {
        self.min_batch = min_batch;
        self
    }

    /// Sets the batch contribution of each active unit.
    pub fn with_per_unit_batch(mut self, per_unit_batch: i32) -> Self {
        self.per_unit_batch = per_unit_batch;
        self
    }
}

/// A capacity change of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolEvent {
    /// A unit joined the pool. Its accumulators start at zero.
    UnitAdded(UnitId),
    /// A unit left the pool. It must be idle.
    UnitRemoved(UnitId),
}

/// Something holding per-unit state that must survive a unit's removal.
///
/// Counters implement this and subscribe themselves to their pool. The pool
/// calls [`Drain::drain_unit`] with the registry lock held, after the unit
/// has stopped updating.
pub trait Drain: Send + Sync {
    /// Folds the unit's pending delta into the shared state and zeroes it.
    /// Returns the amount that was moved.
    fn drain_unit(&self, unit: UnitId) -> i64;
}

#[derive(Debug, Default)]
struct Registry {
    next_counter: u64,
    counters: BTreeMap<CounterId, Weak<dyn Drain>>,
}

/// A pool of processing units shared by a set of counters.
#[derive(Debug)]
pub struct UnitPool {
    id: u64,
    capacity: usize,
    active: AtomicU64,
    bound: AtomicU64,
    batch: BatchPolicy,
    registry: Mutex<Registry>,
    hook: Option<Arc<dyn LifecycleHook>>,
}

impl UnitPool {
    /// Creates an empty pool with the default configuration.
    pub fn new() -> Self {
        Self::with_config(PoolConfig::default())
    }

    /// Creates an empty pool.
    pub fn with_config(config: PoolConfig) -> Self {
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            capacity: config.max_units.clamp(1, MAX_UNITS),
            active: AtomicU64::new(0),
            bound: AtomicU64::new(0),
            batch: BatchPolicy::new(config.min_batch, config.per_unit_batch),
            registry: Mutex::new(Registry::default()),
            hook: None,
        }
    }

    /// Installs a lifecycle hook notified on counter creation and destruction.
    pub fn with_hook(mut self, hook: Arc<dyn LifecycleHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Wraps the pool in an `Arc`, as required by counters and guards.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn hook(&self) -> Option<&Arc<dyn LifecycleHook>> {
        self.hook.as_ref()
    }

    /// Number of unit slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshot of the active units.
    #[inline]
    pub fn active_units(&self) -> UnitSet {
        UnitSet::from_bits(self.active.load(Ordering::Acquire))
    }

    /// Number of active units.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.active_units().len()
    }

    /// The default batch for the current pool size. May be stale.
    #[inline]
    pub fn default_batch(&self) -> i32 {
        self.batch.get()
    }

    /// The largest default batch published so far.
    #[inline]
    pub fn batch_ceiling(&self) -> i32 {
        self.batch.ceiling()
    }

    /// Number of counters registered with this pool.
    pub fn counters(&self) -> usize {
        self.registry.lock().counters.len()
    }

    /// Units a thread is currently bound to through a [`UnitGuard`].
    #[inline]
    pub fn bound_units(&self) -> UnitSet {
        UnitSet::from_bits(self.bound.load(Ordering::Acquire))
    }

    /// Activates the lowest free unit.
    pub fn add_unit(&self) -> Result<UnitId> {
        let _registry = self.registry.lock();
        self.claim_free()
    }

    /// Removes an active unit, draining its accumulator in every counter.
    ///
    /// The unit must be idle: a unit bound to a thread is refused with
    /// [`CounterError::UnitBusy`]. Guards returned by [`UnitPool::enter`]
    /// remove their unit on drop.
    pub fn remove_unit(&self, unit: UnitId) -> Result<()> {
        let registry = self.registry.lock();
        if self.bound_units().contains(unit) {
            return Err(CounterError::UnitBusy(unit));
        }
        self.offline(&registry, unit)
    }

    /// Applies a capacity change reported by the platform.
    ///
    /// Adding a unit that is already active only refreshes the batch. Added
    /// units are bound with [`UnitPool::enter_unit`].
    pub fn notify(&self, event: PoolEvent) -> Result<()> {
        match event {
            PoolEvent::UnitAdded(unit) => {
                if unit.index() >= self.capacity {
                    return Err(CounterError::UnitNotActive(unit));
                }
                let _registry = self.registry.lock();
                self.online(unit);
                Ok(())
            }
            PoolEvent::UnitRemoved(unit) => self.remove_unit(unit),
        }
    }

    /// Activates a unit and binds the current thread to it.
    ///
    /// Updates made by this thread go to the unit's accumulators until the
    /// guard is dropped, at which point the unit leaves the pool and its
    /// pending deltas are drained. A thread holds at most one unit per pool.
    pub fn enter(self: &Arc<Self>) -> Result<UnitGuard> {
        self.ensure_unbound()?;
        let unit = {
            let _registry = self.registry.lock();
            let unit = self.claim_free()?;
            self.bound.fetch_or(1 << unit.index(), Ordering::AcqRel);
            unit
        };
        self.bind_thread(unit, true)
    }

    /// Binds the current thread to a unit that is already active, such as
    /// one reported with [`PoolEvent::UnitAdded`].
    ///
    /// Dropping the guard unbinds the thread and leaves the unit active; the
    /// platform removes it once idle.
    pub fn enter_unit(self: &Arc<Self>, unit: UnitId) -> Result<UnitGuard> {
        self.ensure_unbound()?;
        {
            let _registry = self.registry.lock();
            if !self.active_units().contains(unit) {
                return Err(CounterError::UnitNotActive(unit));
            }
            let bit = 1 << unit.index();
            if self.bound.fetch_or(bit, Ordering::AcqRel) & bit != 0 {
                return Err(CounterError::UnitBusy(unit));
            }
        }
        self.bind_thread(unit, false)
    }

    fn ensure_unbound(&self) -> Result<()> {
        match unit::current_unit(self.id) {
            Some(existing) => Err(CounterError::AlreadyBound(existing)),
            None => Ok(()),
        }
    }

    fn bind_thread(self: &Arc<Self>, unit: UnitId, owned: bool) -> Result<UnitGuard> {
        if let Err(existing) = unit::bind(Binding {
            pool: self.id,
            unit,
        }) {
            self.release(unit, owned)?;
            return Err(CounterError::AlreadyBound(existing));
        }
        trace!(pool = self.id, %unit, owned, "thread bound");
        Ok(UnitGuard {
            pool: Arc::clone(self),
            unit,
            owned,
            _not_send: PhantomData,
        })
    }

    /// Clears the bound bit of `unit`, removing the unit too if `remove`.
    fn release(&self, unit: UnitId, remove: bool) -> Result<()> {
        let registry = self.registry.lock();
        self.bound.fetch_and(!(1 << unit.index()), Ordering::AcqRel);
        if remove {
            self.offline(&registry, unit)
        } else {
            Ok(())
        }
    }

    /// Must be called with the registry lock held.
    fn claim_free(&self) -> Result<UnitId> {
        let free = !self.active.load(Ordering::Acquire);
        let index = free.trailing_zeros() as usize;
        if index >= self.capacity {
            return Err(CounterError::PoolExhausted {
                capacity: self.capacity,
            });
        }
        let unit = UnitId::new(index);
        self.online(unit);
        Ok(unit)
    }

    /// Must be called with the registry lock held.
    fn online(&self, unit: UnitId) {
        let bits = self.active.fetch_or(1 << unit.index(), Ordering::AcqRel);
        let active = (bits | (1 << unit.index())).count_ones() as usize;
        let batch = self.batch.recompute(active);
        debug!(pool = self.id, %unit, active, batch, "unit added");
    }

    fn offline(&self, registry: &Registry, unit: UnitId) -> Result<()> {
        if !self.active_units().contains(unit) {
            return Err(CounterError::UnitNotActive(unit));
        }

        for (id, counter) in &registry.counters {
            if let Some(counter) = counter.upgrade() {
                let moved = counter.drain_unit(unit);
                if moved != 0 {
                    trace!(pool = self.id, counter = %id, %unit, moved, "drained unit");
                }
            }
        }

        let bits = self.active.fetch_and(!(1 << unit.index()), Ordering::AcqRel);
        let remaining = (bits.count_ones() - 1) as usize;
        let batch = self.batch.recompute(remaining);
        debug!(pool = self.id, %unit, active = remaining, batch, "unit removed");
        Ok(())
    }

    pub(crate) fn subscribe(&self, counter: Weak<dyn Drain>) -> CounterId {
        let mut registry = self.registry.lock();
        registry.next_counter += 1;
        let id = CounterId::new(registry.next_counter);
        registry.counters.insert(id, counter);
        id
    }

    pub(crate) fn unsubscribe(&self, id: CounterId) {
        if self.registry.lock().counters.remove(&id).is_none() {
            warn!(pool = self.id, counter = %id, "unsubscribe of unknown counter");
        }
    }
}

impl Default for UnitPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Binds the current thread to a unit of a pool.
///
/// Not `Send`: the binding is thread-local. Guards of different pools may be
/// dropped in any order.
#[derive(Debug)]
pub struct UnitGuard {
    pool: Arc<UnitPool>,
    unit: UnitId,
    /// The unit was activated by this guard and leaves the pool with it.
    owned: bool,
    _not_send: PhantomData<*const ()>,
}

impl UnitGuard {
    /// The unit this thread is bound to.
    pub fn unit(&self) -> UnitId {
        self.unit
    }

    /// The pool the unit belongs to.
    pub fn pool(&self) -> &Arc<UnitPool> {
        &self.pool
    }
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        unit::unbind(Binding {
            pool: self.pool.id,
            unit: self.unit,
        });
        if let Err(err) = self.pool.release(self.unit, self.owned) {
            warn!(pool = self.pool.id, unit = %self.unit, %err, "unit guard release failed");
        }
    }
}
