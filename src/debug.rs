//! Optional lifecycle hooks for leak and misuse detection.
//!
//! A [`UnitPool`](crate::pool::UnitPool) can carry a [`LifecycleHook`] that is
//! told when each of its counters is created and destroyed. Without a hook
//! nothing is tracked and the counter paths carry no extra cost.
//!
//! [`LeakTracker`] is the bundled hook: it records live counters so tests can
//! assert that everything was destroyed, and reports lifecycle violations as
//! [`CounterError::Misuse`].
//!
//! ```rust
//! use std::sync::Arc;
//! use percount::counter::Counter;
//! use percount::debug::LeakTracker;
//! use percount::pool::UnitPool;
//!
//! let tracker = Arc::new(LeakTracker::new());
//! let pool = UnitPool::new().with_hook(tracker.clone()).into_shared();
//!
//! let counter = Counter::new(&pool, 0).unwrap().with_name("inodes");
//! assert_eq!(tracker.live(), 1);
//! counter.destroy();
//! assert!(tracker.check().is_ok());
//! ```

use std::collections::HashMap;
use std::fmt::Debug;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::counter::CounterId;
use crate::error::{CounterError, Result};

/// Receives lifecycle events of the counters of a pool.
pub trait LifecycleHook: Debug + Send + Sync {
    /// Called once a counter is fully initialized.
    fn activate(&self, counter: CounterId, name: &'static str);

    /// Called when a counter is destroyed, before its storage is released.
    fn deactivate(&self, counter: CounterId);

    /// Called when a counter is renamed with `with_name`.
    fn rename(&self, _counter: CounterId, _name: &'static str) {}
}

#[derive(Debug, Default)]
struct TrackerState {
    live: HashMap<CounterId, &'static str>,
    misuses: Vec<CounterError>,
}

/// A [`LifecycleHook`] that tracks live counters and lifecycle violations.
#[derive(Debug, Default)]
pub struct LeakTracker {
    state: Mutex<TrackerState>,
}

impl LeakTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counters activated and not yet destroyed.
    pub fn live(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Counters activated and not yet destroyed, sorted by id.
    pub fn leaked(&self) -> Vec<(CounterId, &'static str)> {
        let state = self.state.lock();
        let mut leaked: Vec<_> = state.live.iter().map(|(id, name)| (*id, *name)).collect();
        leaked.sort_by_key(|(id, _)| *id);
        for (id, name) in &leaked {
            warn!(counter = %id, name, "counter not destroyed");
        }
        leaked
    }

    /// Returns and clears the recorded violations.
    pub fn take_misuses(&self) -> Vec<CounterError> {
        std::mem::take(&mut self.state.lock().misuses)
    }

    /// Fails with the first recorded violation, or with a leak report if a
    /// counter is still live.
    pub fn check(&self) -> Result<()> {
        let state = self.state.lock();
        if let Some(first) = state.misuses.first() {
            return Err(first.clone());
        }
        if !state.live.is_empty() {
            return Err(CounterError::Misuse(format!(
                "{} counter(s) not destroyed",
                state.live.len()
            )));
        }
        Ok(())
    }
}

impl LifecycleHook for LeakTracker {
    fn activate(&self, counter: CounterId, name: &'static str) {
        let mut state = self.state.lock();
        if state.live.insert(counter, name).is_some() {
            error!(counter = %counter, "counter activated twice");
            state
                .misuses
                .push(CounterError::Misuse(format!("counter {counter} activated twice")));
        }
    }

    fn deactivate(&self, counter: CounterId) {
        let mut state = self.state.lock();
        if state.live.remove(&counter).is_none() {
            error!(counter = %counter, "destroy of a counter that is not active");
            state.misuses.push(CounterError::Misuse(format!(
                "counter {counter} destroyed while not active"
            )));
        }
    }

    fn rename(&self, counter: CounterId, name: &'static str) {
        if let Some(entry) = self.state.lock().live.get_mut(&counter) {
            *entry = name;
        }
    }
}
