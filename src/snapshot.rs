//! Serializable snapshots of counter state.
//!
//! # Feature Flag
//!
//! This module requires the `serde` feature:
//!
//! ```toml
//! [dependencies]
//! percount = { version = "0.1", features = ["serde"] }
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use percount::counter::Counter;
//! use percount::pool::UnitPool;
//! use percount::snapshot::CounterSnapshot;
//!
//! let pool = UnitPool::new().into_shared();
//! let counter = Counter::new(&pool, 42).unwrap().with_name("dirty_pages");
//!
//! let snapshot = CounterSnapshot::from_observable(&counter);
//! let json = serde_json::to_string(&snapshot).unwrap();
//! ```

use crate::observable::Observable;
use serde::{Deserialize, Serialize};

/// A snapshot of a single counter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CounterSnapshot {
    /// The name of the counter.
    pub name: String,
    /// The exact value at snapshot time.
    pub value: i64,
    /// The approximate value, when it was captured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approximate: Option<i64>,
}

impl CounterSnapshot {
    /// Creates a new counter snapshot.
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
            approximate: None,
        }
    }

    /// Creates a snapshot from an observable counter.
    pub fn from_observable(counter: &dyn Observable) -> Self {
        Self::new(display_name(counter), counter.value())
    }

    /// Creates a snapshot carrying both the exact and the approximate value.
    pub fn from_observable_with_approximate(counter: &dyn Observable) -> Self {
        Self {
            approximate: Some(counter.approximate()),
            ..Self::from_observable(counter)
        }
    }

    /// Difference between the exact and the approximate value, if captured.
    pub fn drift(&self) -> Option<i64> {
        self.approximate.map(|approx| self.value.wrapping_sub(approx))
    }
}

fn display_name(counter: &dyn Observable) -> String {
    if counter.name().is_empty() {
        "(unnamed)".to_string()
    } else {
        counter.name().to_string()
    }
}

/// A point-in-time capture of a set of counters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    /// Optional timestamp in milliseconds since Unix epoch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    /// The counter snapshots.
    pub counters: Vec<CounterSnapshot>,
}

impl MetricsSnapshot {
    /// Creates a new metrics snapshot with the given counters.
    pub fn new(counters: Vec<CounterSnapshot>) -> Self {
        Self {
            timestamp_ms: None,
            counters,
        }
    }

    /// Creates a new metrics snapshot with counters and a timestamp.
    pub fn with_timestamp(counters: Vec<CounterSnapshot>, timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms: Some(timestamp_ms),
            counters,
        }
    }

    /// Finds a counter by name.
    pub fn get(&self, name: &str) -> Option<&CounterSnapshot> {
        self.counters.iter().find(|c| c.name == name)
    }

    /// Collects snapshots from an iterator of observable counters.
    pub fn collect<'a>(counters: impl Iterator<Item = &'a dyn Observable>) -> Self {
        Self::new(counters.map(CounterSnapshot::from_observable).collect())
    }

    /// Collects exact and approximate values from the counters.
    pub fn collect_with_approximate<'a>(
        counters: impl Iterator<Item = &'a dyn Observable>,
    ) -> Self {
        Self::new(
            counters
                .map(CounterSnapshot::from_observable_with_approximate)
                .collect(),
        )
    }
}
