//! JSON observer for serializing counters.
//!
//! This module provides [`JsonObserver`], which serializes a collection of
//! [`Observable`] counters to JSON using the types of
//! [`snapshot`](crate::snapshot).
//!
//! # Feature Flag
//!
//! This module requires the `json` feature:
//!
//! ```toml
//! [dependencies]
//! percount = { version = "0.1", features = ["json"] }
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use percount::counter::Counter;
//! use percount::observable::Observable;
//! use percount::observers::json::JsonObserver;
//! use percount::pool::UnitPool;
//!
//! let pool = UnitPool::new().into_shared();
//! let inodes = Counter::new(&pool, 1000).unwrap().with_name("free_inodes");
//! let blocks = Counter::new(&pool, 5).unwrap().with_name("dirty_blocks");
//!
//! let counters: Vec<&dyn Observable> = vec![&inodes, &blocks];
//! let json = JsonObserver::new().to_json(counters.into_iter()).unwrap();
//! // [{"name":"free_inodes","value":1000},{"name":"dirty_blocks","value":5}]
//! ```

use crate::observable::Observable;
use crate::observers::Result;
use crate::snapshot::{CounterSnapshot, MetricsSnapshot};
use serde::Serialize;

/// Configuration for the JSON observer.
#[derive(Debug, Clone, Default)]
pub struct JsonConfig {
    /// Whether to pretty-print the JSON output.
    pub pretty: bool,
    /// Whether to include a timestamp in the output.
    pub include_timestamp: bool,
    /// Whether to wrap counters in a MetricsSnapshot object.
    pub wrap_in_snapshot: bool,
    /// Whether to also capture the approximate value of each counter.
    pub include_approximate: bool,
}

/// An observer that serializes counters to JSON format.
#[derive(Debug, Clone, Default)]
pub struct JsonObserver {
    config: JsonConfig,
}

impl JsonObserver {
    /// Creates a new JSON observer with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new JSON observer with the specified configuration.
    pub fn with_config(config: JsonConfig) -> Self {
        Self { config }
    }

    /// Enables or disables pretty-printing.
    pub fn pretty(mut self, enabled: bool) -> Self {
        self.config.pretty = enabled;
        self
    }

    /// Enables or disables timestamp inclusion.
    ///
    /// Only has effect when `wrap_in_snapshot` is also enabled.
    pub fn include_timestamp(mut self, enabled: bool) -> Self {
        self.config.include_timestamp = enabled;
        self
    }

    /// Enables or disables wrapping the output in a [`MetricsSnapshot`].
    pub fn wrap_in_snapshot(mut self, enabled: bool) -> Self {
        self.config.wrap_in_snapshot = enabled;
        self
    }

    /// Enables or disables capturing the approximate value next to the exact one.
    pub fn include_approximate(mut self, enabled: bool) -> Self {
        self.config.include_approximate = enabled;
        self
    }

    /// Collects counters into a vector of [`CounterSnapshot`].
    pub fn collect<'a>(
        &self,
        counters: impl Iterator<Item = &'a dyn Observable>,
    ) -> Vec<CounterSnapshot> {
        if self.config.include_approximate {
            counters
                .map(CounterSnapshot::from_observable_with_approximate)
                .collect()
        } else {
            counters.map(CounterSnapshot::from_observable).collect()
        }
    }

    /// Serializes counters to a JSON string.
    pub fn to_json<'a>(&self, counters: impl Iterator<Item = &'a dyn Observable>) -> Result<String> {
        let snapshots = self.collect(counters);
        if self.config.wrap_in_snapshot {
            self.render(&self.wrap(snapshots))
        } else {
            self.render(&snapshots)
        }
    }

    /// Serializes counters to a JSON byte vector.
    pub fn to_json_bytes<'a>(
        &self,
        counters: impl Iterator<Item = &'a dyn Observable>,
    ) -> Result<Vec<u8>> {
        let snapshots = self.collect(counters);
        let bytes = if self.config.wrap_in_snapshot {
            serde_json::to_vec(&self.wrap(snapshots))?
        } else {
            serde_json::to_vec(&snapshots)?
        };
        Ok(bytes)
    }

    fn wrap(&self, snapshots: Vec<CounterSnapshot>) -> MetricsSnapshot {
        if self.config.include_timestamp {
            MetricsSnapshot::with_timestamp(snapshots, current_timestamp_ms())
        } else {
            MetricsSnapshot::new(snapshots)
        }
    }

    fn render<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = if self.config.pretty {
            serde_json::to_string_pretty(value)?
        } else {
            serde_json::to_string(value)?
        };
        Ok(json)
    }
}

/// Returns the current timestamp in milliseconds since Unix epoch.
fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
