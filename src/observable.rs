//! Common read interface for counters.
//!
//! [`Observable`] lets snapshots and observers read counters without caring
//! how they are stored.

use std::fmt::{Debug, Display};

/// A trait for types that can be observed to retrieve their current value.
///
/// # Examples
///
/// ```rust
/// use percount::counter::Counter;
/// use percount::observable::Observable;
/// use percount::pool::UnitPool;
///
/// let pool = UnitPool::new().into_shared();
/// let counter = Counter::new(&pool, 5).unwrap().with_name("requests");
///
/// let observed: &dyn Observable = &counter;
/// assert_eq!(observed.name(), "requests");
/// assert_eq!(observed.value(), 5);
/// assert_eq!(observed.to_string(), "requests:5");
/// ```
pub trait Observable: Debug {
    /// Returns the name of this counter, or an empty string if unnamed.
    fn name(&self) -> &str;

    /// Returns the exact value of the counter.
    ///
    /// For batched counters this walks every active unit.
    fn value(&self) -> i64;

    /// Returns a cheap, possibly stale value.
    ///
    /// Defaults to [`Observable::value`].
    fn approximate(&self) -> i64 {
        self.value()
    }
}

impl Display for dyn Observable + '_ {
    /// Formats the counter as `name:value` if named, or just `value` otherwise.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if !self.name().is_empty() {
            write!(f, "{}:{}", self.name(), self.value())
        } else {
            write!(f, "{}", self.value())
        }
    }
}
