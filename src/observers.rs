//! Observers that export counter values.
//!
//! - [`json`] - Serialize counters to JSON format
//!
//! # Feature Flags
//!
//! - `json` - Enables the [`json`] module
//! - `full` - Enables all observer modules
//!
//! # Example
//!
//! ```rust,ignore
//! use percount::counter::Counter;
//! use percount::observable::Observable;
//! use percount::observers::json::JsonObserver;
//! use percount::observers::Result;
//!
//! fn export(counters: &[&dyn Observable]) -> Result<String> {
//!     JsonObserver::new().to_json(counters.iter().copied())
//! }
//! ```

mod error;

pub use error::{ObserverError, Result};

pub mod json;
