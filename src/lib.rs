//! # Percount - Batched Per-Unit Counters
//!
//! A Rust library providing signed counters for workloads where many
//! processing units update the same quantity concurrently (free block counts,
//! dirty pages, in-flight requests) and exact reads are comparatively rare.
//!
//! ## The Problem
//!
//! A single atomic counter makes every update bounce the same cache line
//! between cores. Sharding the counter fixes the writes but turns every read
//! into a walk over all shards, and a walk racing with writers gives no
//! single-instant answer.
//!
//! ## The Solution: Batching With a Consistent Sum
//!
//! Each unit keeps a small local delta and only folds it into a shared
//! 64-bit total once it reaches the **batch** threshold. Readers then get a
//! choice:
//!
//! - [`Counter::read`](counter::Counter::read): O(1), off by at most
//!   `(batch - 1) × active units`.
//! - [`Counter::sum`](counter::Counter::sum): exact at some instant within
//!   the call, using a seqlock-style retry against concurrent flushes.
//! - [`Counter::compare`](counter::Counter::compare): answers from `read`
//!   when the comparand is beyond the drift bound, from `sum` otherwise.
//!
//! ### Design Principles
//!
//! 1. **Thread-Confined Accumulators**: a thread bound to a unit of a
//!    [`UnitPool`](pool::UnitPool) is the only writer of that unit's slot, so
//!    the hot path is a load, an add and a store.
//!
//! 2. **Cache Line Padding**: every slot and every shared word is wrapped in
//!    [`crossbeam_utils::CachePadded`] to prevent false sharing.
//!
//! 3. **Flush Sequence**: flushes are bracketed on a sequence word; a sum that
//!    overlaps one retries instead of blocking the writer.
//!
//! 4. **Drain on Removal**: when a unit leaves the pool its pending deltas are
//!    folded into every registered counter, under a lock that only the cold
//!    paths take.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::thread;
//! use percount::counter::Counter;
//! use percount::pool::UnitPool;
//!
//! let pool = UnitPool::new().into_shared();
//! let counter = Arc::new(Counter::new(&pool, 0).unwrap().with_name("requests"));
//!
//! let handles: Vec<_> = (0..4)
//!     .map(|_| {
//!         let pool = Arc::clone(&pool);
//!         let counter = Arc::clone(&counter);
//!         thread::spawn(move || {
//!             let _unit = pool.enter().unwrap();
//!             for _ in 0..1000 {
//!                 counter.inc();
//!             }
//!         })
//!     })
//!     .collect();
//!
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//!
//! assert_eq!(counter.sum(), 4000);
//! ```
//!
//! ## Memory Usage
//!
//! Each counter reserves one cache-padded `i32` per unit slot of its pool,
//! about **4KB** with the default 64 slots.
//!
//! ## Feature Flags
//!
//! | Feature | Module | Description |
//! |---------|--------|-------------|
//! | `serde` | [`snapshot`] | Serializable counter snapshots |
//! | `json` | [`observers::json`] | Serialize counters to JSON |
//! | `full` | All of the above | |

pub mod batch;
pub mod counter;
pub mod debug;
pub mod error;
pub mod observable;
pub mod pool;
mod seqlock;
pub mod unit;

#[cfg(feature = "json")]
pub mod observers;

#[cfg(feature = "serde")]
pub mod snapshot;

pub use counter::{Counter, CounterId};
pub use error::{CounterError, Result};
pub use observable::Observable;
pub use pool::{PoolConfig, PoolEvent, UnitGuard, UnitPool};
