//! # worklock
//!
//! Lease-based work claiming for independent workers that share nothing but
//! a key-value store.
//!
//! A [`Locker`](locker::Locker) turns a sequence of items into the subset this
//! worker should process, skipping items another worker finished or is still
//! holding, and reclaiming items whose owner stopped renewing its lease. A
//! [`Scheduler`](scheduler::Scheduler) chains several such sequences. Stores
//! can be in-process, a local SQLite file, or Postgres.

pub mod config;
pub mod error;
pub mod lease;
pub mod locker;
pub mod scheduler;
pub mod store;
pub mod telemetry;

pub use error::{Error, Result};
pub use locker::{Locker, LockerConfig};
pub use scheduler::Scheduler;
pub use store::Store;
