//! Shared, read-mostly caches consulted by the dispatcher.

pub mod worker_cache;

pub use worker_cache::{WorkerAvailability, WorkerCache};
