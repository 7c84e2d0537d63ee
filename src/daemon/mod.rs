//! Watcher runtime: scan loop, worker pool, metrics and signal handling.

#[cfg(feature = "daemon")]
pub mod loop_main;
pub mod metrics;
#[cfg(feature = "daemon")]
pub mod signals;
pub mod worker;
