#![forbid(unsafe_code)]

//! drop_intake: poll-based intake of files dropped into a tenant/case/drop
//! directory tree.
//!
//! Each file that stops changing is fingerprinted (SHA-256), copied into
//! content-addressed object storage, and registered as an artifact with a
//! pending ingest task. Content already registered for the same case is not
//! registered twice. Every per-file failure lands in a dead-letter table with a
//! machine-readable reason; nothing is dropped silently.
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use drop_intake::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use drop_intake::core::config::Config;
//! use drop_intake::scanner::classify::classify;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod db;
pub mod logger;
pub mod scanner;
pub mod storage;
