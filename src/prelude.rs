//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use drop_intake::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{DeadLetterReason, IntakeError, Result, StageError};

// Scanner
pub use crate::scanner::classify::{DropPath, classify};
pub use crate::scanner::hasher::{Fingerprint, fingerprint};
pub use crate::scanner::patterns::IgnoreMatcher;
pub use crate::scanner::stability::{FileSignature, StabilityTracker};

// Storage
pub use crate::storage::object_store::{FsObjectStore, ObjectStore};
pub use crate::storage::snapshot::{RetryPolicy, snapshot_file};

// Database
pub use crate::db::IntakeDb;
pub use crate::db::registrar::{NewArtifact, Registration};

// Daemon
#[cfg(feature = "daemon")]
pub use crate::daemon::loop_main::{IntakeWatcher, ScanReport};
pub use crate::daemon::metrics::IntakeMetrics;
#[cfg(feature = "daemon")]
pub use crate::daemon::signals::SignalHandler;
pub use crate::daemon::worker::{FileOutcome, PipelineContext, process_file};

// Logger
pub use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
