//! INT-prefixed error types with structured error codes, plus the closed set of
//! per-file stage failures that end in the dead-letter log.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, IntakeError>;

/// Top-level error type for the intake service.
#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("[INT-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[INT-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[INT-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[INT-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[INT-2102] SQL failure in {context}: {details}")]
    Sql {
        context: &'static str,
        details: String,
    },

    #[error("[INT-2201] object store failure for {bucket}/{key}: {details}")]
    ObjectStore {
        bucket: String,
        key: String,
        details: String,
    },

    #[error("[INT-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[INT-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[INT-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl IntakeError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "INT-1001",
            Self::MissingConfig { .. } => "INT-1002",
            Self::ConfigParse { .. } => "INT-1003",
            Self::Serialization { .. } => "INT-2101",
            Self::Sql { .. } => "INT-2102",
            Self::ObjectStore { .. } => "INT-2201",
            Self::Io { .. } => "INT-3002",
            Self::ChannelClosed { .. } => "INT-3003",
            Self::Runtime { .. } => "INT-3900",
        }
    }

    /// Whether retrying might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Io { .. }
                | Self::ChannelClosed { .. }
                | Self::Sql { .. }
                | Self::ObjectStore { .. }
                | Self::Runtime { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<rusqlite::Error> for IntakeError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql {
            context: "rusqlite",
            details: value.to_string(),
        }
    }
}

impl From<serde_json::Error> for IntakeError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for IntakeError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}

// ──────────────────── stage failures ────────────────────

/// Closed set of reason codes recorded in the `dead_letter.failed_activity` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeadLetterReason {
    InvalidPath,
    TenantNotFound,
    CaseTenantMismatch,
    SnapshotFailed,
    UpsertFailed,
    FileTooLarge,
    FileChangedOrMissing,
    MoveFailed,
}

impl DeadLetterReason {
    /// Every reason, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::InvalidPath,
        Self::TenantNotFound,
        Self::CaseTenantMismatch,
        Self::SnapshotFailed,
        Self::UpsertFailed,
        Self::FileTooLarge,
        Self::FileChangedOrMissing,
        Self::MoveFailed,
    ];

    /// Wire code stored in the database and used as the metrics label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidPath => "invalid_path",
            Self::TenantNotFound => "tenant_not_found",
            Self::CaseTenantMismatch => "case_tenant_mismatch",
            Self::SnapshotFailed => "snapshot_failed",
            Self::UpsertFailed => "upsert_failed",
            Self::FileTooLarge => "file_too_large",
            Self::FileChangedOrMissing => "file_changed_or_missing",
            Self::MoveFailed => "move_failed",
        }
    }

    /// Parse a wire code back into a reason.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.as_str() == raw)
    }
}

impl std::fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of one pipeline stage for one file.
///
/// Stage functions return this; the worker turns each variant into exactly one
/// dead-letter row and one `errors_total` increment.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("invalid source path {path}: {details}")]
    InvalidPath { path: String, details: String },

    #[error("tenant not found: {slug}")]
    TenantNotFound { slug: String },

    #[error("case {case_id} not authorized for tenant {slug}")]
    CaseTenantMismatch { case_id: String, slug: String },

    #[error("snapshot failed after {attempts} attempts: {last_error}")]
    SnapshotFailed { attempts: u32, last_error: String },

    #[error("artifact registration failed: {details}")]
    UpsertFailed { details: String },

    #[error("file too large: {size} bytes exceeds limit of {limit}")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("file changed or missing during hashing: {details}")]
    FileChanged { details: String },

    #[error("move to {dest} failed: {details}")]
    MoveFailed { dest: PathBuf, details: String },
}

impl StageError {
    /// The single dead-letter reason this failure is recorded under.
    #[must_use]
    pub const fn reason(&self) -> DeadLetterReason {
        match self {
            Self::InvalidPath { .. } => DeadLetterReason::InvalidPath,
            Self::TenantNotFound { .. } => DeadLetterReason::TenantNotFound,
            Self::CaseTenantMismatch { .. } => DeadLetterReason::CaseTenantMismatch,
            Self::SnapshotFailed { .. } => DeadLetterReason::SnapshotFailed,
            Self::UpsertFailed { .. } => DeadLetterReason::UpsertFailed,
            Self::FileTooLarge { .. } => DeadLetterReason::FileTooLarge,
            Self::FileChanged { .. } => DeadLetterReason::FileChangedOrMissing,
            Self::MoveFailed { .. } => DeadLetterReason::MoveFailed,
        }
    }

    /// Structured context stored in `dead_letter.error_blob`.
    #[must_use]
    pub fn context(&self) -> serde_json::Value {
        use serde_json::json;
        match self {
            Self::InvalidPath { path, .. } => json!({ "relpath": path }),
            Self::TenantNotFound { slug } => json!({ "tenant": slug }),
            Self::CaseTenantMismatch { case_id, slug } => {
                json!({ "case": case_id, "tenant": slug })
            }
            Self::SnapshotFailed { attempts, .. } => json!({ "attempts": attempts }),
            Self::UpsertFailed { details } => json!({ "exc": details }),
            Self::FileTooLarge { size, limit } => json!({ "size": size, "limit": limit }),
            Self::FileChanged { details } => json!({ "detail": details }),
            Self::MoveFailed { dest, .. } => json!({ "dest": dest.display().to_string() }),
        }
    }
}

/// Registration and authorization surface database errors as `upsert_failed`.
impl From<IntakeError> for StageError {
    fn from(value: IntakeError) -> Self {
        Self::UpsertFailed {
            details: value.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_unique() {
        let errors: Vec<IntakeError> = vec![
            IntakeError::InvalidConfig {
                details: String::new(),
            },
            IntakeError::MissingConfig {
                path: PathBuf::new(),
            },
            IntakeError::ConfigParse {
                context: "",
                details: String::new(),
            },
            IntakeError::Serialization {
                context: "",
                details: String::new(),
            },
            IntakeError::Sql {
                context: "",
                details: String::new(),
            },
            IntakeError::ObjectStore {
                bucket: String::new(),
                key: String::new(),
                details: String::new(),
            },
            IntakeError::Io {
                path: PathBuf::new(),
                source: std::io::Error::other("test"),
            },
            IntakeError::ChannelClosed { component: "" },
            IntakeError::Runtime {
                details: String::new(),
            },
        ];

        let codes: Vec<&str> = errors.iter().map(IntakeError::code).collect();
        let unique: std::collections::HashSet<&&str> = codes.iter().collect();
        assert_eq!(
            codes.len(),
            unique.len(),
            "error codes must be unique: {codes:?}"
        );
        assert!(codes.iter().all(|c| c.starts_with("INT-")));
    }

    #[test]
    fn error_display_includes_code() {
        let err = IntakeError::InvalidConfig {
            details: "bad value".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("INT-1001"), "missing code: {msg}");
        assert!(msg.contains("bad value"), "missing details: {msg}");
    }

    #[test]
    fn retryable_errors_are_correct() {
        assert!(
            IntakeError::Sql {
                context: "",
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            IntakeError::ObjectStore {
                bucket: "raw".to_string(),
                key: "aa/bb".to_string(),
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !IntakeError::InvalidConfig {
                details: String::new()
            }
            .is_retryable()
        );
        assert!(
            !IntakeError::MissingConfig {
                path: PathBuf::new()
            }
            .is_retryable()
        );
    }

    #[test]
    fn from_rusqlite_error() {
        let sql_err =
            rusqlite::Error::SqliteFailure(rusqlite::ffi::Error::new(1), Some("test".to_string()));
        let err: IntakeError = sql_err.into();
        assert_eq!(err.code(), "INT-2102");
    }

    #[test]
    fn from_toml_error() {
        let toml_err = toml::from_str::<toml::Value>("= invalid").unwrap_err();
        let err: IntakeError = toml_err.into();
        assert_eq!(err.code(), "INT-1003");
    }

    #[test]
    fn reason_codes_round_trip_through_parse() {
        for reason in DeadLetterReason::ALL {
            assert_eq!(DeadLetterReason::parse(reason.as_str()), Some(reason));
        }
        assert_eq!(DeadLetterReason::parse("unsupported_type"), None);
    }

    #[test]
    fn each_stage_error_maps_to_its_own_reason() {
        let stages = [
            StageError::InvalidPath {
                path: "acme/file.txt".to_string(),
                details: String::new(),
            },
            StageError::TenantNotFound {
                slug: "acme".to_string(),
            },
            StageError::CaseTenantMismatch {
                case_id: String::new(),
                slug: String::new(),
            },
            StageError::SnapshotFailed {
                attempts: 3,
                last_error: String::new(),
            },
            StageError::UpsertFailed {
                details: String::new(),
            },
            StageError::FileTooLarge { size: 2, limit: 1 },
            StageError::FileChanged {
                details: String::new(),
            },
            StageError::MoveFailed {
                dest: PathBuf::new(),
                details: String::new(),
            },
        ];
        let reasons: std::collections::HashSet<_> = stages.iter().map(StageError::reason).collect();
        assert_eq!(reasons.len(), DeadLetterReason::ALL.len());
    }

    #[test]
    fn sql_errors_become_upsert_failures() {
        let stage: StageError = IntakeError::Sql {
            context: "rusqlite",
            details: "FOREIGN KEY constraint failed".to_string(),
        }
        .into();
        assert_eq!(stage.reason(), DeadLetterReason::UpsertFailed);
        assert!(stage.to_string().contains("FOREIGN KEY"));
    }
}
