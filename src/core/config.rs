//! Configuration system: TOML file + env var overrides + smart defaults.

#![allow(missing_docs)]

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::errors::{IntakeError, Result};

/// Full intake configuration model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct Config {
    pub watcher: WatcherConfig,
    pub snapshot: SnapshotConfig,
    pub paths: PathsConfig,
}

/// Scan loop, stability, and worker pool knobs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WatcherConfig {
    /// Root of the watched drop hierarchy.
    pub inbox_root: PathBuf,
    pub scan_interval_secs: u64,
    /// Size and mtime must hold still this long before a file is read.
    pub file_stable_secs: u64,
    pub max_concurrency: usize,
    pub max_file_bytes: u64,
    /// Comma-separated gitignore-style globs, relative to `inbox_root`.
    pub ignore_glob: String,
    /// Hash-time change/missing races tolerated before a file is dead-lettered.
    pub file_change_attempt_limit: u32,
    /// Reserved sibling directory holding the processed mirror.
    pub processed_dir_name: String,
}

/// Object storage target and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SnapshotConfig {
    pub bucket: String,
    pub retries: u32,
    pub backoff_ms: u64,
    /// Directory backing the object store; each bucket is a subdirectory.
    pub object_store_root: PathBuf,
}

/// Filesystem locations for state owned by the service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PathsConfig {
    pub config_file: PathBuf,
    pub database: PathBuf,
    pub activity_log: PathBuf,
    pub metrics_file: PathBuf,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            inbox_root: PathBuf::from("./inbox"),
            scan_interval_secs: 5,
            file_stable_secs: 2,
            max_concurrency: 4,
            max_file_bytes: 50 * 1024 * 1024,
            ignore_glob: "**/*.part,**/~$*,**/*.tmp".to_string(),
            file_change_attempt_limit: 3,
            processed_dir_name: ".processed".to_string(),
        }
    }
}

impl WatcherConfig {
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    #[must_use]
    pub fn stability_window(&self) -> Duration {
        Duration::from_secs(self.file_stable_secs)
    }
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            bucket: "raw".to_string(),
            retries: 2,
            backoff_ms: 100,
            object_store_root: data_dir().join("objects"),
        }
    }
}

impl SnapshotConfig {
    #[must_use]
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        let home_dir = home_dir();
        let data = data_dir();
        Self {
            config_file: home_dir.join(".config").join("intake").join("config.toml"),
            database: data.join("intake.sqlite3"),
            activity_log: data.join("activity.jsonl"),
            metrics_file: data.join("metrics.json"),
        }
    }
}

fn home_dir() -> PathBuf {
    env::var_os("HOME").map_or_else(
        || {
            eprintln!("[INT-CONFIG] WARNING: HOME not set, falling back to /tmp for data paths");
            PathBuf::from("/tmp")
        },
        PathBuf::from,
    )
}

fn data_dir() -> PathBuf {
    home_dir().join(".local").join("share").join("intake")
}

impl Config {
    /// Default configuration path.
    #[must_use]
    pub fn default_path() -> PathBuf {
        PathsConfig::default().config_file
    }

    /// Load config from default or explicit path, then apply env overrides.
    ///
    /// Missing config file is not an error when loading from default path; defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path_buf = path.map_or_else(Self::default_path, Path::to_path_buf);
        let is_explicit_path = path.is_some();

        let mut cfg = if path_buf.exists() {
            let raw = fs::read_to_string(&path_buf).map_err(|source| IntakeError::Io {
                path: path_buf.clone(),
                source,
            })?;
            toml::from_str::<Self>(&raw)?
        } else if is_explicit_path {
            return Err(IntakeError::MissingConfig { path: path_buf });
        } else {
            Self::default()
        };

        cfg.paths.config_file = path_buf;
        cfg.apply_env_overrides_from(env_var)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Deterministic hash of the effective config for logging.
    ///
    /// FNV-1a over the canonical JSON form, stable across processes.
    pub fn stable_hash(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)?;
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in canonical.as_bytes() {
            hash ^= u64::from(*byte);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        Ok(format!("{hash:016x}"))
    }

    fn apply_env_overrides_from<F>(&mut self, mut lookup: F) -> Result<()>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let w = &mut self.watcher;
        if let Some(raw) = lookup("INTAKE_INBOX_ROOT") {
            w.inbox_root = PathBuf::from(raw);
        }
        set_parsed(&mut lookup, "INTAKE_SCAN_INTERVAL_SECONDS", &mut w.scan_interval_secs)?;
        set_parsed(&mut lookup, "INTAKE_FILE_STABLE_SECONDS", &mut w.file_stable_secs)?;
        set_parsed(&mut lookup, "INTAKE_MAX_CONCURRENCY", &mut w.max_concurrency)?;
        set_parsed(&mut lookup, "INTAKE_MAX_FILE_BYTES", &mut w.max_file_bytes)?;
        if let Some(raw) = lookup("INTAKE_IGNORE_GLOB") {
            w.ignore_glob = raw;
        }
        set_parsed(
            &mut lookup,
            "INTAKE_FILE_CHANGE_ATTEMPT_LIMIT",
            &mut w.file_change_attempt_limit,
        )?;
        if let Some(raw) = lookup("INTAKE_PROCESSED_DIR_NAME") {
            w.processed_dir_name = raw;
        }

        let s = &mut self.snapshot;
        if let Some(raw) = lookup("INTAKE_BUCKET_RAW") {
            s.bucket = raw;
        }
        set_parsed(&mut lookup, "INTAKE_SNAPSHOT_RETRIES", &mut s.retries)?;
        set_parsed(&mut lookup, "INTAKE_SNAPSHOT_BACKOFF_MS", &mut s.backoff_ms)?;
        if let Some(raw) = lookup("INTAKE_OBJECT_STORE_ROOT") {
            s.object_store_root = PathBuf::from(raw);
        }

        if let Some(raw) = lookup("INTAKE_DATABASE") {
            self.paths.database = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("INTAKE_ACTIVITY_LOG") {
            self.paths.activity_log = PathBuf::from(raw);
        }
        if let Some(raw) = lookup("INTAKE_METRICS_FILE") {
            self.paths.metrics_file = PathBuf::from(raw);
        }
        Ok(())
    }

    /// Check cross-field constraints and that every ignore glob compiles.
    pub fn validate(&self) -> Result<()> {
        let w = &self.watcher;
        if w.max_concurrency == 0 {
            return Err(IntakeError::InvalidConfig {
                details: "watcher.max_concurrency must be >= 1".to_string(),
            });
        }
        if w.max_file_bytes == 0 {
            return Err(IntakeError::InvalidConfig {
                details: "watcher.max_file_bytes must be > 0".to_string(),
            });
        }
        if w.file_change_attempt_limit == 0 {
            return Err(IntakeError::InvalidConfig {
                details: "watcher.file_change_attempt_limit must be >= 1".to_string(),
            });
        }
        let dir = w.processed_dir_name.as_str();
        if dir.is_empty() || dir == "." || dir == ".." || dir.contains(['/', '\\']) {
            return Err(IntakeError::InvalidConfig {
                details: format!(
                    "watcher.processed_dir_name must be a single path segment, got {dir:?}"
                ),
            });
        }
        let bucket = self.snapshot.bucket.as_str();
        if bucket.trim().is_empty() || bucket.contains(['/', '\\']) {
            return Err(IntakeError::InvalidConfig {
                details: format!("snapshot.bucket must be a non-empty name, got {bucket:?}"),
            });
        }
        crate::scanner::patterns::IgnoreMatcher::new(&w.ignore_glob, &w.processed_dir_name)?;
        Ok(())
    }
}

fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|raw| !raw.trim().is_empty())
}

fn set_parsed<F, T>(lookup: &mut F, name: &str, slot: &mut T) -> Result<()>
where
    F: FnMut(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(name) {
        *slot = raw
            .trim()
            .parse::<T>()
            .map_err(|error| IntakeError::ConfigParse {
                context: "env",
                details: format!("{name}={raw:?}: {error}"),
            })?;
    }
    Ok(())
}
