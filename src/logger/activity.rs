//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Scheduler and worker threads
//! send [`ActivityEvent`]s over a bounded crossbeam channel with `try_send`, so
//! file processing is never blocked by logging back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{DeadLetterReason, IntakeError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Attributes shared by per-file events.
#[derive(Debug, Clone, Default)]
pub struct FileTrace {
    pub trace_id: String,
    /// Path relative to the inbox root.
    pub path: String,
    pub tenant: Option<String>,
    pub case_id: Option<String>,
    pub drop_id: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ActivityEvent {
    WatcherStarted {
        version: String,
        config_hash: String,
        inbox_root: String,
    },
    WatcherStopped {
        reason: String,
        uptime_secs: u64,
    },
    ScanCompleted {
        candidates: usize,
        submitted: usize,
        ignored: usize,
        evicted: usize,
        duration_ms: u64,
    },
    ArtifactCreated {
        file: FileTrace,
        sha256: String,
        size_bytes: u64,
        s3_uri: String,
        artifact_id: String,
        task_id: String,
        duration_ms: u64,
    },
    ArtifactExists {
        file: FileTrace,
        sha256: String,
        size_bytes: u64,
        s3_uri: String,
        duration_ms: u64,
    },
    DeadLettered {
        file: FileTrace,
        reason: DeadLetterReason,
        message: String,
    },
    /// Attempt ended without a terminal outcome; the file is reconsidered later.
    FileDeferred {
        file: FileTrace,
        details: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel to stop the logger thread.
    Shutdown,
}

impl ActivityEvent {
    /// Build an `Error` event from an internal error.
    pub fn from_error(err: &IntakeError) -> Self {
        Self::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Cloneable, non-blocking sender for activity events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event; drops it and bumps the counter if the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }

    /// A handle whose events go nowhere.
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// Options for the activity logger.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    /// Stamped on every line.
    pub run_id: String,
    pub channel_capacity: usize,
}

impl ActivityLoggerConfig {
    pub fn new(jsonl: JsonlConfig, run_id: impl Into<String>) -> Self {
        Self {
            jsonl,
            run_id: run_id.into(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread. It runs until `shutdown()` or all handles drop.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("intake-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config, &dropped_clone))
        .map_err(|e| IntakeError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

#[allow(clippy::needless_pass_by_value)]
fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    config: ActivityLoggerConfig,
    dropped: &AtomicU64,
) {
    let mut jsonl = JsonlWriter::open(config.jsonl);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.run_id = Some(config.run_id.clone());
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        match event {
            ActivityEvent::Shutdown => break,
            ActivityEvent::ScanCompleted { .. } => {
                // Once per cycle is often enough to climb back from a fallback.
                jsonl.try_recover();
            }
            _ => {}
        }

        let mut entry = event_to_log_entry(&event);
        entry.run_id = Some(config.run_id.clone());
        jsonl.write_entry(&entry);
        if rx.is_empty() {
            jsonl.flush();
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

fn with_file(mut e: LogEntry, file: &FileTrace) -> LogEntry {
    e.trace_id = Some(file.trace_id.clone());
    e.path = Some(file.path.clone());
    e.tenant.clone_from(&file.tenant);
    e.case_id.clone_from(&file.case_id);
    e.drop_id.clone_from(&file.drop_id);
    e
}

fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::WatcherStarted {
            version,
            config_hash,
            inbox_root,
        } => {
            let mut e = LogEntry::new(EventType::WatcherStart, Severity::Info);
            e.path = Some(inbox_root.clone());
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::WatcherStopped {
            reason,
            uptime_secs,
        } => {
            let mut e = LogEntry::new(EventType::WatcherStop, Severity::Info);
            e.details = Some(format!("reason={reason} uptime={uptime_secs}s"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::ScanCompleted {
            candidates,
            submitted,
            ignored,
            evicted,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::ScanComplete, Severity::Info);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!(
                "candidates={candidates} submitted={submitted} ignored={ignored} evicted={evicted}"
            ));
            e
        }
        ActivityEvent::ArtifactCreated {
            file,
            sha256,
            size_bytes,
            s3_uri,
            artifact_id,
            task_id,
            duration_ms,
        } => {
            let mut e = with_file(
                LogEntry::new(EventType::ArtifactCreated, Severity::Info),
                file,
            );
            e.sha256 = Some(sha256.clone());
            e.size = Some(*size_bytes);
            e.s3_uri = Some(s3_uri.clone());
            e.artifact_id = Some(artifact_id.clone());
            e.task_id = Some(task_id.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::ArtifactExists {
            file,
            sha256,
            size_bytes,
            s3_uri,
            duration_ms,
        } => {
            let mut e = with_file(
                LogEntry::new(EventType::ArtifactExists, Severity::Info),
                file,
            );
            e.sha256 = Some(sha256.clone());
            e.size = Some(*size_bytes);
            e.s3_uri = Some(s3_uri.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::DeadLettered {
            file,
            reason,
            message,
        } => {
            let mut e = with_file(
                LogEntry::new(EventType::DeadLettered, Severity::Warning),
                file,
            );
            e.reason = Some(reason.as_str().to_string());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::FileDeferred { file, details } => {
            let mut e = with_file(
                LogEntry::new(EventType::FileDeferred, Severity::Info),
                file,
            );
            e.details = Some(details.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::WatcherStop, Severity::Info),
    }
}
