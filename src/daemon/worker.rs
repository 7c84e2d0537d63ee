//! Per-file intake pipeline and the fixed-size worker pool that runs it.
//!
//! Each job is one file, processed end to end on one worker thread:
//! classify, hash, authorize, snapshot, register, relocate. Every stage failure
//! becomes exactly one dead-letter row plus one `errors_total` increment; no
//! error escapes the worker.

#![allow(missing_docs)]

use std::collections::HashSet;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;

use crate::core::config::Config;
use crate::core::errors::{DeadLetterReason, IntakeError, Result, StageError};
use crate::daemon::metrics::IntakeMetrics;
use crate::db::IntakeDb;
use crate::db::registrar::{NewArtifact, Registration};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle, FileTrace};
use crate::scanner::classify::{DropPath, classify};
use crate::scanner::hasher::{Fingerprint, fingerprint, verify_unchanged};
use crate::scanner::stability::FileSignature;
use crate::storage::object_store::ObjectStore;
use crate::storage::snapshot::{RetryPolicy, snapshot_file};

/// Hashing stage: digest a file under a size cap.
pub type Hasher = fn(&Path, u64) -> std::result::Result<Fingerprint, StageError>;

/// Everything a worker needs, shared read-only across the pool.
pub struct PipelineContext {
    /// Resolved inbox root.
    pub inbox_root: PathBuf,
    pub processed_dir: String,
    pub max_file_bytes: u64,
    pub change_attempt_limit: u32,
    pub bucket: String,
    pub retry: RetryPolicy,
    pub database: PathBuf,
    pub store: Arc<dyn ObjectStore>,
    pub hasher: Hasher,
    pub metrics: Arc<IntakeMetrics>,
    pub logger: ActivityLoggerHandle,
}

impl PipelineContext {
    pub fn from_config(
        config: &Config,
        inbox_root: PathBuf,
        store: Arc<dyn ObjectStore>,
        metrics: Arc<IntakeMetrics>,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            inbox_root,
            processed_dir: config.watcher.processed_dir_name.clone(),
            max_file_bytes: config.watcher.max_file_bytes,
            change_attempt_limit: config.watcher.file_change_attempt_limit,
            bucket: config.snapshot.bucket.clone(),
            retry: RetryPolicy {
                retries: config.snapshot.retries,
                backoff: config.snapshot.backoff(),
            },
            database: config.paths.database.clone(),
            store,
            hasher: fingerprint,
            metrics,
            logger,
        }
    }

    /// Record a terminal failure: one dead-letter row, one error count, one log line.
    ///
    /// Uses `db` when the attempt already holds a connection, else opens one.
    pub fn dead_letter(
        &self,
        db: Option<&IntakeDb>,
        trace: &FileTrace,
        err: &StageError,
    ) -> FileOutcome {
        let reason = err.reason();
        self.metrics.inc_error(reason);

        let written = match db {
            Some(db) => db.dead_letter_stage(&trace.path, err),
            None => IntakeDb::open(&self.database).and_then(|db| db.dead_letter_stage(&trace.path, err)),
        };
        if let Err(write_err) = written {
            self.logger.send(ActivityEvent::from_error(&write_err));
        }

        self.logger.send(ActivityEvent::DeadLettered {
            file: trace.clone(),
            reason,
            message: err.to_string(),
        });
        FileOutcome::DeadLettered { reason }
    }

    /// The file moved under us. Below the ceiling the attempt is retried on a
    /// later cycle; at the ceiling it is dead-lettered.
    fn change_retry(
        &self,
        db: Option<&IntakeDb>,
        trace: &FileTrace,
        prior_attempts: u32,
        details: &str,
    ) -> FileOutcome {
        let attempts = prior_attempts.saturating_add(1);
        if attempts >= self.change_attempt_limit {
            let err = StageError::FileChanged {
                details: format!("{details} (attempt {attempts})"),
            };
            return self.dead_letter(db, trace, &err);
        }
        self.logger.send(ActivityEvent::FileDeferred {
            file: trace.clone(),
            details: format!(
                "changed during intake, attempt {attempts}/{}: {details}",
                self.change_attempt_limit
            ),
        });
        FileOutcome::ChangeRetry { attempts }
    }
}

/// One stable file handed to the pool.
#[derive(Debug, Clone)]
pub struct FileJob {
    /// Resolved absolute path.
    pub path: PathBuf,
    /// `/`-separated path relative to the inbox root.
    pub rel_path: String,
    /// Signature observed when the file was declared stable.
    pub signature: FileSignature,
    /// Hash-time races already seen for this path.
    pub prior_change_attempts: u32,
}

/// How one processing attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Created {
        artifact_id: String,
        task_id: String,
        moved: bool,
    },
    /// Content already registered for this case.
    Duplicate { moved: bool },
    DeadLettered { reason: DeadLetterReason },
    /// File changed or vanished while hashing; below the attempt ceiling.
    ChangeRetry { attempts: u32 },
    /// No terminal outcome (database unreachable, worker panic); retried later.
    Deferred,
}

impl FileOutcome {
    /// Whether retrying without the file itself changing is pointless.
    pub fn abandons(&self) -> bool {
        matches!(
            self,
            Self::DeadLettered {
                reason: DeadLetterReason::InvalidPath
                    | DeadLetterReason::FileTooLarge
                    | DeadLetterReason::FileChangedOrMissing
            }
        )
    }
}

/// Result of a job, sent back to the scheduler.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub path: PathBuf,
    pub signature: FileSignature,
    pub outcome: FileOutcome,
}

/// Process one file with the context's hasher.
pub fn process_file(ctx: &PipelineContext, job: &FileJob) -> FileOutcome {
    process_file_with(ctx, job, ctx.hasher)
}

fn process_file_with<H>(ctx: &PipelineContext, job: &FileJob, hash: H) -> FileOutcome
where
    H: FnOnce(&Path, u64) -> std::result::Result<Fingerprint, StageError>,
{
    let started = Instant::now();
    let mut trace = FileTrace {
        trace_id: uuid::Uuid::new_v4().simple().to_string(),
        path: job.rel_path.clone(),
        ..FileTrace::default()
    };
    let outcome = run_stages(ctx, job, &mut trace, hash, started);
    ctx.metrics.scan_seconds.observe(started.elapsed());
    outcome
}

fn run_stages<H>(
    ctx: &PipelineContext,
    job: &FileJob,
    trace: &mut FileTrace,
    hash: H,
    started: Instant,
) -> FileOutcome
where
    H: FnOnce(&Path, u64) -> std::result::Result<Fingerprint, StageError>,
{
    let parsed = match classify(&job.rel_path) {
        Ok(parsed) => parsed,
        Err(err) => return ctx.dead_letter(None, trace, &err),
    };
    trace.tenant = Some(parsed.tenant.clone());
    trace.case_id = Some(parsed.case_id.clone());
    trace.drop_id = Some(parsed.drop_id.clone());
    ctx.metrics.inc_files_seen();

    let fp = match hash(&job.path, ctx.max_file_bytes) {
        Ok(fp) => fp,
        Err(StageError::FileChanged { details }) => {
            return ctx.change_retry(None, trace, job.prior_change_attempts, &details);
        }
        Err(err) => return ctx.dead_letter(None, trace, &err),
    };

    let mut db = match IntakeDb::open(&ctx.database) {
        Ok(db) => db,
        Err(err) => {
            ctx.logger.send(ActivityEvent::from_error(&err));
            ctx.logger.send(ActivityEvent::FileDeferred {
                file: trace.clone(),
                details: "database unavailable".to_string(),
            });
            return FileOutcome::Deferred;
        }
    };

    let (s3_uri, registration) = match authorize_and_register(ctx, &mut db, job, &parsed, &fp) {
        Ok(done) => done,
        Err(StageError::FileChanged { details }) => {
            return ctx.change_retry(Some(&db), trace, job.prior_change_attempts, &details);
        }
        Err(err) => return ctx.dead_letter(Some(&db), trace, &err),
    };

    let dest = parsed.processed_path(&ctx.inbox_root, &ctx.processed_dir);
    let moved = match relocate(&job.path, &dest) {
        Ok(()) => true,
        Err(err) => {
            ctx.dead_letter(Some(&db), trace, &err);
            false
        }
    };

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    match registration {
        Registration::Created {
            artifact_id,
            task_id,
        } => {
            ctx.metrics.inc_artifact_created(&parsed.tenant);
            ctx.logger.send(ActivityEvent::ArtifactCreated {
                file: trace.clone(),
                sha256: fp.sha256,
                size_bytes: fp.size_bytes,
                s3_uri,
                artifact_id: artifact_id.clone(),
                task_id: task_id.clone(),
                duration_ms,
            });
            FileOutcome::Created {
                artifact_id,
                task_id,
                moved,
            }
        }
        Registration::Duplicate => {
            ctx.logger.send(ActivityEvent::ArtifactExists {
                file: trace.clone(),
                sha256: fp.sha256,
                size_bytes: fp.size_bytes,
                s3_uri,
                duration_ms,
            });
            FileOutcome::Duplicate { moved }
        }
    }
}

fn authorize_and_register(
    ctx: &PipelineContext,
    db: &mut IntakeDb,
    job: &FileJob,
    parsed: &DropPath,
    fp: &Fingerprint,
) -> std::result::Result<(String, Registration), StageError> {
    let tenant_id = db.authorize(&parsed.tenant, &parsed.case_id)?;

    let upload_started = Instant::now();
    let uploaded = snapshot_file(
        ctx.store.as_ref(),
        &ctx.bucket,
        &fp.sha256,
        &job.path,
        ctx.retry,
    );
    ctx.metrics.snapshot_seconds.observe(upload_started.elapsed());
    let s3_uri = uploaded?;
    // The upload re-reads the source. If it moved since hashing, the object
    // under this digest is not trusted; nothing references it until a later
    // upload of the same digest rewrites it.
    verify_unchanged(&job.path, fp.signature)?;

    let registration = db.register_artifact(&NewArtifact {
        tenant_id: &tenant_id,
        case_id: &parsed.case_id,
        drop_id: &parsed.drop_id,
        filename: &parsed.filename,
        src_path: &job.rel_path,
        s3_uri: &s3_uri,
        sha256: &fp.sha256,
        size_bytes: fp.size_bytes,
    })?;
    Ok((s3_uri, registration))
}

/// Move `src` into the processed mirror, creating parent directories.
pub fn relocate(src: &Path, dest: &Path) -> std::result::Result<(), StageError> {
    let fail = |err: std::io::Error| StageError::MoveFailed {
        dest: dest.to_path_buf(),
        details: err.to_string(),
    };
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(fail)?;
    }
    fs::rename(src, dest).map_err(fail)
}

// ──────────────────── in-flight set ────────────────────

/// Paths currently owned by a worker. A path is claimed by the scheduler
/// before submission and released by the worker before it reports back.
#[derive(Debug, Default)]
pub struct InFlight {
    paths: Mutex<HashSet<PathBuf>>,
}

impl InFlight {
    /// Claim `path`; `false` if another attempt already holds it.
    pub fn try_claim(&self, path: &Path) -> bool {
        self.paths.lock().insert(path.to_path_buf())
    }

    pub fn release(&self, path: &Path) {
        self.paths.lock().remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }
}

struct ClaimGuard<'a> {
    in_flight: &'a InFlight,
    path: &'a Path,
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.release(self.path);
    }
}

// ──────────────────── worker pool ────────────────────

/// Fixed pool of worker threads fed by a bounded job queue.
pub struct WorkerPool {
    job_tx: Option<Sender<FileJob>>,
    result_rx: Receiver<JobResult>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        size: usize,
        ctx: Arc<PipelineContext>,
        in_flight: Arc<InFlight>,
    ) -> Result<Self> {
        let size = size.max(1);
        let (job_tx, job_rx) = bounded::<FileJob>(size * 2);
        let (result_tx, result_rx) = unbounded::<JobResult>();

        let mut handles = Vec::with_capacity(size);
        for i in 0..size {
            let rx = job_rx.clone();
            let tx = result_tx.clone();
            let ctx = Arc::clone(&ctx);
            let in_flight = Arc::clone(&in_flight);
            let handle = thread::Builder::new()
                .name(format!("intake-worker-{i}"))
                .spawn(move || worker_main(&rx, &tx, &ctx, &in_flight))
                .map_err(|e| IntakeError::Runtime {
                    details: format!("failed to spawn worker thread: {e}"),
                })?;
            handles.push(handle);
        }

        Ok(Self {
            job_tx: Some(job_tx),
            result_rx,
            handles,
        })
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Queue a job; blocks while the queue is full.
    pub fn submit(&self, job: FileJob) -> Result<()> {
        self.job_tx
            .as_ref()
            .ok_or(IntakeError::ChannelClosed {
                component: "worker_pool",
            })?
            .send(job)
            .map_err(|_| IntakeError::ChannelClosed {
                component: "worker_pool",
            })
    }

    /// Wait for the next finished job.
    pub fn recv_result(&self) -> Result<JobResult> {
        self.result_rx.recv().map_err(|_| IntakeError::ChannelClosed {
            component: "worker_pool",
        })
    }

    /// Close the queue and join every worker once it has drained.
    pub fn shutdown(mut self) {
        self.job_tx = None;
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_main(
    rx: &Receiver<FileJob>,
    tx: &Sender<JobResult>,
    ctx: &PipelineContext,
    in_flight: &InFlight,
) {
    while let Ok(job) = rx.recv() {
        let outcome = {
            let _claim = ClaimGuard {
                in_flight,
                path: &job.path,
            };
            panic::catch_unwind(AssertUnwindSafe(|| process_file(ctx, &job))).unwrap_or_else(
                |_| {
                    ctx.logger.send(ActivityEvent::Error {
                        code: "INT-3900".to_string(),
                        message: format!("worker panicked processing {}", job.rel_path),
                    });
                    FileOutcome::Deferred
                },
            )
        };
        let result = JobResult {
            path: job.path,
            signature: job.signature,
            outcome,
        };
        if tx.send(result).is_err() {
            break;
        }
    }
}
