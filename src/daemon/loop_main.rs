//! Scan loop: enumerate the inbox, track stability, feed the worker pool.
//!
//! Architecture: one coordinating thread (the caller of [`IntakeWatcher::run`])
//! plus a fixed worker pool and the logger thread, all connected by crossbeam
//! channels. The coordinator owns the stability map, change-retry counters and
//! the abandoned set outright; workers only see the shared in-flight set.
//!
//! Each cycle submits every newly stable file, then waits for all of them
//! before evicting state for paths that disappeared. The next cycle starts
//! `scan_interval` after the previous one began, or immediately if processing
//! overran it.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::core::config::Config;
use crate::core::errors::{IntakeError, Result, StageError};
use crate::core::paths::{resolve_absolute_path, resolve_within_root, to_slash, to_slash_utf8};
use crate::daemon::metrics::IntakeMetrics;
use crate::daemon::signals::SignalHandler;
use crate::daemon::worker::{
    FileJob, FileOutcome, Hasher, InFlight, JobResult, PipelineContext, WorkerPool,
};
use crate::db::IntakeDb;
use crate::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, ActivityLoggerHandle, FileTrace, spawn_logger,
};
use crate::logger::jsonl::JsonlConfig;
use crate::scanner::hasher::fingerprint;
use crate::scanner::patterns::IgnoreMatcher;
use crate::scanner::stability::{FileSignature, StabilityTracker};
use crate::scanner::walker::collect_candidates;
use crate::storage::object_store::{FsObjectStore, ObjectStore};

/// Tally of one scan cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub candidates: usize,
    pub ignored: usize,
    pub submitted: usize,
    pub created: usize,
    pub duplicates: usize,
    pub dead_lettered: usize,
    pub change_retries: usize,
    pub deferred: usize,
    /// Tracking entries dropped because their path disappeared.
    pub evicted: usize,
    pub duration: Duration,
}

/// The intake watcher: owns the scheduler state, the worker pool and the logger.
pub struct IntakeWatcher {
    config: Config,
    root: PathBuf,
    matcher: IgnoreMatcher,
    stability: StabilityTracker,
    change_attempts: HashMap<PathBuf, u32>,
    abandoned: HashMap<PathBuf, FileSignature>,
    in_flight: Arc<InFlight>,
    pool: Option<WorkerPool>,
    ctx: Arc<PipelineContext>,
    logger: ActivityLoggerHandle,
    logger_join: Option<thread::JoinHandle<()>>,
    run_id: String,
    start_time: Instant,
}

impl IntakeWatcher {
    /// Build a watcher backed by the directory object store from `config`.
    pub fn init(config: Config) -> Result<Self> {
        let store: Arc<dyn ObjectStore> =
            Arc::new(FsObjectStore::new(config.snapshot.object_store_root.clone()));
        Self::with_store(config, store)
    }

    /// Build a watcher that uploads through `store`.
    pub fn with_store(config: Config, store: Arc<dyn ObjectStore>) -> Result<Self> {
        Self::build(config, store, fingerprint)
    }

    fn build(config: Config, store: Arc<dyn ObjectStore>, hasher: Hasher) -> Result<Self> {
        config.validate()?;
        let start_time = Instant::now();
        let run_id = uuid::Uuid::new_v4().simple().to_string();

        // 1. Inbox root and schema.
        fs::create_dir_all(&config.watcher.inbox_root)
            .map_err(|err| IntakeError::io(&config.watcher.inbox_root, err))?;
        let root = resolve_absolute_path(&config.watcher.inbox_root);
        IntakeDb::initialize(&config.paths.database)?;

        // 2. Logger.
        let logger_config = ActivityLoggerConfig::new(
            JsonlConfig::for_path(config.paths.activity_log.clone()),
            run_id.clone(),
        );
        let (logger, logger_join) = spawn_logger(logger_config)?;

        // 3. Scheduler state.
        let matcher = IgnoreMatcher::new(
            &config.watcher.ignore_glob,
            &config.watcher.processed_dir_name,
        )?;
        let stability = StabilityTracker::new(config.watcher.stability_window());

        // 4. Worker pool.
        let metrics = Arc::new(IntakeMetrics::new());
        let mut ctx = PipelineContext::from_config(
            &config,
            root.clone(),
            store,
            metrics,
            logger.clone(),
        );
        ctx.hasher = hasher;
        let ctx = Arc::new(ctx);
        let in_flight = Arc::new(InFlight::default());
        let pool = WorkerPool::spawn(
            config.watcher.max_concurrency,
            Arc::clone(&ctx),
            Arc::clone(&in_flight),
        )?;

        logger.send(ActivityEvent::WatcherStarted {
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: config.stable_hash().unwrap_or_default(),
            inbox_root: root.display().to_string(),
        });

        Ok(Self {
            config,
            root,
            matcher,
            stability,
            change_attempts: HashMap::new(),
            abandoned: HashMap::new(),
            in_flight,
            pool: Some(pool),
            ctx,
            logger,
            logger_join: Some(logger_join),
            run_id,
            start_time,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Resolved inbox root.
    pub fn inbox_root(&self) -> &Path {
        &self.root
    }

    pub fn metrics(&self) -> &IntakeMetrics {
        &self.ctx.metrics
    }

    /// Paths waiting out the stability window.
    pub fn tracked(&self) -> usize {
        self.stability.len()
    }

    /// Paths that will not be retried until their signature changes.
    pub fn abandoned(&self) -> usize {
        self.abandoned.len()
    }

    /// Run scan cycles until `signals` requests shutdown, then drain and stop.
    pub fn run(&mut self, signals: &SignalHandler) -> Result<()> {
        let interval = self.config.watcher.scan_interval();
        loop {
            if signals.should_shutdown() {
                break;
            }
            let started = Instant::now();
            if let Err(err) = self.scan_once() {
                self.logger.send(ActivityEvent::from_error(&err));
                eprintln!("[INTAKE-WATCHER] scan cycle failed: {err}");
            }
            if signals.wait_timeout(interval.saturating_sub(started.elapsed())) {
                break;
            }
        }
        self.stop("shutdown requested");
        Ok(())
    }

    /// A single pass for a fresh watcher: observe everything, wait out the
    /// stability window, then process whatever held still. Returns the report
    /// of the processing cycle.
    pub fn pass_once(&mut self) -> Result<ScanReport> {
        self.scan_once()?;
        thread::sleep(self.config.watcher.stability_window());
        self.scan_once()
    }

    /// One full cycle: enumerate, submit stable files, wait for them, evict.
    pub fn scan_once(&mut self) -> Result<ScanReport> {
        let started = Instant::now();
        let candidates = collect_candidates(&self.root, &self.config.watcher.processed_dir_name)?;
        let now = Instant::now();

        let mut report = ScanReport {
            candidates: candidates.len(),
            ..ScanReport::default()
        };
        let mut present: HashSet<PathBuf> = HashSet::with_capacity(candidates.len());
        // Resolved paths already considered this cycle; aliases count once.
        let mut considered: HashSet<PathBuf> = HashSet::with_capacity(candidates.len());

        for candidate in &candidates {
            present.insert(candidate.path.clone());
            if self.matcher.is_ignored(&candidate.rel_path) {
                report.ignored += 1;
                continue;
            }

            let Some(resolved) = resolve_within_root(&candidate.path, &self.root) else {
                self.reject_at_scan(
                    &candidate.path,
                    &candidate.rel_path,
                    "resolves outside the inbox root",
                    &mut report,
                );
                continue;
            };
            present.insert(resolved.clone());
            if !considered.insert(resolved.clone()) {
                continue;
            }

            let Ok(rel) = resolved.strip_prefix(&self.root) else {
                continue;
            };
            let Some(rel_path) = to_slash_utf8(rel) else {
                let lossy = to_slash(rel);
                if self.matcher.is_ignored(&lossy) {
                    report.ignored += 1;
                } else {
                    // Lossy names collide in the processed mirror.
                    self.reject_at_scan(
                        &resolved,
                        &lossy,
                        "path is not valid UTF-8",
                        &mut report,
                    );
                }
                continue;
            };
            if self.matcher.is_ignored(&rel_path) {
                report.ignored += 1;
                continue;
            }
            if self.in_flight.contains(&resolved) {
                continue;
            }

            // Vanished since the walk; the next cycle evicts it.
            let Ok(meta) = fs::metadata(&resolved) else {
                continue;
            };
            let signature = FileSignature::from_metadata(&meta);
            if self.abandoned.get(&resolved) == Some(&signature) {
                continue;
            }
            self.abandoned.remove(&resolved);

            if !self.stability.observe(&resolved, signature, now) {
                continue;
            }
            if !self.in_flight.try_claim(&resolved) {
                continue;
            }

            let job = FileJob {
                prior_change_attempts: self.change_attempts.get(&resolved).copied().unwrap_or(0),
                path: resolved,
                rel_path,
                signature,
            };
            let path = job.path.clone();
            if let Err(err) = self.submit(job) {
                self.in_flight.release(&path);
                return Err(err);
            }
            report.submitted += 1;
        }

        for _ in 0..report.submitted {
            let result = self.recv_result()?;
            self.apply(result, &mut report);
        }

        report.evicted = self.evict_missing(&present);
        report.duration = started.elapsed();

        if let Err(err) = self.ctx.metrics.write_snapshot(&self.config.paths.metrics_file) {
            self.logger.send(ActivityEvent::from_error(&err));
        }
        self.logger.send(ActivityEvent::ScanCompleted {
            candidates: report.candidates,
            submitted: report.submitted,
            ignored: report.ignored,
            evicted: report.evicted,
            duration_ms: u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
        });
        Ok(report)
    }

    /// Drain the pool, log the stop and flush the logger. Idempotent.
    pub fn stop(&mut self, reason: &str) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        pool.shutdown();

        let uptime_secs = self.start_time.elapsed().as_secs();
        self.logger.send(ActivityEvent::WatcherStopped {
            reason: reason.to_string(),
            uptime_secs,
        });
        self.logger.shutdown();
        if let Some(join) = self.logger_join.take() {
            let _ = join.join();
        }
        eprintln!("[INTAKE-WATCHER] stopped: {reason} (uptime={uptime_secs}s)");
    }

    fn submit(&self, job: FileJob) -> Result<()> {
        self.pool
            .as_ref()
            .ok_or(IntakeError::ChannelClosed {
                component: "worker_pool",
            })?
            .submit(job)
    }

    fn recv_result(&self) -> Result<JobResult> {
        self.pool
            .as_ref()
            .ok_or(IntakeError::ChannelClosed {
                component: "worker_pool",
            })?
            .recv_result()
    }

    /// Dead-letter a path as `invalid_path` without handing it to a worker,
    /// then abandon it until its signature changes.
    fn reject_at_scan(
        &mut self,
        path: &Path,
        rel_path: &str,
        details: &str,
        report: &mut ScanReport,
    ) {
        let signature = fs::metadata(path)
            .ok()
            .map(|meta| FileSignature::from_metadata(&meta));
        if let Some(sig) = signature
            && self.abandoned.get(path) == Some(&sig)
        {
            return;
        }

        let trace = FileTrace {
            trace_id: uuid::Uuid::new_v4().simple().to_string(),
            path: rel_path.to_string(),
            ..FileTrace::default()
        };
        let err = StageError::InvalidPath {
            path: rel_path.to_string(),
            details: details.to_string(),
        };
        self.ctx.dead_letter(None, &trace, &err);
        report.dead_lettered += 1;

        if let Some(sig) = signature {
            self.abandoned.insert(path.to_path_buf(), sig);
        }
    }

    fn apply(&mut self, result: JobResult, report: &mut ScanReport) {
        self.stability.forget(&result.path);

        match &result.outcome {
            FileOutcome::ChangeRetry { attempts } => {
                report.change_retries += 1;
                self.change_attempts.insert(result.path, *attempts);
                return;
            }
            FileOutcome::Created { .. } => report.created += 1,
            FileOutcome::Duplicate { .. } => report.duplicates += 1,
            FileOutcome::DeadLettered { .. } => report.dead_lettered += 1,
            FileOutcome::Deferred => report.deferred += 1,
        }
        self.change_attempts.remove(&result.path);

        if result.outcome.abandons() {
            let signature = fs::metadata(&result.path)
                .map_or(result.signature, |meta| FileSignature::from_metadata(&meta));
            self.abandoned.insert(result.path, signature);
        }
    }

    fn evict_missing(&mut self, present: &HashSet<PathBuf>) -> usize {
        let attempts_before = self.change_attempts.len();
        let abandoned_before = self.abandoned.len();
        self.change_attempts.retain(|path, _| present.contains(path));
        self.abandoned.retain(|path, _| present.contains(path));
        self.stability.retain_present(present)
            + (attempts_before - self.change_attempts.len())
            + (abandoned_before - self.abandoned.len())
    }
}

impl Drop for IntakeWatcher {
    fn drop(&mut self) {
        self.stop("watcher dropped");
    }
}
