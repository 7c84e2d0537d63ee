//! Watcher metrics: counters and fixed-bucket histograms, exported as a JSON
//! snapshot written atomically (`.tmp` then `rename()`) after every scan cycle.

#![allow(missing_docs)]
#![allow(clippy::cast_precision_loss)]

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{DeadLetterReason, IntakeError, Result};

/// Upper bounds in seconds; a final implicit `+Inf` bucket catches the rest.
pub const DEFAULT_BUCKETS: [f64; 11] = [
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Non-cumulative histogram: each observation lands in exactly one bucket.
#[derive(Debug)]
pub struct Histogram {
    bounds: &'static [f64],
    buckets: Vec<AtomicU64>,
    count: AtomicU64,
    sum_micros: AtomicU64,
}

impl Histogram {
    pub fn new(bounds: &'static [f64]) -> Self {
        Self {
            bounds,
            buckets: (0..=bounds.len()).map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        let idx = self
            .bounds
            .iter()
            .position(|&le| secs <= le)
            .unwrap_or(self.bounds.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.sum_micros.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        let mut buckets: Vec<BucketCount> = self
            .bounds
            .iter()
            .zip(&self.buckets)
            .map(|(&le, n)| BucketCount {
                le: format!("{le}"),
                count: n.load(Ordering::Relaxed),
            })
            .collect();
        buckets.push(BucketCount {
            le: "+Inf".to_string(),
            count: self.buckets[self.bounds.len()].load(Ordering::Relaxed),
        });
        HistogramSnapshot {
            count: self.count(),
            sum_seconds: self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            buckets,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketCount {
    pub le: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub sum_seconds: f64,
    pub buckets: Vec<BucketCount>,
}

/// Point-in-time view of every metric, as written to the metrics file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub ts: String,
    pub files_seen_total: u64,
    pub artifacts_created_total: BTreeMap<String, u64>,
    pub errors_total: BTreeMap<String, u64>,
    pub scan_seconds: HistogramSnapshot,
    pub snapshot_seconds: HistogramSnapshot,
}

/// Shared by the scheduler and every worker.
#[derive(Debug)]
pub struct IntakeMetrics {
    files_seen: AtomicU64,
    artifacts_created: Mutex<BTreeMap<String, u64>>,
    errors: Mutex<BTreeMap<DeadLetterReason, u64>>,
    /// Per-file processing time.
    pub scan_seconds: Histogram,
    /// Object store upload time, retries included.
    pub snapshot_seconds: Histogram,
}

impl Default for IntakeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl IntakeMetrics {
    pub fn new() -> Self {
        Self {
            files_seen: AtomicU64::new(0),
            artifacts_created: Mutex::new(BTreeMap::new()),
            errors: Mutex::new(BTreeMap::new()),
            scan_seconds: Histogram::new(&DEFAULT_BUCKETS),
            snapshot_seconds: Histogram::new(&DEFAULT_BUCKETS),
        }
    }

    pub fn inc_files_seen(&self) {
        self.files_seen.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_artifact_created(&self, tenant: &str) {
        *self
            .artifacts_created
            .lock()
            .entry(tenant.to_string())
            .or_insert(0) += 1;
    }

    pub fn inc_error(&self, reason: DeadLetterReason) {
        *self.errors.lock().entry(reason).or_insert(0) += 1;
    }

    pub fn files_seen(&self) -> u64 {
        self.files_seen.load(Ordering::Relaxed)
    }

    pub fn artifacts_created(&self, tenant: &str) -> u64 {
        self.artifacts_created
            .lock()
            .get(tenant)
            .copied()
            .unwrap_or(0)
    }

    pub fn artifacts_created_total(&self) -> u64 {
        self.artifacts_created.lock().values().sum()
    }

    pub fn errors(&self, reason: DeadLetterReason) -> u64 {
        self.errors.lock().get(&reason).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            files_seen_total: self.files_seen(),
            artifacts_created_total: self.artifacts_created.lock().clone(),
            errors_total: self
                .errors
                .lock()
                .iter()
                .map(|(reason, n)| (reason.as_str().to_string(), *n))
                .collect(),
            scan_seconds: self.scan_seconds.snapshot(),
            snapshot_seconds: self.snapshot_seconds.snapshot(),
        }
    }

    /// Write the snapshot as pretty JSON: write to `.tmp`, then rename.
    pub fn write_snapshot(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        write_atomic(path, json.as_bytes()).map_err(|err| IntakeError::io(path, err))
    }

    pub fn read_snapshot(path: &Path) -> Result<MetricsSnapshot> {
        let raw = fs::read_to_string(path).map_err(|err| IntakeError::io(path, err))?;
        Ok(serde_json::from_str(&raw)?)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }

    let result = (|| {
        {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o644);
            }
            let mut file = opts.open(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_by_label() {
        let m = IntakeMetrics::new();
        m.inc_files_seen();
        m.inc_files_seen();
        m.inc_artifact_created("acme");
        m.inc_artifact_created("acme");
        m.inc_artifact_created("globex");
        m.inc_error(DeadLetterReason::InvalidPath);

        assert_eq!(m.files_seen(), 2);
        assert_eq!(m.artifacts_created("acme"), 2);
        assert_eq!(m.artifacts_created_total(), 3);
        assert_eq!(m.errors(DeadLetterReason::InvalidPath), 1);
        assert_eq!(m.errors(DeadLetterReason::MoveFailed), 0);
    }

    #[test]
    fn histogram_places_observations_in_buckets() {
        let h = Histogram::new(&DEFAULT_BUCKETS);
        h.observe(Duration::from_millis(1));
        h.observe(Duration::from_millis(300));
        h.observe(Duration::from_secs(60));

        let snap = h.snapshot();
        assert_eq!(snap.count, 3);
        assert_eq!(snap.buckets.len(), DEFAULT_BUCKETS.len() + 1);
        assert_eq!(snap.buckets[0].count, 1);
        let half = snap.buckets.iter().find(|b| b.le == "0.5").unwrap();
        assert_eq!(half.count, 1);
        assert_eq!(snap.buckets.last().unwrap().le, "+Inf");
        assert_eq!(snap.buckets.last().unwrap().count, 1);
        assert!((snap.sum_seconds - 60.301).abs() < 1e-6);
    }

    #[test]
    fn snapshot_written_atomically_and_readable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let m = IntakeMetrics::new();
        m.inc_error(DeadLetterReason::SnapshotFailed);
        m.scan_seconds.observe(Duration::from_millis(20));

        m.write_snapshot(&path).unwrap();
        assert!(!dir.path().join("metrics.json.tmp").exists());

        let snap = IntakeMetrics::read_snapshot(&path).unwrap();
        assert_eq!(snap.errors_total.get("snapshot_failed"), Some(&1));
        assert_eq!(snap.scan_seconds.count, 1);
    }
}
