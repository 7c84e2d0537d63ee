//! Stability detector: a file is readable once its size and mtime hold still
//! for the configured window.

#![allow(missing_docs)]

use std::collections::{HashMap, HashSet};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

/// The `(size, mtime)` pair compared across observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileSignature {
    pub size: u64,
    pub modified: SystemTime,
}

impl FileSignature {
    pub fn from_metadata(meta: &Metadata) -> Self {
        Self {
            size: meta.len(),
            modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Observation {
    signature: FileSignature,
    first_seen: Instant,
}

/// Per-path observation map owned by the scan scheduler.
#[derive(Debug)]
pub struct StabilityTracker {
    window: Duration,
    entries: HashMap<PathBuf, Observation>,
}

impl StabilityTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// Record an observation and report whether the file is stable.
    ///
    /// A new path, or one whose signature differs from the last observation,
    /// restarts its window and is never stable on that call.
    pub fn observe(&mut self, path: &Path, signature: FileSignature, now: Instant) -> bool {
        match self.entries.get_mut(path) {
            Some(obs) if obs.signature == signature => {
                now.saturating_duration_since(obs.first_seen) >= self.window
            }
            Some(obs) => {
                *obs = Observation {
                    signature,
                    first_seen: now,
                };
                false
            }
            None => {
                self.entries.insert(
                    path.to_path_buf(),
                    Observation {
                        signature,
                        first_seen: now,
                    },
                );
                false
            }
        }
    }

    /// Drop the observation for a path (after a processing attempt).
    pub fn forget(&mut self, path: &Path) {
        self.entries.remove(path);
    }

    /// Purge entries for paths absent from the current scan.
    pub fn retain_present(&mut self, present: &HashSet<PathBuf>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|path, _| present.contains(path));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(size: u64, secs: u64) -> FileSignature {
        FileSignature {
            size,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn first_observation_is_never_stable() {
        let mut t = StabilityTracker::new(Duration::ZERO);
        assert!(!t.observe(Path::new("a"), sig(1, 1), Instant::now()));
    }

    #[test]
    fn unchanged_after_window_is_stable() {
        let mut t = StabilityTracker::new(Duration::from_secs(2));
        let start = Instant::now();
        assert!(!t.observe(Path::new("a"), sig(1, 1), start));
        assert!(!t.observe(Path::new("a"), sig(1, 1), start + Duration::from_secs(1)));
        assert!(t.observe(Path::new("a"), sig(1, 1), start + Duration::from_secs(2)));
    }

    #[test]
    fn change_resets_window() {
        let mut t = StabilityTracker::new(Duration::from_secs(2));
        let start = Instant::now();
        t.observe(Path::new("a"), sig(1, 1), start);
        assert!(!t.observe(Path::new("a"), sig(5, 1), start + Duration::from_secs(3)));
        assert!(!t.observe(Path::new("a"), sig(5, 1), start + Duration::from_secs(4)));
        assert!(t.observe(Path::new("a"), sig(5, 1), start + Duration::from_secs(5)));
    }

    #[test]
    fn mtime_change_alone_resets_window() {
        let mut t = StabilityTracker::new(Duration::from_secs(1));
        let start = Instant::now();
        t.observe(Path::new("a"), sig(1, 1), start);
        assert!(!t.observe(Path::new("a"), sig(1, 2), start + Duration::from_secs(5)));
    }

    #[test]
    fn absent_paths_are_purged() {
        let mut t = StabilityTracker::new(Duration::ZERO);
        let now = Instant::now();
        t.observe(Path::new("a"), sig(1, 1), now);
        t.observe(Path::new("b"), sig(1, 1), now);
        let present: HashSet<PathBuf> = [PathBuf::from("b")].into_iter().collect();
        assert_eq!(t.retain_present(&present), 1);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn forget_requires_fresh_window() {
        let mut t = StabilityTracker::new(Duration::ZERO);
        let now = Instant::now();
        t.observe(Path::new("a"), sig(1, 1), now);
        assert!(t.observe(Path::new("a"), sig(1, 1), now));
        t.forget(Path::new("a"));
        assert!(!t.observe(Path::new("a"), sig(1, 1), now));
    }
}
