//! Snapshot uploader: content-addressed key derivation plus bounded retry.

#![allow(missing_docs)]

use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::core::errors::StageError;
use crate::storage::object_store::ObjectStore;

/// Hex characters of the digest used as the shard directory.
pub const SHARD_PREFIX_LEN: usize = 2;

/// `<first-2-hex>/<sha256>`.
pub fn raw_key(sha256: &str) -> String {
    let shard = sha256.get(..SHARD_PREFIX_LEN).unwrap_or(sha256);
    format!("{shard}/{sha256}")
}

/// `s3://<bucket>/<key>`.
pub fn object_uri(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

/// Retry policy for uploads: `retries + 1` attempts, fixed sleep between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub const fn attempts(self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Upload `source` under its content key and return the object URI.
pub fn snapshot_file(
    store: &dyn ObjectStore,
    bucket: &str,
    sha256: &str,
    source: &Path,
    policy: RetryPolicy,
) -> Result<String, StageError> {
    let key = raw_key(sha256);
    let attempts = policy.attempts();
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match store.put(bucket, &key, source) {
            Ok(()) => return Ok(object_uri(bucket, &key)),
            Err(err) => last_error = err.to_string(),
        }
        if attempt < attempts {
            thread::sleep(policy.backoff);
        }
    }

    Err(StageError::SnapshotFailed {
        attempts,
        last_error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::{DeadLetterReason, IntakeError, Result};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` calls, then succeeds.
    struct FlakyStore {
        failures: u32,
        calls: AtomicU32,
    }

    impl FlakyStore {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    impl ObjectStore for FlakyStore {
        fn put(&self, bucket: &str, key: &str, _source: &Path) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                return Err(IntakeError::ObjectStore {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                    details: format!("transient failure #{n}"),
                });
            }
            Ok(())
        }
    }

    const SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            backoff: Duration::ZERO,
        }
    }

    #[test]
    fn key_is_sharded_by_digest_prefix() {
        assert_eq!(raw_key(SHA), format!("2c/{SHA}"));
        assert_eq!(
            object_uri("raw", &raw_key(SHA)),
            format!("s3://raw/2c/{SHA}")
        );
    }

    #[test]
    fn succeeds_within_retry_budget() {
        let store = FlakyStore::new(2);
        let uri = snapshot_file(&store, "raw", SHA, Path::new("unused"), policy(2)).unwrap();
        assert_eq!(uri, format!("s3://raw/2c/{SHA}"));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhausting_retries_reports_last_error() {
        let store = FlakyStore::new(10);
        let err = snapshot_file(&store, "raw", SHA, Path::new("unused"), policy(2)).unwrap_err();
        assert_eq!(err.reason(), DeadLetterReason::SnapshotFailed);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        match err {
            StageError::SnapshotFailed {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("#3"), "{last_error}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let store = FlakyStore::new(1);
        assert!(snapshot_file(&store, "raw", SHA, Path::new("unused"), policy(0)).is_err());
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
