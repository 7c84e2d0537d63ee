//! Object store capability and its directory-backed implementation.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{IntakeError, Result};

/// Content-addressed blob sink. `put` must be idempotent per key.
pub trait ObjectStore: Send + Sync {
    fn put(&self, bucket: &str, key: &str, source: &Path) -> Result<()>;
}

/// Object store laid out on a local directory: `<root>/<bucket>/<key>`.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Filesystem location of an object. Keys are `/`-separated.
    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        key.split('/')
            .filter(|seg| !seg.is_empty())
            .fold(self.root.join(bucket), |acc, seg| acc.join(seg))
    }

    fn store_error(bucket: &str, key: &str, details: impl std::fmt::Display) -> IntakeError {
        IntakeError::ObjectStore {
            bucket: bucket.to_string(),
            key: key.to_string(),
            details: details.to_string(),
        }
    }
}

impl ObjectStore for FsObjectStore {
    fn put(&self, bucket: &str, key: &str, source: &Path) -> Result<()> {
        if key.split('/').any(|seg| seg == "..") {
            return Err(Self::store_error(bucket, key, "key escapes bucket"));
        }
        let dest = self.object_path(bucket, key);
        let parent = dest
            .parent()
            .ok_or_else(|| Self::store_error(bucket, key, "object path has no parent"))?;
        fs::create_dir_all(parent).map_err(|err| Self::store_error(bucket, key, err))?;

        // Temp name is unique per call: two workers may upload the same key.
        let tmp = parent.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
        if let Err(err) = fs::copy(source, &tmp) {
            let _ = fs::remove_file(&tmp);
            return Err(Self::store_error(bucket, key, err));
        }
        if let Err(err) = fs::rename(&tmp, &dest) {
            let _ = fs::remove_file(&tmp);
            return Err(Self::store_error(bucket, key, err));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_copies_source_under_bucket_and_key() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.txt");
        fs::write(&src, b"hello").unwrap();
        let store = FsObjectStore::new(tmp.path().join("objects"));

        store.put("raw", "2c/2cf24d", &src).unwrap();

        let obj = store.object_path("raw", "2c/2cf24d");
        assert_eq!(obj, tmp.path().join("objects/raw/2c/2cf24d"));
        assert_eq!(fs::read(&obj).unwrap(), b"hello");
        assert!(src.exists(), "source must be left in place");
    }

    #[test]
    fn repeated_put_overwrites_idempotently() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.txt");
        fs::write(&src, b"same").unwrap();
        let store = FsObjectStore::new(tmp.path().join("objects"));

        store.put("raw", "ab/abc", &src).unwrap();
        store.put("raw", "ab/abc", &src).unwrap();

        let dir = tmp.path().join("objects/raw/ab");
        let names: Vec<_> = fs::read_dir(&dir).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(names.len(), 1, "no temp files left behind: {names:?}");
    }

    #[test]
    fn missing_source_is_an_object_store_error() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path().join("objects"));
        let err = store
            .put("raw", "ab/abc", &tmp.path().join("missing"))
            .unwrap_err();
        assert_eq!(err.code(), "INT-2201");
        assert!(!store.object_path("raw", "ab/abc").exists());
    }

    #[test]
    fn parent_segments_in_key_are_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src.txt");
        fs::write(&src, b"x").unwrap();
        let store = FsObjectStore::new(tmp.path().join("objects"));
        assert!(store.put("raw", "../escape", &src).is_err());
    }
}
