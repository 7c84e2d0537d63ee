//! Content hasher: streaming SHA-256 with a size cap and a tear check.
//!
//! The file is stat'ed before and after the read; any difference in size or
//! mtime means a writer touched it mid-hash and the digest is discarded. The
//! read itself stops one byte past the cap, so a file that keeps growing
//! after the first stat is refused without streaming it to the end.

#![allow(missing_docs)]

use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{self, ErrorKind, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::core::errors::StageError;
use crate::scanner::stability::FileSignature;

const BLOCK_SIZE: usize = 1024 * 1024;

/// Digest and size of a file whose content held still while it was read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    /// Lowercase hex, 64 characters.
    pub sha256: String,
    pub size_bytes: u64,
    /// Size and mtime the content was read under.
    pub signature: FileSignature,
}

/// What a capped read produced.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Streamed {
    Digest { sha256: String, bytes: u64 },
    /// More than the cap was available.
    OverCap { bytes: u64 },
}

/// Hash `path`, refusing files larger than `max_bytes`.
pub fn fingerprint(path: &Path, max_bytes: u64) -> Result<Fingerprint, StageError> {
    fingerprint_observed(path, max_bytes, || {})
}

/// Like [`fingerprint`], with a hook that runs after the content was read and
/// before the closing stat.
pub fn fingerprint_observed<F: FnOnce()>(
    path: &Path,
    max_bytes: u64,
    after_read: F,
) -> Result<Fingerprint, StageError> {
    let before = stat(path)?;
    if before.size > max_bytes {
        return Err(StageError::FileTooLarge {
            size: before.size,
            limit: max_bytes,
        });
    }

    let file = File::open(path).map_err(|err| changed(path, &err))?;
    let streamed = stream_digest(file, max_bytes).map_err(|err| changed(path, &err))?;
    let sha256 = match streamed {
        Streamed::OverCap { bytes } => {
            return Err(StageError::FileTooLarge {
                size: bytes,
                limit: max_bytes,
            });
        }
        Streamed::Digest { bytes, .. } if bytes != before.size => {
            return Err(StageError::FileChanged {
                details: format!(
                    "{}: read {bytes} bytes, expected {}",
                    path.display(),
                    before.size
                ),
            });
        }
        Streamed::Digest { sha256, .. } => sha256,
    };

    after_read();

    let after = stat(path)?;
    if after != before {
        return Err(StageError::FileChanged {
            details: format!(
                "{}: size {} -> {} during read",
                path.display(),
                before.size,
                after.size
            ),
        });
    }

    Ok(Fingerprint {
        sha256,
        size_bytes: before.size,
        signature: before,
    })
}

/// Re-stat `path` and confirm it still carries `expected`.
pub fn verify_unchanged(path: &Path, expected: FileSignature) -> Result<(), StageError> {
    let now = stat(path)?;
    if now == expected {
        return Ok(());
    }
    Err(StageError::FileChanged {
        details: format!(
            "{}: size {} -> {} after hashing",
            path.display(),
            expected.size,
            now.size
        ),
    })
}

fn stream_digest<R: Read>(reader: R, max_bytes: u64) -> io::Result<Streamed> {
    let mut reader = reader.take(max_bytes.saturating_add(1));
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    let mut bytes: u64 = 0;
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        bytes += n as u64;
        if bytes > max_bytes {
            return Ok(Streamed::OverCap { bytes });
        }
        hasher.update(&buf[..n]);
    }
    Ok(Streamed::Digest {
        sha256: hex_encode(&hasher.finalize()),
        bytes,
    })
}

fn stat(path: &Path) -> Result<FileSignature, StageError> {
    fs::metadata(path)
        .map(|meta| FileSignature::from_metadata(&meta))
        .map_err(|err| changed(path, &err))
}

fn changed(path: &Path, err: &std::io::Error) -> StageError {
    StageError::FileChanged {
        details: format!("{}: {err}", path.display()),
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(s, "{b:02x}");
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::DeadLetterReason;
    use std::io::Write as _;

    const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn hashes_known_content() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("file.txt");
        fs::write(&path, b"hello").unwrap();

        let fp = fingerprint(&path, 1024).unwrap();
        assert_eq!(fp.sha256, HELLO_SHA);
        assert_eq!(fp.size_bytes, 5);
    }

    #[test]
    fn empty_file_hashes_to_empty_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("empty");
        fs::write(&path, b"").unwrap();

        let fp = fingerprint(&path, 0).unwrap();
        assert_eq!(
            fp.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(fp.size_bytes, 0);
    }

    #[test]
    fn file_at_limit_is_accepted_and_one_over_is_refused() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("big.bin");
        fs::write(&path, vec![7u8; 64]).unwrap();

        assert!(fingerprint(&path, 64).is_ok());
        let err = fingerprint(&path, 63).unwrap_err();
        assert_eq!(err.reason(), DeadLetterReason::FileTooLarge);
        assert!(matches!(
            err,
            StageError::FileTooLarge {
                size: 64,
                limit: 63
            }
        ));
    }

    #[test]
    fn content_spanning_multiple_blocks_is_hashed_fully() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("multi.bin");
        let data = vec![0xABu8; BLOCK_SIZE * 2 + 17];
        fs::write(&path, &data).unwrap();

        let fp = fingerprint(&path, u64::MAX).unwrap();
        assert_eq!(fp.sha256, hex_encode(&Sha256::digest(&data)));
        assert_eq!(fp.size_bytes, data.len() as u64);
    }

    #[test]
    fn capped_read_stops_past_the_limit() {
        let growing = io::repeat(0x5A).take(10 * BLOCK_SIZE as u64);
        let streamed = stream_digest(growing, 100).unwrap();
        assert_eq!(streamed, Streamed::OverCap { bytes: 101 });

        let exact = stream_digest(&b"hello"[..], 5).unwrap();
        assert_eq!(
            exact,
            Streamed::Digest {
                sha256: HELLO_SHA.to_string(),
                bytes: 5
            }
        );
    }

    #[test]
    fn fingerprint_carries_the_signature_it_was_read_under() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("file.txt");
        fs::write(&path, b"hello").unwrap();

        let fp = fingerprint(&path, 1024).unwrap();
        assert_eq!(fp.signature, stat(&path).unwrap());
        assert!(verify_unchanged(&path, fp.signature).is_ok());

        fs::write(&path, b"hello, again").unwrap();
        let err = verify_unchanged(&path, fp.signature).unwrap_err();
        assert_eq!(err.reason(), DeadLetterReason::FileChangedOrMissing);
    }

    #[test]
    fn missing_file_is_reported_as_changed() {
        let tmp = tempfile::tempdir().unwrap();
        let err = fingerprint(&tmp.path().join("gone"), 1024).unwrap_err();
        assert_eq!(err.reason(), DeadLetterReason::FileChangedOrMissing);
    }

    #[test]
    fn append_during_read_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("torn.txt");
        fs::write(&path, b"hello").unwrap();

        let err = fingerprint_observed(&path, 1024, || {
            let mut f = fs::OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(b" world").unwrap();
        })
        .unwrap_err();
        assert_eq!(err.reason(), DeadLetterReason::FileChangedOrMissing);
    }

    #[test]
    fn removal_during_read_is_detected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("vanish.txt");
        fs::write(&path, b"hello").unwrap();

        let err = fingerprint_observed(&path, 1024, || fs::remove_file(&path).unwrap()).unwrap_err();
        assert_eq!(err.reason(), DeadLetterReason::FileChangedOrMissing);
    }
}
