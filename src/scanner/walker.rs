//! Inbox walker: enumerate candidate files beneath the inbox root.
//!
//! Symlinked directories are not descended into. Symlinks that resolve to a
//! regular file are reported so the scheduler can apply the containment check.
//! The processed mirror at the root is skipped without being read.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::{IntakeError, Result};
use crate::core::paths::to_slash;

/// A regular file (or a symlink to one) found under the inbox root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub path: PathBuf,
    /// `/`-separated path relative to the inbox root.
    pub rel_path: String,
    pub is_symlink: bool,
}

/// Walk `root` and return every candidate, sorted by relative path.
///
/// A missing or unreadable root is an error; unreadable subdirectories are
/// skipped.
pub fn collect_candidates(root: &Path, processed_dir_name: &str) -> Result<Vec<Candidate>> {
    let top = fs::read_dir(root).map_err(|err| IntakeError::io(root, err))?;
    let processed = root.join(processed_dir_name);

    let mut out = Vec::new();
    let mut stack: Vec<PathBuf> = Vec::new();
    visit_entries(root, top, &processed, &mut stack, &mut out);

    while let Some(dir) = stack.pop() {
        // Directories vanishing or turning unreadable mid-walk are skipped.
        let Ok(entries) = fs::read_dir(&dir) else {
            continue;
        };
        visit_entries(root, entries, &processed, &mut stack, &mut out);
    }

    out.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(out)
}

fn visit_entries(
    root: &Path,
    entries: fs::ReadDir,
    processed: &Path,
    stack: &mut Vec<PathBuf>,
    out: &mut Vec<Candidate>,
) {
    for entry_result in entries {
        let Ok(entry) = entry_result else {
            continue;
        };
        let Ok(ft) = entry.file_type() else {
            continue;
        };
        let path = entry.path();

        if ft.is_dir() {
            if path != processed {
                stack.push(path);
            }
            continue;
        }

        let is_symlink = ft.is_symlink();
        let is_file = if is_symlink {
            fs::metadata(&path).is_ok_and(|m| m.is_file())
        } else {
            ft.is_file()
        };
        if !is_file {
            continue;
        }

        let Ok(rel) = path.strip_prefix(root) else {
            continue;
        };
        out.push(Candidate {
            rel_path: to_slash(rel),
            path,
            is_symlink,
        });
    }
}
