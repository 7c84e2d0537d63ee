//! Ignore matcher: gitignore-style glob exclusions for transient drop files.
//!
//! Patterns come from `watcher.ignore_glob` (comma-separated) plus the reserved
//! `<processed_dir>/**` pattern, and are matched against the `/`-separated path
//! relative to the inbox root. A match means "skip silently": lock files and
//! partial uploads are operational noise, not failures.

#![allow(missing_docs)]

use regex::Regex;

use crate::core::errors::{IntakeError, Result};

/// Compiled glob pattern for path matching.
#[derive(Debug, Clone)]
struct GlobPattern {
    original: String,
    compiled: Regex,
}

/// Set of compiled ignore globs.
#[derive(Debug, Clone)]
pub struct IgnoreMatcher {
    patterns: Vec<GlobPattern>,
}

impl IgnoreMatcher {
    /// Compile the configured list and append the processed-mirror exclusion.
    pub fn new(ignore_glob: &str, processed_dir_name: &str) -> Result<Self> {
        let reserved = format!("{processed_dir_name}/**");
        let patterns = split_patterns(ignore_glob)
            .chain(std::iter::once(reserved.as_str()))
            .map(|pat| {
                Ok(GlobPattern {
                    original: pat.to_string(),
                    compiled: glob_to_regex(pat)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Whether the root-relative `rel_path` matches any pattern.
    pub fn is_ignored(&self, rel_path: &str) -> bool {
        let normalized = rel_path.replace('\\', "/");
        let trimmed = normalized.trim_start_matches('/');
        self.patterns.iter().any(|p| p.compiled.is_match(trimmed))
    }

    /// The first pattern that matches, for diagnostics.
    pub fn matching_pattern(&self, rel_path: &str) -> Option<&str> {
        let normalized = rel_path.replace('\\', "/");
        let trimmed = normalized.trim_start_matches('/');
        self.patterns
            .iter()
            .find(|p| p.compiled.is_match(trimmed))
            .map(|p| p.original.as_str())
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}

fn split_patterns(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|p| !p.is_empty())
}

/// Convert a gitignore-style glob to an anchored regex.
///
/// - `**/` → zero or more leading directories
/// - `/**` at the end → everything beneath
/// - `**`  → any run of characters, separators included
/// - `*`   → anything except `/`
/// - `?`   → one character except `/`
///
/// A pattern without an interior `/` matches the final component at any depth;
/// a leading `/` anchors to the root. Brackets are literal.
fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let normalized = pattern.replace('\\', "/");
    let anchored = normalized.starts_with('/');
    let body = normalized.trim_start_matches('/');
    if body.is_empty() {
        return Err(IntakeError::InvalidConfig {
            details: format!("invalid ignore glob {pattern:?}: empty pattern"),
        });
    }

    let mut regex_str = String::with_capacity(body.len() * 2 + 8);
    regex_str.push('^');
    if !anchored && !body.trim_end_matches('/').contains('/') {
        regex_str.push_str("(?:.*/)?");
    }

    let chars: Vec<char> = body.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if i + 1 < chars.len() && chars[i + 1] == '*' => {
                if i + 2 < chars.len() && chars[i + 2] == '/' {
                    regex_str.push_str("(?:.*/)?");
                    i += 3;
                } else {
                    regex_str.push_str(".*");
                    i += 2;
                }
            }
            '/' if i + 3 == chars.len() && chars[i + 1] == '*' && chars[i + 2] == '*' => {
                regex_str.push_str("/.*");
                i += 3;
            }
            '*' => {
                regex_str.push_str("[^/]*");
                i += 1;
            }
            '?' => {
                regex_str.push_str("[^/]");
                i += 1;
            }
            '.' | '+' | '(' | ')' | '{' | '}' | '[' | ']' | '^' | '$' | '|' | '\\' => {
                regex_str.push('\\');
                regex_str.push(chars[i]);
                i += 1;
            }
            c => {
                regex_str.push(c);
                i += 1;
            }
        }
    }

    // A trailing slash targets a directory: match everything beneath it.
    if body.ends_with('/') {
        regex_str.push_str(".*");
    }
    regex_str.push('$');

    Regex::new(&regex_str).map_err(|err| IntakeError::InvalidConfig {
        details: format!("invalid ignore glob {pattern:?}: {err}"),
    })
}
