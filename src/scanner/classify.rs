//! Path classifier: `<tenant-slug>/<case-id>/<drop-id>/<filename>` convention.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::errors::StageError;

static DROP_PATH: LazyLock<Regex> = LazyLock::new(|| {
    const UUID: &str = "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}";
    Regex::new(&format!(
        r"^(?P<tenant>[a-z0-9-]{{1,64}})/(?P<case>{UUID})/(?P<drop>{UUID})/(?P<filename>[^/]+)$"
    ))
    .unwrap_or_else(|err| panic!("drop path regex must compile: {err}"))
});

/// Components of a path that satisfied the drop convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropPath {
    pub tenant: String,
    pub case_id: String,
    pub drop_id: String,
    pub filename: String,
}

impl DropPath {
    /// `/`-joined relative path, as recorded in `artifact.src_path`.
    pub fn rel_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.tenant, self.case_id, self.drop_id, self.filename
        )
    }

    /// Destination of this drop inside the processed mirror.
    pub fn processed_path(&self, inbox_root: &Path, processed_dir: &str) -> PathBuf {
        inbox_root
            .join(processed_dir)
            .join(&self.tenant)
            .join(&self.case_id)
            .join(&self.drop_id)
            .join(&self.filename)
    }
}

/// Parse a root-relative, `/`-separated path against the drop convention.
pub fn classify(rel_path: &str) -> Result<DropPath, StageError> {
    let caps = DROP_PATH
        .captures(rel_path)
        .ok_or_else(|| StageError::InvalidPath {
            path: rel_path.to_string(),
            details: "invalid path pattern".to_string(),
        })?;
    let filename = &caps["filename"];
    if filename == "." || filename == ".." {
        return Err(StageError::InvalidPath {
            path: rel_path.to_string(),
            details: "invalid filename".to_string(),
        });
    }
    Ok(DropPath {
        tenant: caps["tenant"].to_string(),
        case_id: caps["case"].to_string(),
        drop_id: caps["drop"].to_string(),
        filename: filename.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::DeadLetterReason;

    const CASE: &str = "22222222-2222-2222-2222-222222222222";
    const DROP: &str = "33333333-3333-3333-3333-333333333333";

    #[test]
    fn valid_path_is_split_into_components() {
        let parsed = classify(&format!("acme/{CASE}/{DROP}/file.txt")).expect("valid");
        assert_eq!(parsed.tenant, "acme");
        assert_eq!(parsed.case_id, CASE);
        assert!(parsed.drop_id.starts_with("3333"));
        assert_eq!(parsed.filename, "file.txt");
        assert_eq!(parsed.rel_path(), format!("acme/{CASE}/{DROP}/file.txt"));
    }

    #[test]
    fn short_path_is_invalid() {
        let err = classify("acme/file.txt").expect_err("too short");
        assert_eq!(err.reason(), DeadLetterReason::InvalidPath);
    }

    #[test]
    fn non_uuid_segments_are_invalid() {
        assert!(classify("acme/not-a-uuid/x/file").is_err());
        assert!(classify(&format!("acme/{CASE}/not-a-uuid/file")).is_err());
    }

    #[test]
    fn tenant_slug_is_constrained() {
        assert!(classify(&format!("Acme/{CASE}/{DROP}/f")).is_err());
        assert!(classify(&format!("ac_me/{CASE}/{DROP}/f")).is_err());
        let long = "a".repeat(65);
        assert!(classify(&format!("{long}/{CASE}/{DROP}/f")).is_err());
        assert!(classify(&format!("acme-2/{CASE}/{DROP}/f")).is_ok());
    }

    #[test]
    fn nested_files_below_drop_are_invalid() {
        assert!(classify(&format!("acme/{CASE}/{DROP}/sub/file.txt")).is_err());
    }

    #[test]
    fn processed_path_mirrors_layout() {
        let parsed = DropPath {
            tenant: "acme".to_string(),
            case_id: "c".to_string(),
            drop_id: "d".to_string(),
            filename: "file.txt".to_string(),
        };
        let dest = parsed.processed_path(Path::new("/srv/inbox"), ".processed");
        assert_eq!(dest, Path::new("/srv/inbox/.processed/acme/c/d/file.txt"));
    }
}
