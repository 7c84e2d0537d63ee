//! Property-based tests for the per-file scanner stages.
//!
//! Uses `proptest` to check that the path classifier accepts exactly the
//! four-segment drop convention, that ignore rules always cover the processed
//! mirror, and that stability tracking never reports a file stable on the
//! observation that changed it.

use std::path::Path;
use std::time::{Duration, Instant, SystemTime};

use proptest::prelude::*;

use super::classify::classify;
use super::patterns::IgnoreMatcher;
use super::stability::{FileSignature, StabilityTracker};
use crate::core::errors::DeadLetterReason;

const DEFAULT_IGNORE: &str = "**/*.part,**/~$*,**/*.tmp";

// ──────────────────── strategies ────────────────────

fn arb_slug() -> impl Strategy<Value = String> {
    "[a-z0-9-]{1,64}"
}

fn arb_uuid() -> impl Strategy<Value = String> {
    "[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}"
}

fn arb_filename() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_ .()-]{1,40}".prop_filter("not a dot segment", |f| f != "." && f != "..")
}

fn arb_segment() -> impl Strategy<Value = String> {
    "[A-Za-z0-9_.-]{1,12}"
}

fn arb_signature() -> impl Strategy<Value = FileSignature> {
    (0u64..4, 0u64..4).prop_map(|(size, secs)| FileSignature {
        size,
        modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Every well-formed drop path parses back into the same components.
    #[test]
    fn convention_paths_round_trip(
        tenant in arb_slug(),
        case_id in arb_uuid(),
        drop_id in arb_uuid(),
        filename in arb_filename(),
    ) {
        let rel = format!("{tenant}/{case_id}/{drop_id}/{filename}");
        let parsed = classify(&rel).unwrap();
        prop_assert_eq!(&parsed.tenant, &tenant);
        prop_assert_eq!(&parsed.case_id, &case_id);
        prop_assert_eq!(&parsed.drop_id, &drop_id);
        prop_assert_eq!(&parsed.filename, &filename);
        prop_assert_eq!(parsed.rel_path(), rel);
    }

    /// Anything but exactly four segments is an invalid path.
    #[test]
    fn wrong_depth_is_invalid(
        segments in prop::collection::vec(arb_segment(), 1..8)
            .prop_filter("four segments is the convention depth", |s| s.len() != 4)
    ) {
        let err = classify(&segments.join("/")).unwrap_err();
        prop_assert_eq!(err.reason(), DeadLetterReason::InvalidPath);
    }

    /// Identifiers are compared in canonical lowercase form only.
    #[test]
    fn uppercase_identifiers_are_invalid(
        tenant in arb_slug(),
        case_id in arb_uuid(),
        drop_id in arb_uuid(),
    ) {
        let upper = case_id.to_uppercase();
        prop_assume!(upper != case_id);
        let rel = format!("{tenant}/{upper}/{drop_id}/file.txt");
        prop_assert!(classify(&rel).is_err());
    }

    /// The processed mirror is ignored at any depth below it, whatever the list.
    #[test]
    fn processed_mirror_always_ignored(
        segments in prop::collection::vec(arb_segment(), 1..6),
        extra in "[a-z*?/,.]{0,20}",
    ) {
        let matcher = match IgnoreMatcher::new(&extra, ".processed") {
            Ok(m) => m,
            Err(_) => return Ok(()),
        };
        let rel = format!(".processed/{}", segments.join("/"));
        prop_assert!(matcher.is_ignored(&rel));
    }

    /// Partial uploads are ignored at every depth with the default list.
    #[test]
    fn partial_uploads_ignored_at_any_depth(
        dirs in prop::collection::vec(arb_segment(), 0..5),
        stem in arb_segment(),
    ) {
        let matcher = IgnoreMatcher::new(DEFAULT_IGNORE, ".processed").unwrap();
        let mut parts = dirs;
        parts.push(format!("{stem}.part"));
        prop_assert!(matcher.is_ignored(&parts.join("/")));
    }

    /// With a zero window, an observation is stable exactly when it repeats
    /// the previous signature for that path.
    #[test]
    fn stable_only_on_repeated_signature(
        observations in prop::collection::vec(arb_signature(), 1..40)
    ) {
        let mut tracker = StabilityTracker::new(Duration::ZERO);
        let path = Path::new("/inbox/a/b/c/d");
        let now = Instant::now();
        let mut previous: Option<FileSignature> = None;
        for sig in observations {
            let stable = tracker.observe(path, sig, now);
            prop_assert_eq!(stable, previous == Some(sig));
            previous = Some(sig);
        }
        prop_assert_eq!(tracker.len(), 1);
    }
}
