//! Optional pre-dispatch overlap detection: hint-based file-scope overlap
//! between queued and in-flight issues.
//!
//! Hints are approximate by design (§9 Open Questions accepts false
//! negatives) — this is a best-effort guard against two workers touching
//! the same files concurrently, not a guarantee.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::issue::Issue;

static FILE_HINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s`(\[])([\w./-]+\.(?:rs|toml|md|ts|tsx|js|jsx|py|go|rb|yaml|yml|json))(?:$|[\s`)\].,:;])")
        .expect("static regex")
});

static SCOPE_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)scope:\s*([\w./-]+)").expect("static regex"));

/// File/directory/scope-tag hints derived from an issue, used to detect
/// likely file-scope overlap before dispatch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FileHints {
    pub files: HashSet<PathBuf>,
    pub scope_tags: HashSet<String>,
}

impl FileHints {
    /// Extract hints from an issue's body: plausible file paths (by
    /// extension whitelist) and `scope: <tag>` declarations.
    #[must_use]
    pub fn from_issue_body(body: &str) -> Self {
        let files = FILE_HINT_RE
            .captures_iter(body)
            .map(|caps| PathBuf::from(caps[1].to_owned()))
            .collect();
        let scope_tags = SCOPE_TAG_RE.captures_iter(body).map(|caps| caps[1].to_owned()).collect();
        Self { files, scope_tags }
    }

    /// Whether these hints are empty (never overlap with anything).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty() && self.scope_tags.is_empty()
    }

    /// Two hint sets overlap if they share any file, any directory (with
    /// ancestor containment), or any scope tag.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        if !self.scope_tags.is_disjoint(&other.scope_tags) {
            return true;
        }
        self.files.iter().any(|a| other.files.iter().any(|b| path_overlaps(a, b)))
    }
}

fn path_overlaps(a: &Path, b: &Path) -> bool {
    a == b || a.starts_with(b) || b.starts_with(a)
}

/// Tracks registered in-flight issues' file hints for overlap checks.
#[derive(Default)]
pub struct OverlapDetector {
    active: HashMap<String, FileHints>,
}

impl OverlapDetector {
    /// An empty detector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight issue's hints, derived from its file on disk.
    pub fn register(&mut self, issue: &Issue) {
        let body = std::fs::read_to_string(&issue.path).unwrap_or_default();
        self.active.insert(issue.id.clone(), FileHints::from_issue_body(&body));
    }

    /// Stop tracking `id` (on completion, failure, or interruption).
    pub fn unregister(&mut self, id: &str) {
        self.active.remove(id);
    }

    /// Ids of currently-registered issues whose hints overlap `issue`'s.
    #[must_use]
    pub fn check_overlap(&self, issue: &Issue) -> Vec<String> {
        let body = std::fs::read_to_string(&issue.path).unwrap_or_default();
        let hints = FileHints::from_issue_body(&body);
        if hints.is_empty() {
            return Vec::new();
        }
        self.active
            .iter()
            .filter(|(id, _)| *id != &issue.id)
            .filter(|(_, other_hints)| hints.overlaps(other_hints))
            .map(|(id, _)| id.clone())
            .collect()
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_hints() -> impl Strategy<Value = FileHints> {
        let path_pool = prop_oneof![
            Just(PathBuf::from("src/a.rs")),
            Just(PathBuf::from("src/a/b.rs")),
            Just(PathBuf::from("src/b.rs")),
            Just(PathBuf::from("docs/readme.md")),
        ];
        let tag_pool = prop_oneof![Just("billing".to_owned()), Just("api".to_owned()), Just("infra".to_owned())];
        (
            prop::collection::hash_set(path_pool, 0..3),
            prop::collection::hash_set(tag_pool, 0..2),
        )
            .prop_map(|(files, scope_tags)| FileHints { files, scope_tags })
    }

    proptest! {
        // Overlap is defined over unordered pairs of hint sets, so checking
        // it in either direction must agree — a worker's own hints and a
        // candidate's hints can be passed to `overlaps` in either order.
        #[test]
        fn prop_overlaps_is_symmetric(a in arb_hints(), b in arb_hints()) {
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }

        // A hint set always overlaps itself unless it's empty (empty hints
        // never overlap with anything, including themselves).
        #[test]
        fn prop_nonempty_hints_overlap_themselves(a in arb_hints()) {
            if !a.is_empty() {
                prop_assert!(a.overlaps(&a));
            }
        }
    }
}
