//! Leak detection: after each stage, the main repository's `git status` is
//! compared against a pre-pipeline baseline. Anything new is attributed to
//! the worker that caused it, filtered by id so one worker never cleans up
//! another's in-flight changes.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use llp_git::GitLock;

static ISSUE_ID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Z]+-\d+").expect("static regex"));

/// Paths present in `current` but not `baseline`, attributed to `worker_id`:
/// a path is attributed to this worker only if it contains this worker's id,
/// or contains no recognizable issue-id pattern at all. Paths containing
/// another worker's id are ignored entirely, even though they're new.
#[must_use]
pub fn detect_leaks(baseline: &[PathBuf], current: &[PathBuf], worker_id: &str) -> Vec<PathBuf> {
    current
        .iter()
        .filter(|path| !baseline.contains(path))
        .filter(|path| is_attributed(path, worker_id))
        .cloned()
        .collect()
}

fn is_attributed(path: &Path, worker_id: &str) -> bool {
    let text = path.to_string_lossy();
    let found_ids: Vec<&str> = ISSUE_ID_RE.find_iter(&text).map(|m| m.as_str()).collect();
    found_ids.is_empty() || found_ids.iter().any(|id| *id == worker_id)
}

/// Remove attributed leaked paths from the main repository, under the git
/// lock. Best-effort: a path that can't be removed is logged and skipped
/// rather than failing the whole cleanup.
pub fn remove_leaks(lock: &GitLock, repo_root: &Path, leaks: &[PathBuf]) {
    for leak in leaks {
        let absolute = if leak.is_absolute() { leak.clone() } else { repo_root.join(leak) };
        let result = if absolute.is_dir() {
            std::fs::remove_dir_all(&absolute)
        } else {
            std::fs::remove_file(&absolute)
        };
        if let Err(e) = result {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %absolute.display(), error = %e, "failed to remove leaked path");
            }
        }
    }
    let _ = lock.run_root(&["status", "--porcelain"]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_id_paths_are_attributed() {
        let baseline = vec![];
        let current = vec![PathBuf::from(".issues/bugs/P1-BUG-1-fix.md")];
        assert_eq!(detect_leaks(&baseline, &current, "BUG-1"), current);
    }

    #[test]
    fn other_worker_id_paths_are_ignored() {
        let baseline = vec![];
        let current = vec![PathBuf::from(".issues/bugs/P1-BUG-2-fix.md")];
        assert!(detect_leaks(&baseline, &current, "BUG-1").is_empty());
    }

    #[test]
    fn paths_with_no_id_pattern_are_attributed() {
        let baseline = vec![];
        let current = vec![PathBuf::from("scratch/notes.txt")];
        assert_eq!(detect_leaks(&baseline, &current, "BUG-1"), current);
    }

    #[test]
    fn paths_already_in_baseline_are_not_leaks() {
        let baseline = vec![PathBuf::from("scratch/notes.txt")];
        let current = vec![PathBuf::from("scratch/notes.txt")];
        assert!(detect_leaks(&baseline, &current, "BUG-1").is_empty());
    }
}
