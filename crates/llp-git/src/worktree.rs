//! Worktree lifecycle: one isolated worktree per dispatched issue.
//!
//! Grounded on the teacher's `GitWorktreeBackend` (`src/backend/git.rs`):
//! `git worktree add --detach`, idempotent create, `prune` before re-adding,
//! and best-effort directory cleanup on failure. The branch-per-issue naming
//! scheme (`llp/<issue-id>-<timestamp>`) replaces the teacher's detached
//! `ws/<name>` convention since each worker here commits to a real branch
//! that the merge coordinator later merges into mainline.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::GitError;
use crate::lock::GitLock;

/// A worktree created for a single issue's worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorktreeInfo {
    /// Absolute path to the worktree's working directory.
    pub path: PathBuf,
    /// The branch checked out in this worktree.
    pub branch: String,
}

/// Parsed row from `git worktree list --porcelain`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorktreeEntry {
    /// Absolute worktree path.
    pub path: PathBuf,
    /// Checked-out branch, if not detached (e.g. `refs/heads/llp/BUG-1-123`).
    pub branch: Option<String>,
    /// Whether this worktree is in a detached-HEAD state.
    pub detached: bool,
}

/// Derive the branch name for an issue's worker, given a monotonic
/// timestamp to disambiguate repeated dispatches of the same issue.
#[must_use]
pub fn branch_name(issue_id: &str, unix_ts: u64) -> String {
    format!("llp/{issue_id}-{unix_ts}")
}

/// Create a detached-then-branched worktree for `issue_id` at `base_branch`.
///
/// The worktree is created under `<repo-root>/.llp/worktrees/<branch>` and
/// checks out a new branch named by [`branch_name`]. If a stale worktree
/// directory already exists at that path (e.g. left over from a crashed
/// worker), it is removed first.
///
/// # Errors
/// Returns [`GitError`] if any git invocation fails, or if the worktree
/// directory cannot be created/removed.
pub fn create(lock: &GitLock, issue_id: &str, base_branch: &str, unix_ts: u64) -> Result<WorktreeInfo, GitError> {
    let branch = branch_name(issue_id, unix_ts);
    let path = worktrees_root(lock.repo().root()).join(&branch);

    if path.exists() {
        info!(path = %path.display(), "removing stale worktree directory before re-create");
        let _ = std::fs::remove_dir_all(&path);
        let _ = lock.run_root(&["worktree", "prune"]);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| GitError::Spawn {
            args: format!("mkdir -p {}", parent.display()),
            source,
        })?;
    }

    let path_str = path.to_string_lossy().into_owned();
    let result = lock.run_root(&[
        "worktree",
        "add",
        "-b",
        &branch,
        &path_str,
        base_branch,
    ]);

    if let Err(err) = result {
        if path.exists() {
            let _ = std::fs::remove_dir_all(&path);
        }
        return Err(err);
    }

    debug!(branch = %branch, path = %path.display(), "worktree created");
    Ok(WorktreeInfo { path, branch })
}

/// Remove a worktree by path. Idempotent: a missing worktree is not an
/// error, since a crash between merge and cleanup may have already removed
/// it.
///
/// # Errors
/// Returns [`GitError`] if `git worktree remove` fails for a reason other
/// than the worktree already being gone.
pub fn remove(lock: &GitLock, path: &Path) -> Result<(), GitError> {
    if !path.exists() {
        let _ = lock.run_root(&["worktree", "prune"]);
        return Ok(());
    }
    let path_str = path.to_string_lossy().into_owned();
    match lock.run_root(&["worktree", "remove", "--force", &path_str]) {
        Ok(_) => Ok(()),
        Err(err) => {
            // Fall back to manual removal + prune if git itself refuses
            // (e.g. the directory was partially deleted out from under it).
            let _ = std::fs::remove_dir_all(path);
            let _ = lock.run_root(&["worktree", "prune"]);
            if path.exists() {
                Err(err)
            } else {
                Ok(())
            }
        }
    }
}

/// List all worktrees currently registered against this repository.
///
/// # Errors
/// Returns [`GitError`] if `git worktree list` fails.
pub fn list(lock: &GitLock) -> Result<Vec<WorktreeEntry>, GitError> {
    let output = lock.run_root(&["worktree", "list", "--porcelain"])?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(parse_porcelain_list(&stdout))
}

/// Porcelain-format parser, split out for unit testing without a repo.
fn parse_porcelain_list(stdout: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut branch: Option<String> = None;
    let mut detached = false;

    let flush = |path: &mut Option<PathBuf>, branch: &mut Option<String>, detached: &mut bool, out: &mut Vec<WorktreeEntry>| {
        if let Some(p) = path.take() {
            out.push(WorktreeEntry {
                path: p,
                branch: branch.take(),
                detached: *detached,
            });
        }
        *detached = false;
    };

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("worktree ") {
            flush(&mut path, &mut branch, &mut detached, &mut entries);
            path = Some(PathBuf::from(rest));
        } else if let Some(rest) = line.strip_prefix("branch ") {
            branch = Some(rest.trim_start_matches("refs/heads/").to_owned());
        } else if line == "detached" {
            detached = true;
        } else if line.is_empty() {
            flush(&mut path, &mut branch, &mut detached, &mut entries);
        }
    }
    flush(&mut path, &mut branch, &mut detached, &mut entries);
    entries
}

/// The directory under which all issue worktrees are created.
#[must_use]
pub fn worktrees_root(repo_root: &Path) -> PathBuf {
    repo_root.join(".llp").join("worktrees")
}

/// `git status --porcelain` inside a worktree, parsed into changed paths.
///
/// Used by the worker pool's leak detector to compare a worktree's changes
/// against the set of paths the issue actually owns.
///
/// # Errors
/// Returns [`GitError`] if the status command fails.
pub fn status_paths(lock: &GitLock, worktree: &Path) -> Result<Vec<PathBuf>, GitError> {
    let output = lock.run(worktree, &["status", "--porcelain"], None)?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(stdout
        .lines()
        .filter_map(|line| {
            // Porcelain v1: "XY PATH" or "XY PATH1 -> PATH2" for renames.
            let rest = line.get(3..)?;
            let path = rest.split(" -> ").next_back().unwrap_or(rest);
            Some(PathBuf::from(path))
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_includes_timestamp() {
        assert_eq!(branch_name("BUG-42", 1_700_000_000), "llp/BUG-42-1700000000");
    }

    #[test]
    fn parse_porcelain_list_handles_multiple_entries() {
        let stdout = "worktree /repo\nHEAD abc123\nbranch refs/heads/main\n\nworktree /repo/.llp/worktrees/llp/BUG-1-1\nHEAD def456\nbranch refs/heads/llp/BUG-1-1\n\nworktree /repo/.llp/worktrees/detached\nHEAD 789abc\ndetached\n";
        let entries = parse_porcelain_list(stdout);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].branch.as_deref(), Some("llp/BUG-1-1"));
        assert!(entries[2].detached);
        assert!(entries[2].branch.is_none());
    }

    #[test]
    fn status_paths_strips_status_code_prefix() {
        let stdout = " M src/lib.rs\n?? new_file.rs\nR  old.rs -> new.rs\n";
        let paths: Vec<PathBuf> = stdout
            .lines()
            .filter_map(|line| {
                let rest = line.get(3..)?;
                let path = rest.split(" -> ").next_back().unwrap_or(rest);
                Some(PathBuf::from(path))
            })
            .collect();
        assert_eq!(
            paths,
            vec![
                PathBuf::from("src/lib.rs"),
                PathBuf::from("new_file.rs"),
                PathBuf::from("new.rs"),
            ]
        );
    }
}
