//! Mainline integration: stash, rebase-or-merge onto latest mainline, merge
//! the issue branch, and clean up.
//!
//! The sequence mirrors the teacher's `src/workspace/merge.rs` /
//! `src/backend/git.rs` idiom of shelling out to individual porcelain
//! commands rather than using a plumbing library, extended with the SHA-
//! keyed rebase-conflict memory the merge coordinator needs to fall back
//! from `pull --rebase` to `pull --no-rebase` after repeated conflicts on
//! the same commit.

use std::path::Path;

use tracing::{info, warn};

use crate::error::GitError;
use crate::lock::GitLock;

/// Outcome of bringing mainline up to date inside a worktree before merging.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Already up to date; nothing to do.
    UpToDate,
    /// Rebase (or merge) succeeded and new commits were applied.
    Advanced,
}

/// Whether a worktree has uncommitted local changes (`git status --porcelain`
/// non-empty).
///
/// # Errors
/// Returns [`GitError`] if the status command fails.
pub fn is_dirty(lock: &GitLock, worktree: &Path) -> Result<bool, GitError> {
    let output = lock.run(worktree, &["status", "--porcelain"], None)?;
    Ok(!output.stdout.is_empty())
}

/// `git stash push -u`. Returns `true` if something was actually stashed.
///
/// # Errors
/// Returns [`GitError`] if the stash command fails.
pub fn stash_push(lock: &GitLock, worktree: &Path) -> Result<bool, GitError> {
    if !is_dirty(lock, worktree)? {
        return Ok(false);
    }
    let output = lock.run(worktree, &["stash", "push", "-u", "-m", "llp-autostash"], None)?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    Ok(!stdout.contains("No local changes to save"))
}

/// `git stash pop`. Idempotent in the sense that callers should only call
/// this when [`stash_push`] returned `true`.
///
/// # Errors
/// Returns [`GitError`] if popping fails, e.g. due to a conflict between the
/// stash and work merged in the meantime. Callers should treat this as a
/// handoff condition rather than a retryable failure: the stash remains in
/// the stash list for manual recovery.
pub fn stash_pop(lock: &GitLock, worktree: &Path) -> Result<(), GitError> {
    lock.run(worktree, &["stash", "pop"], None)?;
    Ok(())
}

/// Bring `worktree`'s checked-out branch up to date with `base_branch` by
/// rebasing on top of it. If the rebase conflicts, it is aborted (leaving
/// the worktree as it was) and a [`GitError::RebaseConflict`] is returned
/// carrying the conflicting commit's SHA and subject, so the caller can
/// track repeated conflicts on the same commit and fall back to
/// [`sync_merge`].
///
/// # Errors
/// Returns [`GitError::RebaseConflict`] on conflict (after aborting), or
/// any other [`GitError`] from the underlying commands.
pub fn sync_rebase(lock: &GitLock, worktree: &Path, base_branch: &str) -> Result<SyncOutcome, GitError> {
    let before = lock.run(worktree, &["rev-parse", "HEAD"], None)?;
    let before_sha = String::from_utf8_lossy(&before.stdout).trim().to_owned();

    match lock.run(worktree, &["pull", "--rebase", "origin", base_branch], None) {
        Ok(_) => {}
        Err(GitError::CommandFailed { stderr, .. }) if stderr.contains("CONFLICT") || stderr.contains("could not apply") => {
            let (sha, summary) = dropping_line_commit(&stderr)
                .or_else(|| conflicting_commit(lock, worktree))
                .unwrap_or_else(|| (before_sha.clone(), String::new()));
            let _ = lock.run(worktree, &["rebase", "--abort"], None);
            return Err(GitError::RebaseConflict { sha, summary });
        }
        Err(other) => return Err(other),
    }

    let after = lock.run(worktree, &["rev-parse", "HEAD"], None)?;
    let after_sha = String::from_utf8_lossy(&after.stdout).trim().to_owned();
    Ok(if before_sha == after_sha {
        SyncOutcome::UpToDate
    } else {
        SyncOutcome::Advanced
    })
}

/// Fall back from [`sync_rebase`]: bring `worktree` up to date with a plain
/// merge commit (`pull --no-rebase`) instead of rewriting history. Used
/// after repeated rebase conflicts on the same commit, since a merge commit
/// only needs to resolve the conflict once rather than per-commit.
///
/// # Errors
/// Returns [`GitError::MergeConflict`] if the merge itself conflicts (after
/// aborting), or any other [`GitError`] from the underlying commands.
pub fn sync_merge(lock: &GitLock, worktree: &Path, base_branch: &str) -> Result<SyncOutcome, GitError> {
    let before = lock.run(worktree, &["rev-parse", "HEAD"], None)?;
    let before_sha = String::from_utf8_lossy(&before.stdout).trim().to_owned();

    match lock.run(worktree, &["pull", "--no-rebase", "origin", base_branch], None) {
        Ok(_) => {}
        Err(GitError::CommandFailed { stderr, .. }) if stderr.contains("CONFLICT") => {
            let _ = lock.run(worktree, &["merge", "--abort"], None);
            return Err(GitError::MergeConflict {
                branch: base_branch.to_owned(),
            });
        }
        Err(other) => return Err(other),
    }

    let after = lock.run(worktree, &["rev-parse", "HEAD"], None)?;
    let after_sha = String::from_utf8_lossy(&after.stdout).trim().to_owned();
    Ok(if before_sha == after_sha {
        SyncOutcome::UpToDate
    } else {
        SyncOutcome::Advanced
    })
}

/// Extract the conflicting commit from a `dropping <40-char-sha> <summary>`
/// line, the phrasing `git rebase` prints for the commit it could not
/// replay. Example: `dropping ae3b85ec1cac501058f6e5da362be37be1c99801
/// feat(ai): add stall detection`.
fn dropping_line_commit(stderr: &str) -> Option<(String, String)> {
    for line in stderr.lines() {
        let Some(rest) = line.trim_start().strip_prefix("dropping ") else {
            continue;
        };
        let (sha, summary) = rest.split_once(' ').unwrap_or((rest, ""));
        if sha.len() == 40 && sha.chars().all(|c| c.is_ascii_hexdigit()) {
            return Some((sha.to_owned(), summary.trim().to_owned()));
        }
    }
    None
}

/// Identify the commit a rebase stopped on, for conflict-SHA tracking.
/// Reads `.git/rebase-merge/stopped-sha` (or `rebase-apply/` for the `am`
/// backend), falling back to `None` if rebase state isn't present. Used
/// when stderr doesn't contain a `dropping <sha> ...` line.
fn conflicting_commit(lock: &GitLock, worktree: &Path) -> Option<(String, String)> {
    for marker in ["rebase-merge/stopped-sha", "rebase-apply/original-commit"] {
        let path = git_dir(lock, worktree)?.join(marker);
        if let Ok(sha) = std::fs::read_to_string(&path) {
            let sha = sha.trim().to_owned();
            if !sha.is_empty() {
                let summary = lock
                    .run(worktree, &["log", "-1", "--format=%s", &sha], None)
                    .ok()
                    .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_owned())
                    .unwrap_or_default();
                return Some((sha, summary));
            }
        }
    }
    None
}

fn git_dir(lock: &GitLock, worktree: &Path) -> Option<std::path::PathBuf> {
    let output = lock.run(worktree, &["rev-parse", "--git-dir"], None).ok()?;
    let dir = String::from_utf8_lossy(&output.stdout).trim().to_owned();
    let path = std::path::PathBuf::from(dir);
    Some(if path.is_absolute() { path } else { worktree.join(path) })
}

/// Merge `branch` into the checked-out branch of `mainline_worktree` with
/// `--no-ff`, so every integrated issue leaves a identifiable merge commit.
///
/// # Errors
/// Returns [`GitError::MergeConflict`] if the merge conflicts (after
/// aborting, leaving mainline unchanged), or any other [`GitError`].
pub fn merge_no_ff(lock: &GitLock, mainline_worktree: &Path, branch: &str) -> Result<(), GitError> {
    match lock.run(mainline_worktree, &["merge", "--no-ff", "--no-edit", branch], None) {
        Ok(_) => {
            info!(branch, "merged into mainline");
            Ok(())
        }
        Err(GitError::CommandFailed { stderr, .. }) if stderr.contains("CONFLICT") || stderr.contains("Automatic merge failed") => {
            let _ = lock.run(mainline_worktree, &["merge", "--abort"], None);
            Err(GitError::MergeConflict {
                branch: branch.to_owned(),
            })
        }
        Err(other) => Err(other),
    }
}

/// Delete a local branch, force-deleting since its commits are either merged
/// or intentionally discarded by this point in the merge sequence.
///
/// # Errors
/// Returns [`GitError`] only for failures other than "branch not found",
/// which is treated as already-satisfied.
pub fn delete_branch(lock: &GitLock, repo_root: &Path, branch: &str) -> Result<(), GitError> {
    match lock.run(repo_root, &["branch", "-D", branch], None) {
        Ok(_) => Ok(()),
        Err(GitError::CommandFailed { stderr, .. }) if stderr.contains("not found") => Ok(()),
        Err(other) => {
            warn!(branch, error = %other, "failed to delete branch after merge");
            Err(other)
        }
    }
}

/// List the files touched by each commit in `range` (e.g. `"main..HEAD"`),
/// as `(sha, paths)` pairs in log order. Used by the overlap detector to
/// derive file hints from recent commits when an issue doesn't declare its
/// scope explicitly.
///
/// # Errors
/// Returns [`GitError`] if the log command fails.
pub fn log_paths(lock: &GitLock, worktree: &Path, range: &str) -> Result<Vec<(String, Vec<String>)>, GitError> {
    let output = lock.run(
        worktree,
        &["log", "--pretty=format:%x00%H", "--name-only", range],
        None,
    )?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut commits = Vec::new();
    let mut current_sha: Option<String> = None;
    let mut current_paths: Vec<String> = Vec::new();
    for line in stdout.split('\n') {
        if let Some(sha) = line.strip_prefix('\0') {
            if let Some(sha) = current_sha.take() {
                commits.push((sha, std::mem::take(&mut current_paths)));
            }
            current_sha = Some(sha.to_owned());
        } else if !line.is_empty() {
            current_paths.push(line.to_owned());
        }
    }
    if let Some(sha) = current_sha {
        commits.push((sha, current_paths));
    }
    Ok(commits)
}
