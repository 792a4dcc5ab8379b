//! Single-writer merge integrator: consumes [`WorkerResult`]s from a channel
//! and serializes each one into mainline via the stash → pull-rebase
//! (falling back to merge-strategy pull on a repeated conflict) → merge
//! `--no-ff` → branch-delete → stash-pop → worktree-remove sequence.
//!
//! Grounded on the teacher's `src/backend/git.rs` stash/pull/merge/cleanup
//! idiom and `src/workspace/merge.rs`'s call shape, replacing the teacher's
//! N-way structural merge with plain single-branch integration per issue.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Receiver;

use tracing::{info, warn};

use llp_git::{merge_ops, worktree, GitError, GitLock};

use crate::worker::{Stage, WorkerResult};

/// A stash-pop failure, recorded for the final report but never treated as
/// a merge failure.
#[derive(Clone, Debug)]
pub struct StashPopWarning {
    pub issue_id: String,
    pub recovery_hint: String,
}

/// A merge that could not be completed; mainline is left unchanged.
#[derive(Clone, Debug)]
pub struct FailedMerge {
    pub issue_id: String,
    pub detail: String,
}

/// Immutable snapshot of the coordinator's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeCounters {
    pub pending_count: u64,
    pub completed_count: u64,
    pub failed_count: u64,
    pub stash_pop_failures: u64,
}

const WORKTREE_REMOVE_RETRIES: u32 = 3;

/// Serializes integration of worker branches into mainline.
pub struct MergeCoordinator<'a> {
    lock: &'a GitLock,
    mainline_branch: String,
    results: Receiver<WorkerResult>,
    problematic_commits: HashSet<String>,
    pending: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    stash_pop_failures: AtomicU64,
    failed_merges: Vec<FailedMerge>,
    stash_warnings: Vec<StashPopWarning>,
    stage_callback: Option<Box<dyn Fn(&str, Stage) + Send + Sync + 'a>>,
}

impl<'a> MergeCoordinator<'a> {
    #[must_use]
    pub fn new(lock: &'a GitLock, mainline_branch: impl Into<String>, results: Receiver<WorkerResult>) -> Self {
        Self {
            lock,
            mainline_branch: mainline_branch.into(),
            results,
            problematic_commits: HashSet::new(),
            pending: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            stash_pop_failures: AtomicU64::new(0),
            failed_merges: Vec::new(),
            stash_warnings: Vec::new(),
            stage_callback: None,
        }
    }

    /// Register a callback invoked with the issue id and its terminal stage
    /// once a merge attempt concludes, for the orchestrator's stage map.
    pub fn on_stage(&mut self, callback: impl Fn(&str, Stage) + Send + Sync + 'a) {
        self.stage_callback = Some(Box::new(callback));
    }

    #[must_use]
    pub fn counters(&self) -> MergeCounters {
        MergeCounters {
            pending_count: self.pending.load(Ordering::SeqCst),
            completed_count: self.completed.load(Ordering::SeqCst),
            failed_count: self.failed.load(Ordering::SeqCst),
            stash_pop_failures: self.stash_pop_failures.load(Ordering::SeqCst),
        }
    }

    #[must_use]
    pub fn failed_merges(&self) -> &[FailedMerge] {
        &self.failed_merges
    }

    #[must_use]
    pub fn stash_warnings(&self) -> &[StashPopWarning] {
        &self.stash_warnings
    }

    /// Drain up to `max` pending worker results, integrating each one.
    /// Called from the orchestrator tick, bounded so merges don't starve
    /// dispatch.
    pub fn drain(&mut self, max: usize) {
        let mut batch = VecDeque::new();
        for _ in 0..max {
            match self.results.try_recv() {
                Ok(result) => batch.push_back(result),
                Err(_) => break,
            }
        }
        self.pending.fetch_add(batch.len() as u64, Ordering::SeqCst);
        while let Some(result) = batch.pop_front() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            self.integrate(result);
        }
    }

    fn integrate(&mut self, result: WorkerResult) {
        if !result.success {
            self.failed.fetch_add(1, Ordering::SeqCst);
            if let Some(cb) = &self.stage_callback {
                cb(&result.issue_id, Stage::Failed);
            }
            self.cleanup_worktree(&result.worktree_path);
            return;
        }

        let repo_root = self.lock.repo().root().to_path_buf();
        let stashed = match merge_ops::stash_push(self.lock, &repo_root) {
            Ok(stashed) => stashed,
            Err(e) => {
                self.record_merge_failure(&result, format!("stash push failed: {e}"));
                return;
            }
        };

        if let Err(detail) = self.pull_mainline(&repo_root) {
            warn!(issue_id = %result.issue_id, detail, "continuing merge without a clean mainline pull");
        }

        match merge_ops::merge_no_ff(self.lock, &repo_root, &result.branch_name) {
            Ok(()) => {
                info!(issue_id = %result.issue_id, branch = %result.branch_name, "merged into mainline");
            }
            Err(e) => {
                self.record_merge_failure(&result, e.to_string());
                if stashed {
                    self.pop_stash(&repo_root, &result.issue_id);
                }
                return;
            }
        }

        if let Err(e) = merge_ops::delete_branch(self.lock, &repo_root, &result.branch_name) {
            warn!(issue_id = %result.issue_id, error = %e, "failed to delete merged branch");
        }

        if stashed {
            self.pop_stash(&repo_root, &result.issue_id);
        }

        self.cleanup_worktree(&result.worktree_path);

        self.completed.fetch_add(1, Ordering::SeqCst);
        if let Some(cb) = &self.stage_callback {
            cb(&result.issue_id, Stage::Completed);
        }
    }

    /// `pull --rebase`, falling back to `pull --no-rebase` on a conflict
    /// we've already seen this run. Never fatal: a pull failure just means
    /// mainline wasn't refreshed before this merge.
    fn pull_mainline(&mut self, repo_root: &std::path::Path) -> Result<(), String> {
        match merge_ops::sync_rebase(self.lock, repo_root, &self.mainline_branch) {
            Ok(_) => Ok(()),
            Err(GitError::RebaseConflict { sha, summary }) => {
                if self.problematic_commits.contains(&sha) {
                    info!(sha, "repeated rebase conflict, falling back to merge-strategy pull");
                    match merge_ops::sync_merge(self.lock, repo_root, &self.mainline_branch) {
                        Ok(_) => Ok(()),
                        Err(e) => Err(format!("fallback merge-pull also failed: {e}")),
                    }
                } else {
                    self.problematic_commits.insert(sha.clone());
                    Err(format!("rebase conflict on {sha} ({summary}), continuing without pull"))
                }
            }
            Err(e) => Err(e.to_string()),
        }
    }

    fn pop_stash(&mut self, repo_root: &std::path::Path, issue_id: &str) {
        if let Err(e) = merge_ops::stash_pop(self.lock, repo_root) {
            self.stash_pop_failures.fetch_add(1, Ordering::SeqCst);
            self.stash_warnings.push(StashPopWarning {
                issue_id: issue_id.to_owned(),
                recovery_hint: format!("stash pop failed ({e}); recover manually with `git stash list` / `git stash pop`"),
            });
        }
    }

    fn record_merge_failure(&mut self, result: &WorkerResult, detail: String) {
        warn!(issue_id = %result.issue_id, detail, "merge failed, mainline unchanged");
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.failed_merges.push(FailedMerge {
            issue_id: result.issue_id.clone(),
            detail,
        });
        if let Some(cb) = &self.stage_callback {
            cb(&result.issue_id, Stage::Failed);
        }
    }

    fn cleanup_worktree(&self, path: &PathBuf) {
        if path.as_os_str().is_empty() {
            return;
        }
        let mut attempts = 0;
        loop {
            match worktree::remove(self.lock, path) {
                Ok(()) => return,
                Err(e) if attempts < WORKTREE_REMOVE_RETRIES => {
                    attempts += 1;
                    warn!(path = %path.display(), attempt = attempts, error = %e, "retrying worktree removal");
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "giving up on worktree removal");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;
    use std::sync::mpsc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.name", "Test"],
            vec!["config", "user.email", "t@t.com"],
            vec!["config", "commit.gpgsign", "false"],
        ] {
            Command::new("git").args(args).current_dir(root).output().unwrap();
        }
        std::fs::write(root.join("a.txt"), "1\n").unwrap();
        Command::new("git").args(["add", "."]).current_dir(root).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(root).output().unwrap();
        dir
    }

    fn default_branch(root: &std::path::Path) -> String {
        String::from_utf8_lossy(&Command::new("git").args(["branch", "--show-current"]).current_dir(root).output().unwrap().stdout)
            .trim()
            .to_owned()
    }

    #[test]
    fn merges_a_successful_worker_result() {
        use llp_git::GitRepo;
        let dir = init_repo();
        let root = dir.path();
        let branch = default_branch(root);
        let lock = GitLock::new(GitRepo::new(root));

        Command::new("git").args(["checkout", "-q", "-b", "llp/FEAT-1-1"]).current_dir(root).output().unwrap();
        std::fs::write(root.join("b.txt"), "feature\n").unwrap();
        Command::new("git").args(["add", "."]).current_dir(root).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "feature"]).current_dir(root).output().unwrap();
        Command::new("git").args(["checkout", "-q", &branch]).current_dir(root).output().unwrap();

        let (tx, rx) = mpsc::channel();
        tx.send(WorkerResult {
            issue_id: "FEAT-1".to_owned(),
            branch_name: "llp/FEAT-1-1".to_owned(),
            worktree_path: PathBuf::new(),
            success: true,
            interrupted: false,
            changed_files: vec![PathBuf::from("b.txt")],
            stderr_digest: String::new(),
            stage_at_exit: Stage::Merging,
            corrections: vec![],
            timing: Duration::ZERO,
        })
        .unwrap();
        drop(tx);

        let mut coordinator = MergeCoordinator::new(&lock, branch, rx);
        coordinator.drain(10);

        assert_eq!(coordinator.counters().completed_count, 1);
        assert_eq!(coordinator.counters().failed_count, 0);
        assert!(root.join("b.txt").exists());
    }

    #[test]
    fn failed_worker_result_is_counted_failed_without_merging() {
        use llp_git::GitRepo;
        let dir = init_repo();
        let root = dir.path();
        let branch = default_branch(root);
        let lock = GitLock::new(GitRepo::new(root));

        let (tx, rx) = mpsc::channel();
        tx.send(WorkerResult {
            issue_id: "BUG-1".to_owned(),
            branch_name: String::new(),
            worktree_path: PathBuf::new(),
            success: false,
            interrupted: false,
            changed_files: vec![],
            stderr_digest: "validation failed".to_owned(),
            stage_at_exit: Stage::Failed,
            corrections: vec![],
            timing: Duration::ZERO,
        })
        .unwrap();
        drop(tx);

        let mut coordinator = MergeCoordinator::new(&lock, branch, rx);
        coordinator.drain(10);

        assert_eq!(coordinator.counters().failed_count, 1);
        assert_eq!(coordinator.counters().completed_count, 0);
        assert!(coordinator.failed_merges().is_empty());
    }
}
