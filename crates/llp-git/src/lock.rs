//! Process-wide git lock with retry/backoff for transient failures.
//!
//! Only one git invocation against a given repository may run at a time —
//! concurrent worktree operations and concurrent merges both touch the same
//! `.git` directory, and git itself does not promise safety across parallel
//! invocations. [`GitLock`] serializes every command through a single
//! [`Mutex`], and retries commands that fail for reasons likely to clear up
//! on their own (a competing process holding `index.lock`, a transient
//! network blip during `fetch`/`pull`).
//!
//! The retry shape is grounded on the sibling `shipper-retry` crate's
//! `RetryPolicy`/`RetryStrategyConfig`: capped exponential backoff with
//! jitter, reimplemented here directly since this isn't a generically
//! reusable dependency.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rand::Rng as _;
use tracing::warn;

use crate::error::GitError;
use crate::repo::GitRepo;

/// Backoff policy for retried git operations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (non-retry) one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on the computed delay, before jitter.
    pub max_delay: Duration,
    /// Fraction of the computed delay to randomize, in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: 0.3,
        }
    }
}

impl RetryPolicy {
    /// Never retry — run the operation exactly once.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_millis(0),
            max_delay: Duration::from_millis(0),
            jitter: 0.0,
        }
    }

    /// Compute the delay before attempt `attempt` (1-based: the delay before
    /// the *second* attempt is `delay_for(1)`), with jitter applied.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * 2f64.powi(attempt as i32 - 1);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let jitter_span = capped * self.jitter;
        let jittered = if jitter_span > 0.0 {
            let mut rng = rand::rng();
            capped - jitter_span + rng.random::<f64>() * 2.0 * jitter_span
        } else {
            capped
        };
        Duration::from_millis(jittered.max(0.0) as u64)
    }
}

/// Whether a [`GitError`] is worth retrying.
///
/// `CommandFailed` is retried only when stderr looks like lock contention or
/// a transient network failure — a real merge conflict or bad-ref error
/// should surface immediately rather than burn through the retry budget.
fn is_transient(err: &GitError) -> bool {
    match err {
        GitError::Timeout { .. } => true,
        GitError::CommandFailed { stderr, .. } => {
            let lower = stderr.to_lowercase();
            lower.contains("index.lock")
                || lower.contains("unable to create")
                || lower.contains("could not lock")
                || lower.contains("early eof")
                || lower.contains("connection")
                || lower.contains("timed out")
                || lower.contains("could not resolve host")
        }
        GitError::Spawn { .. } | GitError::RebaseConflict { .. } | GitError::MergeConflict { .. } => false,
    }
}

/// A [`GitRepo`] guarded by a process-wide mutex, with retry for transient
/// failures.
pub struct GitLock {
    repo: GitRepo,
    mutex: Mutex<()>,
    policy: RetryPolicy,
}

impl GitLock {
    /// Wrap `repo` with the default retry policy.
    #[must_use]
    pub fn new(repo: GitRepo) -> Self {
        Self::with_policy(repo, RetryPolicy::default())
    }

    /// Wrap `repo` with a custom retry policy.
    #[must_use]
    pub fn with_policy(repo: GitRepo, policy: RetryPolicy) -> Self {
        Self {
            repo,
            mutex: Mutex::new(()),
            policy,
        }
    }

    /// The wrapped repository handle, for read-only inspection that doesn't
    /// need locking (e.g. computing a worktree path).
    #[must_use]
    pub fn repo(&self) -> &GitRepo {
        &self.repo
    }

    /// Run `git <args>` in `dir`, holding the lock for exactly one
    /// invocation per attempt, retrying transient failures per the
    /// configured policy.
    ///
    /// # Errors
    /// Returns the last [`GitError`] encountered once attempts are
    /// exhausted, or immediately for a non-transient error.
    pub fn run(&self, dir: &Path, args: &[&str], timeout: Option<Duration>) -> Result<std::process::Output, GitError> {
        let mut attempt = 1;
        loop {
            let result = {
                // Poisoning here would mean a prior holder panicked mid-git-call;
                // recovering the guard is correct since the repository itself is
                // left in whatever state git left it, which callers already
                // handle via normal error paths.
                let _guard = self.mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                self.repo.run_in(dir, args, timeout)
            };

            match result {
                Ok(out) => return Ok(out),
                Err(err) if attempt < self.policy.max_attempts && is_transient(&err) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        args = args.join(" "),
                        "transient git failure, retrying"
                    );
                    std::thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run `git <args>` in the repository root. See [`Self::run`].
    ///
    /// # Errors
    /// See [`Self::run`].
    pub fn run_root(&self, args: &[&str]) -> Result<std::process::Output, GitError> {
        let root = self.repo.root().to_path_buf();
        self.run(&root, args, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_policy_never_retries() {
        let policy = RetryPolicy::none();
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn delay_grows_and_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: 0.0,
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        // 800 would be next, but capped at 500.
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(1000),
            jitter: 0.3,
        };
        for _ in 0..50 {
            let d = policy.delay_for(1).as_millis();
            assert!((700..=1300).contains(&d), "delay {d} out of jitter bounds");
        }
    }

    #[test]
    fn is_transient_classifies_lock_contention() {
        let err = GitError::CommandFailed {
            args: "commit".into(),
            stderr: "fatal: Unable to create '.git/index.lock': File exists.".into(),
            exit_code: Some(128),
        };
        assert!(is_transient(&err));
    }

    #[test]
    fn is_transient_rejects_real_conflicts() {
        let err = GitError::MergeConflict {
            branch: "llp/BUG-1-123".into(),
        };
        assert!(!is_transient(&err));
    }
}
