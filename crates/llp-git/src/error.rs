//! Error type for subprocess-based git operations.
//!
//! [`GitError`] is returned by every function in this crate. It carries
//! enough context (the command line and captured stderr) that callers —
//! including [`llp::LlpError`](../../../src/error.rs), which wraps it via
//! `From` — can render an actionable message without re-running git.

use thiserror::Error;

/// Errors returned by `llp-git` operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// A git subprocess exited with a non-zero status.
    #[error("`git {args}` failed (exit code {exit_code:?}): {stderr}")]
    CommandFailed {
        /// The argument list passed to `git`, space-joined for display.
        args: String,
        /// Captured stderr, trimmed.
        stderr: String,
        /// Process exit code, if the process was not killed by a signal.
        exit_code: Option<i32>,
    },

    /// The git subprocess could not be spawned at all (e.g. binary missing).
    #[error("failed to spawn `git {args}`: {source}")]
    Spawn {
        /// The argument list passed to `git`, space-joined for display.
        args: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A rebase landed in a conflicted state and could not be auto-resolved.
    #[error("rebase conflict on commit {sha}: {summary}")]
    RebaseConflict {
        /// The 40-character SHA of the commit that could not be replayed.
        sha: String,
        /// The commit subject line, as reported by the `dropping <sha> ...` line.
        summary: String,
    },

    /// A merge produced conflicts; the merge was aborted and mainline is
    /// unchanged.
    #[error("merge conflict merging branch `{branch}`")]
    MergeConflict {
        /// The branch that could not be merged.
        branch: String,
    },

    /// The subprocess ran past its allotted timeout and was killed.
    #[error("`git {args}` timed out after {timeout_secs}s")]
    Timeout {
        /// The argument list passed to `git`, space-joined for display.
        args: String,
        /// The timeout that was exceeded.
        timeout_secs: u64,
    },
}

impl GitError {
    /// The git command line that failed, for display in a wrapping error.
    #[must_use]
    pub fn command(&self) -> &str {
        match self {
            Self::CommandFailed { args, .. } | Self::Spawn { args, .. } | Self::Timeout { args, .. } => args,
            Self::RebaseConflict { .. } => "git rebase",
            Self::MergeConflict { .. } => "git merge",
        }
    }

    /// Captured stderr, or an empty string if this variant has none.
    #[must_use]
    pub fn stderr(&self) -> &str {
        match self {
            Self::CommandFailed { stderr, .. } => stderr,
            _ => "",
        }
    }
}
