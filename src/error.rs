//! Unified error type for orchestrator operations.
//!
//! Each variant is designed to be self-contained: the orchestrator logs
//! these directly, and an agent retrying a failed `llp` invocation should
//! be able to tell what happened and what to try next from the message
//! alone, without additional context.

use std::fmt;
use std::path::PathBuf;

/// Unified error type for `llp` orchestrator operations.
#[derive(Debug)]
pub enum LlpError {
    /// An issue file could not be parsed.
    IssueParse {
        /// Path to the offending issue file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// A dependency cycle was detected where one is required to be absent
    /// (e.g. a caller asked for a topological sort).
    DependencyCycle {
        /// The ids participating in the cycle, in cycle order.
        cycle: Vec<String>,
    },

    /// A scope lock could not be acquired because it overlaps a live lock.
    ScopeConflict {
        /// The scope that was requested.
        requested: Vec<PathBuf>,
        /// The name of the loop already holding an overlapping scope.
        holder: String,
    },

    /// A git command failed.
    GitError {
        /// The git command that was run (e.g. `"git worktree add"`).
        command: String,
        /// Captured stderr from git.
        stderr: String,
    },

    /// A merge could not be completed and mainline was left unchanged.
    MergeFailed {
        /// The issue id whose branch failed to merge.
        issue_id: String,
        /// Why the merge failed.
        detail: String,
    },

    /// A worker pipeline stage failed validation (`NOT_READY` from the
    /// ready agent, or a malformed structured response).
    ValidationFailed {
        /// The issue id being validated.
        issue_id: String,
        /// Human-readable description.
        detail: String,
    },

    /// An FSM loop definition is invalid.
    InvalidLoopDefinition {
        /// The loop's name.
        name: String,
        /// Why it's invalid.
        detail: String,
    },

    /// A configuration file could not be loaded or parsed.
    ConfigError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// State on disk was corrupted or inconsistent with what was expected.
    StateCorrupted {
        /// Path to the state file.
        path: PathBuf,
        /// Human-readable description of the corruption.
        detail: String,
    },

    /// An I/O error occurred during an orchestrator operation.
    Io(std::io::Error),
}

impl fmt::Display for LlpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IssueParse { path, detail } => {
                write!(
                    f,
                    "failed to parse issue file '{}': {detail}\n  To fix: check the filename matches P<n>-<TYPE>-<num>-<slug>.md and the body has a recognizable '# ID: Title' heading.",
                    path.display()
                )
            }
            Self::DependencyCycle { cycle } => {
                write!(
                    f,
                    "dependency cycle detected: {}\n  To fix: break the cycle by removing one 'Blocked By' edge.",
                    cycle.join(" -> ")
                )
            }
            Self::ScopeConflict { requested, holder } => {
                write!(
                    f,
                    "scope conflict: {} overlaps a scope already held by loop '{holder}'\n  To fix: wait for '{holder}' to release its scope, or pass --queue to block until it does.",
                    requested
                        .iter()
                        .map(|p| p.display().to_string())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            }
            Self::GitError { command, stderr } => {
                write!(f, "git command failed: {command}")?;
                if !stderr.is_empty() {
                    write!(f, "\n  stderr: {stderr}")?;
                }
                write!(
                    f,
                    "\n  To fix: check repository state and retry. Run `git status` for details."
                )
            }
            Self::MergeFailed { issue_id, detail } => {
                write!(
                    f,
                    "merge failed for '{issue_id}': {detail}\n  To fix: inspect the worker branch manually; mainline was left unchanged."
                )
            }
            Self::ValidationFailed { issue_id, detail } => {
                write!(
                    f,
                    "validation failed for '{issue_id}': {detail}\n  To fix: address the validator's concerns and requeue the issue."
                )
            }
            Self::InvalidLoopDefinition { name, detail } => {
                write!(
                    f,
                    "invalid loop definition '{name}': {detail}\n  To fix: run `llp loop validate {name}` and correct the reported issue."
                )
            }
            Self::ConfigError { path, detail } => {
                write!(
                    f,
                    "configuration error in '{}': {detail}\n  To fix: edit the config file and correct the issue.",
                    path.display()
                )
            }
            Self::StateCorrupted { path, detail } => {
                write!(
                    f,
                    "state file '{}' is corrupted: {detail}\n  To fix: inspect the file; if unrecoverable, remove it to start a fresh run (completed work will be re-attempted).",
                    path.display()
                )
            }
            Self::Io(err) => {
                write!(
                    f,
                    "I/O error: {err}\n  To fix: check file permissions and disk space."
                )
            }
        }
    }
}

impl std::error::Error for LlpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LlpError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<llp_git::GitError> for LlpError {
    fn from(err: llp_git::GitError) -> Self {
        Self::GitError {
            command: err.command().to_owned(),
            stderr: err.stderr().to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_dependency_cycle() {
        let err = LlpError::DependencyCycle {
            cycle: vec!["BUG-1".to_owned(), "BUG-2".to_owned(), "BUG-1".to_owned()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("BUG-1 -> BUG-2 -> BUG-1"));
        assert!(msg.contains("To fix"));
    }

    #[test]
    fn display_scope_conflict() {
        let err = LlpError::ScopeConflict {
            requested: vec![PathBuf::from("src/api")],
            holder: "loop-a".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("src/api"));
        assert!(msg.contains("loop-a"));
        assert!(msg.contains("--queue"));
    }

    #[test]
    fn display_merge_failed() {
        let err = LlpError::MergeFailed {
            issue_id: "BUG-42".to_owned(),
            detail: "conflict in src/lib.rs".to_owned(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("BUG-42"));
        assert!(msg.contains("mainline was left unchanged"));
    }

    #[test]
    fn display_io() {
        let err = LlpError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "missing"));
        let msg = format!("{err}");
        assert!(msg.contains("I/O error"));
    }
}
