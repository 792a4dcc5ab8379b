//! Low-level subprocess wrapper around the `git` binary.
//!
//! Every method here shells out to `git` directly, following the pattern in
//! the teacher's `src/backend/git.rs`: plain `std::process::Command`, no git
//! library binding. All error handling goes through [`GitError`].

use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::GitError;

/// A git repository, addressed by its working-directory root.
///
/// `GitRepo` itself does not serialize concurrent access — that's
/// [`crate::lock::GitLock`]'s job. This type only knows how to run one git
/// command at a time and parse its output.
#[derive(Clone, Debug)]
pub struct GitRepo {
    root: PathBuf,
}

impl GitRepo {
    /// Wrap an existing git repository at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The repository root this handle was constructed with.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `git <args>` in the repository root with no timeout.
    ///
    /// # Errors
    /// Returns [`GitError::Spawn`] if the process could not be started, or
    /// [`GitError::CommandFailed`] if it exited non-zero.
    pub fn run(&self, args: &[&str]) -> Result<Output, GitError> {
        self.run_in(&self.root, args, None)
    }

    /// Run `git <args>` in `dir` with no timeout.
    ///
    /// # Errors
    /// See [`Self::run`].
    pub fn run_in(&self, dir: &Path, args: &[&str], timeout: Option<Duration>) -> Result<Output, GitError> {
        let args_joined = args.join(" ");
        debug!(dir = %dir.display(), args = %args_joined, "running git command");

        let mut child = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| GitError::Spawn {
                args: args_joined.clone(),
                source,
            })?;

        let output = match timeout {
            None => child.wait_with_output().map_err(|source| GitError::Spawn {
                args: args_joined.clone(),
                source,
            })?,
            Some(limit) => wait_with_timeout(&mut child, limit, &args_joined)?,
        };

        if output.status.success() {
            Ok(output)
        } else {
            Err(GitError::CommandFailed {
                args: args_joined,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
                exit_code: output.status.code(),
            })
        }
    }

    /// Run a command and return trimmed stdout as a `String`.
    ///
    /// # Errors
    /// See [`Self::run`].
    pub fn stdout(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.run(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    /// Run a command in `dir` and return trimmed stdout as a `String`.
    ///
    /// # Errors
    /// See [`Self::run`].
    pub fn stdout_in(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        let output = self.run_in(dir, args, None)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

/// Poll a spawned child until it exits or `limit` elapses, then kill it on
/// timeout. Avoids a dependency on an async runtime for what is, in this
/// codebase, always a short-lived blocking call from a worker thread.
fn wait_with_timeout(
    child: &mut std::process::Child,
    limit: Duration,
    args_joined: &str,
) -> Result<Output, GitError> {
    let start = Instant::now();
    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    loop {
        if let Some(status) = child.try_wait().map_err(|source| GitError::Spawn {
            args: args_joined.to_owned(),
            source,
        })? {
            // Child already exited; collect whatever output is buffered.
            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            if let Some(mut out) = child.stdout.take() {
                use std::io::Read as _;
                let _ = out.read_to_end(&mut stdout);
            }
            if let Some(mut err) = child.stderr.take() {
                use std::io::Read as _;
                let _ = err.read_to_end(&mut stderr);
            }
            return Ok(Output {
                status,
                stdout,
                stderr,
            });
        }

        if start.elapsed() >= limit {
            let _ = child.kill();
            let _ = child.wait();
            return Err(GitError::Timeout {
                args: args_joined.to_owned(),
                timeout_secs: limit.as_secs(),
            });
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn init_repo() -> (TempDir, GitRepo) {
        let dir = TempDir::new().unwrap();
        let root = dir.path().to_path_buf();
        Command::new("git").args(["init", "-q"]).current_dir(&root).output().unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(&root).output().unwrap();
        Command::new("git").args(["config", "user.email", "t@t.com"]).current_dir(&root).output().unwrap();
        Command::new("git").args(["config", "commit.gpgsign", "false"]).current_dir(&root).output().unwrap();
        fs::write(root.join("README.md"), "hi\n").unwrap();
        Command::new("git").args(["add", "README.md"]).current_dir(&root).output().unwrap();
        Command::new("git").args(["commit", "-q", "-m", "init"]).current_dir(&root).output().unwrap();
        let repo = GitRepo::new(root);
        (dir, repo)
    }

    #[test]
    fn run_succeeds_on_valid_repo() {
        let (_dir, repo) = init_repo();
        let out = repo.stdout(&["rev-parse", "HEAD"]).unwrap();
        assert_eq!(out.len(), 40);
    }

    #[test]
    fn run_fails_with_stderr_on_bad_args() {
        let (_dir, repo) = init_repo();
        let err = repo.run(&["not-a-real-subcommand"]).unwrap_err();
        match err {
            GitError::CommandFailed { stderr, .. } => assert!(!stderr.is_empty()),
            other => panic!("expected CommandFailed, got {other:?}"),
        }
    }

    #[test]
    fn timeout_kills_long_running_command() {
        let (_dir, repo) = init_repo();
        // `git` has no builtin sleep, so exercise the timeout path against a
        // subcommand that blocks on stdin (never supplied, since we pass
        // `Stdio::null()`) by requesting a pack negotiation that needs input.
        let err = repo
            .run_in(repo.root(), &["cat-file", "--batch"], Some(Duration::from_millis(50)))
            .unwrap_err();
        assert!(matches!(err, GitError::Timeout { .. }));
    }
}
