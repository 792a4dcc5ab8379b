//! File-based, PID-validated locks over path scopes for named FSM loops.
//!
//! One JSON file per active loop under `.loops/.running/<name>.lock`. A
//! lock is considered live only while its recorded PID is alive; any scan
//! reaps locks whose owner process has exited, so a crashed loop's scope
//! becomes available again without manual cleanup.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs4::fs_std::FileExt as _;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::error::LlpError;

/// A persisted scope lock, as written to `<name>.lock`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeLock {
    pub loop_name: String,
    pub scope: Vec<PathBuf>,
    pub pid: u32,
    pub started_at: String,
}

/// Manages scope locks under a single `.loops/.running` directory.
pub struct ScopeLockManager {
    dir: PathBuf,
}

impl ScopeLockManager {
    /// Create a manager rooted at `dir` (typically `.loops/.running`).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.lock"))
    }

    /// Normalize a requested scope: realpath each entry, drop trailing
    /// slashes, and treat an empty scope as project-wide (`["."]`).
    #[must_use]
    pub fn normalize_scope(paths: &[PathBuf]) -> Vec<PathBuf> {
        if paths.is_empty() {
            return vec![PathBuf::from(".")];
        }
        paths
            .iter()
            .map(|p| std::fs::canonicalize(p).unwrap_or_else(|_| p.clone()))
            .collect()
    }

    /// Acquire a scope lock for `name`. Scans existing lock files, reaping
    /// any whose owning PID is no longer alive. If a surviving lock's scope
    /// overlaps `scope`, returns a conflict error. Otherwise writes the
    /// lock file under an exclusive advisory file lock.
    ///
    /// # Errors
    /// Returns [`LlpError::ScopeConflict`] if an overlapping lock is held,
    /// or [`LlpError::Io`] on filesystem failure.
    pub fn acquire(&self, name: &str, scope: &[PathBuf]) -> Result<(), LlpError> {
        let normalized = Self::normalize_scope(scope);

        if let Some(conflict) = self.find_conflict(&normalized) {
            return Err(LlpError::ScopeConflict {
                requested: normalized,
                holder: conflict.loop_name,
            });
        }

        std::fs::create_dir_all(&self.dir)?;
        let path = self.lock_path(name);
        let mut file = std::fs::File::options().write(true).create(true).truncate(true).open(&path)?;
        file.lock_exclusive()?;

        let record = ScopeLock {
            loop_name: name.to_owned(),
            scope: normalized,
            pid: std::process::id(),
            started_at: crate::state::now_iso8601(),
        };
        let body = serde_json::to_vec_pretty(&record).map_err(|e| std::io::Error::other(e.to_string()))?;
        file.write_all(&body)?;
        file.sync_all()?;
        let _ = FileExt::unlock(&file);
        Ok(())
    }

    /// Release `name`'s lock. Missing-ok: releasing a lock that doesn't
    /// exist is not an error.
    ///
    /// # Errors
    /// Returns [`LlpError::Io`] only for failures other than not-found.
    pub fn release(&self, name: &str) -> Result<(), LlpError> {
        match std::fs::remove_file(self.lock_path(name)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The first surviving lock whose scope overlaps `scope`, reaping dead
    /// locks along the way.
    #[must_use]
    pub fn find_conflict(&self, scope: &[PathBuf]) -> Option<ScopeLock> {
        self.surviving_locks().into_iter().find(|lock| scopes_overlap(&lock.scope, scope))
    }

    /// Poll for `scope` to become available, returning `true` once free or
    /// `false` on timeout.
    #[must_use]
    pub fn wait_for_scope(&self, scope: &[PathBuf], timeout: Duration) -> bool {
        const POLL_INTERVAL: Duration = Duration::from_millis(200);
        let normalized = Self::normalize_scope(scope);
        let start = Instant::now();
        loop {
            if self.find_conflict(&normalized).is_none() {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    /// Read every lock file in the directory, reaping ones whose PID is
    /// dead, and return the survivors. Malformed lock files are skipped
    /// silently.
    fn surviving_locks(&self) -> Vec<ScopeLock> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut survivors = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("lock") {
                continue;
            }
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(lock) = serde_json::from_str::<ScopeLock>(&contents) else {
                continue;
            };
            if pid_is_alive(lock.pid) {
                survivors.push(lock);
            } else {
                let _ = std::fs::remove_file(&path);
            }
        }
        survivors
    }
}

/// Whether `pid` refers to a live process, using `kill(pid, 0)` (signal 0
/// tests existence without delivering anything). An error means no
/// process; a permission error (different owning user, still alive) is
/// conservatively treated as alive.
fn pid_is_alive(pid: u32) -> bool {
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// Two scopes overlap iff any pair of paths is equal or one is an ancestor
/// of the other.
fn scopes_overlap(a: &[PathBuf], b: &[PathBuf]) -> bool {
    a.iter().any(|pa| b.iter().any(|pb| paths_overlap(pa, pb)))
}

fn paths_overlap(a: &Path, b: &Path) -> bool {
    a == b || a.starts_with(b) || b.starts_with(a)
}
