//! Orchestrator state persistence: atomic JSON snapshot under
//! `.auto-state.json` (or a configured path).
//!
//! Writes are write-to-temp-then-rename. Reads merge on-disk state with an
//! in-memory snapshot (set union) so two orchestrator processes running
//! disjoint categories don't clobber each other's progress.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::LlpError;

/// Persisted orchestrator run state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorState {
    pub attempted_issue_ids: BTreeSet<String>,
    /// Completed ids, in completion order (not a set, despite the name
    /// matching the spec's "set, preserves order" description — dedup on
    /// insert, but insertion order is what callers observe and assert on).
    pub completed_issue_ids: Vec<String>,
    pub failed_issue_ids: BTreeSet<String>,
    pub corrections: BTreeMap<String, Vec<String>>,
    pub in_progress_ids: BTreeSet<String>,
    pub pending_merge_count: u64,
    pub rotating_log_tail: Vec<String>,
}

const LOG_TAIL_CAP: usize = 200;

impl OrchestratorState {
    /// Mark `id` as dispatched.
    pub fn mark_attempted(&mut self, id: &str) {
        self.attempted_issue_ids.insert(id.to_owned());
        self.in_progress_ids.insert(id.to_owned());
    }

    /// Mark `id` as completed and merged.
    pub fn mark_completed(&mut self, id: &str) {
        self.in_progress_ids.remove(id);
        self.failed_issue_ids.remove(id);
        if !self.completed_issue_ids.iter().any(|existing| existing == id) {
            self.completed_issue_ids.push(id.to_owned());
        }
    }

    /// Mark `id` as failed (validation failure or merge failure).
    pub fn mark_failed(&mut self, id: &str) {
        self.in_progress_ids.remove(id);
        self.failed_issue_ids.insert(id.to_owned());
    }

    /// Record a category-tagged correction for `id`.
    pub fn add_correction(&mut self, id: &str, note: String) {
        self.corrections.entry(id.to_owned()).or_default().push(note);
    }

    /// Append a line to the rotating log tail, capping its length.
    pub fn push_log_line(&mut self, line: String) {
        self.rotating_log_tail.push(line);
        if self.rotating_log_tail.len() > LOG_TAIL_CAP {
            let excess = self.rotating_log_tail.len() - LOG_TAIL_CAP;
            self.rotating_log_tail.drain(0..excess);
        }
    }

    /// Union `self` with `other`: every set field becomes the union; the
    /// completed list is merged order-preserving (self's order first, then
    /// any ids from `other` not already present); counters take the max.
    #[must_use]
    pub fn merged_with(mut self, other: Self) -> Self {
        self.attempted_issue_ids.extend(other.attempted_issue_ids);
        self.failed_issue_ids.extend(other.failed_issue_ids);
        self.in_progress_ids.extend(other.in_progress_ids);
        for id in other.completed_issue_ids {
            if !self.completed_issue_ids.iter().any(|existing| existing == &id) {
                self.completed_issue_ids.push(id);
            }
        }
        for (id, notes) in other.corrections {
            let entry = self.corrections.entry(id).or_default();
            for note in notes {
                if !entry.contains(&note) {
                    entry.push(note);
                }
            }
        }
        self.pending_merge_count = self.pending_merge_count.max(other.pending_merge_count);
        for line in other.rotating_log_tail {
            if !self.rotating_log_tail.contains(&line) {
                self.rotating_log_tail.push(line);
            }
        }
        if self.rotating_log_tail.len() > LOG_TAIL_CAP {
            let excess = self.rotating_log_tail.len() - LOG_TAIL_CAP;
            self.rotating_log_tail.drain(0..excess);
        }
        self
    }

    /// Load state from `path`, returning an empty default if the file
    /// doesn't exist.
    ///
    /// # Errors
    /// Returns [`LlpError::StateCorrupted`] if the file exists but is not
    /// valid JSON.
    pub fn load(path: &Path) -> Result<Self, LlpError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&contents).map_err(|e| LlpError::StateCorrupted {
            path: path.to_owned(),
            detail: e.to_string(),
        })
    }

    /// Reload the on-disk state (if any) and union it with `self`, then
    /// persist the merged result atomically. This is the read-merge-write
    /// cycle a caller should perform before and after every significant
    /// transition.
    ///
    /// # Errors
    /// Returns [`LlpError`] on I/O failure or if the on-disk file is
    /// corrupted.
    pub fn save_merged(self, path: &Path) -> Result<Self, LlpError> {
        let on_disk = Self::load(path)?;
        let merged = on_disk.merged_with(self);
        merged.clone().write_atomic(path)?;
        Ok(merged)
    }

    /// Write `self` to `path` via write-to-temp-then-rename, so no partial
    /// file is ever visible to a concurrent reader.
    ///
    /// # Errors
    /// Returns [`LlpError::Io`] on any filesystem failure.
    pub fn write_atomic(&self, path: &Path) -> Result<(), LlpError> {
        write_json_atomic(path, self)
    }
}

/// Serialize `value` as pretty JSON and write it to `path` via
/// write-to-temp-then-rename.
///
/// # Errors
/// Returns [`LlpError::Io`] on any filesystem failure.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), LlpError> {
    let body = serde_json::to_vec_pretty(value).map_err(|e| std::io::Error::other(e.to_string()))?;
    let tmp_path = tmp_path_for(path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&tmp_path, &body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_owned).unwrap_or_default();
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

/// Current wall-clock time as an ISO-8601 UTC timestamp, with no external
/// time crate: good enough precision (whole seconds) for lock/state
/// bookkeeping that's only ever read by humans or diffed for ordering.
#[must_use]
pub fn now_iso8601() -> String {
    let secs = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    format_unix_secs(secs)
}

fn format_unix_secs(secs: u64) -> String {
    const DAYS_IN_400_YEARS: i64 = 146_097;
    let days_since_epoch = (secs / 86_400) as i64;
    let secs_of_day = secs % 86_400;

    // Civil-from-days algorithm (Howard Hinnant), avoids a chrono dependency
    // for this one formatting need.
    let z = days_since_epoch + 719_468;
    let era = z.div_euclid(DAYS_IN_400_YEARS);
    let doe = z - era * DAYS_IN_400_YEARS;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    let h = secs_of_day / 3600;
    let min = (secs_of_day % 3600) / 60;
    let s = secs_of_day % 60;

    format!("{y:04}-{m:02}-{d:02}T{h:02}:{min:02}:{s:02}Z")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_missing_file_returns_default() {
        let state = OrchestratorState::load(Path::new("/nonexistent/.auto-state.json")).unwrap();
        assert_eq!(state, OrchestratorState::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".auto-state.json");
        let mut state = OrchestratorState::default();
        state.mark_attempted("FEAT-001");
        state.mark_completed("FEAT-001");
        state.write_atomic(&path).unwrap();

        let loaded = OrchestratorState::load(&path).unwrap();
        assert_eq!(loaded.completed_issue_ids, vec!["FEAT-001".to_owned()]);
    }

    #[test]
    fn write_atomic_leaves_no_tmp_file_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".auto-state.json");
        OrchestratorState::default().write_atomic(&path).unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn merged_with_unions_disjoint_writers() {
        let mut a = OrchestratorState::default();
        a.mark_completed("FEAT-001");
        let mut b = OrchestratorState::default();
        b.mark_completed("BUG-002");

        let merged = a.merged_with(b);
        assert!(merged.completed_issue_ids.contains(&"FEAT-001".to_owned()));
        assert!(merged.completed_issue_ids.contains(&"BUG-002".to_owned()));
    }

    #[test]
    fn save_merged_does_not_clobber_disk_progress() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".auto-state.json");

        let mut first = OrchestratorState::default();
        first.mark_completed("FEAT-001");
        first.write_atomic(&path).unwrap();

        let mut second = OrchestratorState::default();
        second.mark_completed("BUG-002");
        let merged = second.save_merged(&path).unwrap();

        assert!(merged.completed_issue_ids.contains(&"FEAT-001".to_owned()));
        assert!(merged.completed_issue_ids.contains(&"BUG-002".to_owned()));
    }

    #[test]
    fn iso8601_format_matches_known_epoch() {
        // 2021-01-01T00:00:00Z
        assert_eq!(format_unix_secs(1_609_459_200), "2021-01-01T00:00:00Z");
    }

    #[test]
    fn log_tail_is_capped() {
        let mut state = OrchestratorState::default();
        for i in 0..(LOG_TAIL_CAP + 10) {
            state.push_log_line(format!("line {i}"));
        }
        assert_eq!(state.rotating_log_tail.len(), LOG_TAIL_CAP);
        assert_eq!(state.rotating_log_tail.first().unwrap(), "line 10");
    }
}
