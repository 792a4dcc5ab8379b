//! Crash-safe wrapper around [`Engine`]: every event is appended to a
//! JSON-lines stream and fsynced at terminal/iteration boundaries, and the
//! run state is snapshotted via write-to-temp-then-rename after every
//! transition, so a killed process can resume exactly where it left off.

use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use tracing::debug;

use crate::error::LlpError;
use crate::fsm::engine::Engine;
use crate::fsm::types::{Event, LoopDefinition, RunState};
use crate::state::write_json_atomic;

/// Where a run's durable state lives: `<dir>/state.json` and
/// `<dir>/events.jsonl`.
pub struct PersistentExecutor {
    dir: PathBuf,
}

impl PersistentExecutor {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join("state.json")
    }

    fn events_path(&self) -> PathBuf {
        self.dir.join("events.jsonl")
    }

    /// Load a previously persisted [`RunState`], if one exists.
    pub fn load(&self) -> Result<Option<RunState>, LlpError> {
        let path = self.state_path();
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        let state = serde_json::from_str(&raw).map_err(|e| LlpError::StateCorrupted {
            path: path.clone(),
            detail: e.to_string(),
        })?;
        Ok(Some(state))
    }

    /// Run `def` from `state` (a fresh [`RunState::new`] or one loaded via
    /// [`Self::load`] for resumption), persisting every event and state
    /// transition as it happens.
    pub fn run(&self, def: &LoopDefinition, state: RunState, cancel: &AtomicBool) -> Result<RunState, LlpError> {
        std::fs::create_dir_all(&self.dir)?;
        write_json_atomic(&self.state_path(), &state)?;

        let mut events_file = OpenOptions::new().create(true).append(true).open(self.events_path())?;

        let engine = Engine::new(def);
        let mut persist_err: Option<LlpError> = None;

        let final_state = engine.run(state, cancel, |run_state, event| {
            if let Err(e) = Self::append_event(&mut events_file, &event) {
                persist_err.get_or_insert(e);
            }
            if let Err(e) = write_json_atomic(&self.state_path(), run_state) {
                persist_err.get_or_insert(e);
            }
            debug!(event = %event.event, state = %run_state.current_state, "fsm event persisted");
        });

        if let Some(err) = persist_err {
            return Err(err);
        }
        Ok(final_state)
    }

    fn append_event(file: &mut File, event: &Event) -> Result<(), LlpError> {
        let line = serde_json::to_string(event).map_err(|e| std::io::Error::other(e.to_string()))?;
        writeln!(file, "{line}")?;
        // Event boundaries are the recovery points; fsync every one rather
        // than batching so a crash never loses an already-observed event.
        file.sync_data()?;
        Ok(())
    }

    /// Read back the full event stream, in order. Malformed trailing lines
    /// (a crash mid-write) are dropped rather than failing the read.
    pub fn read_events(path: &Path) -> Result<Vec<Event>, LlpError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(raw.lines().filter_map(|line| serde_json::from_str(line).ok()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::evaluator::Evaluator;
    use crate::fsm::types::{ActionSpec, ActionType, RouteTable, RunStatus, State, TerminatedBy};
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    fn quick_spec() -> ActionSpec {
        ActionSpec {
            command: "true".to_owned(),
            action_type: Some(ActionType::Shell),
            timeout: Duration::from_secs(5),
        }
    }

    fn one_state_def() -> LoopDefinition {
        let mut states = HashMap::new();
        states.insert(
            "go".to_owned(),
            State {
                action: quick_spec(),
                evaluator: Evaluator::ExitCode,
                routes: RouteTable {
                    route: [("success".to_owned(), "done".to_owned())].into_iter().collect(),
                    default: Some("escalate".to_owned()),
                },
                terminal: false,
            },
        );
        states.insert(
            "done".to_owned(),
            State {
                action: quick_spec(),
                evaluator: Evaluator::ExitCode,
                routes: RouteTable::default(),
                terminal: true,
            },
        );
        LoopDefinition {
            name: "persisted".to_owned(),
            initial: "go".to_owned(),
            states,
            scope: vec![],
            max_iterations: 5,
        }
    }

    #[test]
    fn run_persists_state_and_events() {
        let dir = tempdir().expect("tempdir");
        let executor = PersistentExecutor::new(dir.path());
        let def = one_state_def();
        let cancel = AtomicBool::new(false);

        let final_state = executor.run(&def, RunState::new(&def.initial), &cancel).expect("run");
        assert_eq!(final_state.status, RunStatus::Completed);
        assert_eq!(final_state.terminated_by, Some(TerminatedBy::Terminal));

        let loaded = executor.load().expect("load").expect("state present");
        assert_eq!(loaded.current_state, "done");

        let events = PersistentExecutor::read_events(&dir.path().join("events.jsonl")).expect("events");
        assert!(events.iter().any(|e| e.event == "loop_start"));
        assert!(events.iter().any(|e| e.event == "loop_complete"));
    }

    #[test]
    fn resuming_continues_from_loaded_state() {
        let dir = tempdir().expect("tempdir");
        let executor = PersistentExecutor::new(dir.path());
        let def = one_state_def();
        let cancel = AtomicBool::new(false);

        let mut mid_run = RunState::new(&def.initial);
        mid_run.status = RunStatus::Running;
        mid_run.current_state = "go".to_owned();
        std::fs::create_dir_all(dir.path()).expect("mkdir");
        write_json_atomic(&dir.path().join("state.json"), &mid_run).expect("seed state");

        let loaded = executor.load().expect("load").expect("present");
        let final_state = executor.run(&def, loaded, &cancel).expect("run");
        assert_eq!(final_state.current_state, "done");
    }
}
