//! FSM data model: loop definitions, states, run state, and events.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::state::now_iso8601;

/// How a state's action string is interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Prompt,
    SlashCommand,
    Shell,
}

impl ActionType {
    /// Default heuristic when a state doesn't declare `action_type`:
    /// strings beginning with `/` are slash commands, everything else is
    /// shell.
    #[must_use]
    pub fn infer(command: &str) -> Self {
        if command.starts_with('/') {
            Self::SlashCommand
        } else {
            Self::Shell
        }
    }
}

/// A state's action: what to run, how to interpret it, and its timeout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    pub command: String,
    pub action_type: Option<ActionType>,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl ActionSpec {
    /// The effective [`ActionType`], falling back to [`ActionType::infer`].
    #[must_use]
    pub fn effective_type(&self) -> ActionType {
        self.action_type.unwrap_or_else(|| ActionType::infer(&self.command))
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// Routing table keyed by verdict string. Shorthand fields (`on_success`,
/// `on_failure`, `on_error`) are merged into `route` at compile time; the
/// compiled form only ever needs the map plus an optional default.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteTable {
    pub route: HashMap<String, String>,
    pub default: Option<String>,
}

impl RouteTable {
    /// Resolve a verdict to the next state name, falling back to `default`.
    #[must_use]
    pub fn resolve(&self, verdict: &str) -> Option<&str> {
        self.route.get(verdict).map(String::as_str).or(self.default.as_deref())
    }
}

/// A single state in a compiled FSM.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct State {
    pub action: ActionSpec,
    pub evaluator: crate::fsm::evaluator::Evaluator,
    pub routes: RouteTable,
    pub terminal: bool,
}

/// An immutable, compiled FSM loop definition (the output of paradigm
/// compilation, or hand-authored directly).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoopDefinition {
    pub name: String,
    pub initial: String,
    pub states: HashMap<String, State>,
    pub scope: Vec<PathBuf>,
    pub max_iterations: u32,
}

impl LoopDefinition {
    /// Structural validation for a hand-authored or loaded definition: the
    /// initial state is declared, every route target names a declared
    /// state, and at least one state is terminal.
    ///
    /// # Errors
    /// Returns a human-readable description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if !self.states.contains_key(&self.initial) {
            return Err(format!("initial state '{}' is not declared", self.initial));
        }
        for (name, state) in &self.states {
            for target in state.routes.route.values().chain(state.routes.default.iter()) {
                if !self.states.contains_key(target) {
                    return Err(format!("state '{name}' routes to undeclared state '{target}'"));
                }
            }
        }
        if !self.states.values().any(|s| s.terminal) {
            return Err("no state is marked terminal; the loop can never complete".to_owned());
        }
        Ok(())
    }
}

/// Why a run terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminatedBy {
    Terminal,
    MaxIterations,
    Cancelled,
    Error,
}

/// Run status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

/// Mutable per-run FSM state, the unit persisted by the Persistent
/// Executor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub current_state: String,
    pub iteration: u32,
    pub status: RunStatus,
    pub last_verdict: Option<String>,
    pub terminated_by: Option<TerminatedBy>,
    pub started_at: String,
    pub updated_at: String,
}

impl RunState {
    /// A fresh run state at `initial`, iteration 0.
    #[must_use]
    pub fn new(initial: &str) -> Self {
        let now = now_iso8601();
        Self {
            current_state: initial.to_owned(),
            iteration: 0,
            status: RunStatus::Pending,
            last_verdict: None,
            terminated_by: None,
            started_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_iso8601();
    }
}

/// An append-only event record. `fields` carries event-specific payload;
/// the envelope always carries `event` and `ts` so the on-disk stream
/// matches the spec's `{event, ts, …}` shape.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub event: String,
    pub ts: String,
    #[serde(flatten)]
    pub fields: serde_json::Value,
}

impl Event {
    fn new(name: &str, fields: serde_json::Value) -> Self {
        Self {
            event: name.to_owned(),
            ts: now_iso8601(),
            fields,
        }
    }

    #[must_use]
    pub fn loop_start() -> Self {
        Self::new("loop_start", json!({}))
    }

    #[must_use]
    pub fn state_enter(state: &str, iteration: u32) -> Self {
        Self::new("state_enter", json!({ "state": state, "iteration": iteration }))
    }

    #[must_use]
    pub fn action_start(state: &str) -> Self {
        Self::new("action_start", json!({ "state": state }))
    }

    #[must_use]
    pub fn action_complete(state: &str, exit_code: Option<i32>) -> Self {
        Self::new("action_complete", json!({ "state": state, "exit_code": exit_code }))
    }

    #[must_use]
    pub fn evaluate(verdict: &str) -> Self {
        Self::new("evaluate", json!({ "verdict": verdict }))
    }

    #[must_use]
    pub fn route(from: &str, to: Option<&str>) -> Self {
        Self::new("route", json!({ "from": from, "to": to }))
    }

    #[must_use]
    pub fn iteration_complete(iteration: u32) -> Self {
        Self::new("iteration_complete", json!({ "iteration": iteration }))
    }

    #[must_use]
    pub fn loop_complete(terminated_by: TerminatedBy) -> Self {
        Self::new("loop_complete", json!({ "terminated_by": terminated_by }))
    }

    #[must_use]
    pub fn handoff_spawned(pid: u32) -> Self {
        Self::new("handoff_spawned", json!({ "pid": pid }))
    }
}
