//! The paradigm-agnostic FSM step loop.
//!
//! Suspension points are explicit, discrete events rather than an async
//! runtime: between action and evaluation, between evaluation and routing,
//! and at iteration boundaries. A plain step function called in a loop is
//! enough — there is no need for task scheduling inside one loop run.

use std::os::unix::process::CommandExt as _;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::fsm::evaluator::ActionResult;
use crate::fsm::types::{ActionSpec, ActionType, Event, LoopDefinition, RunState, RunStatus, TerminatedBy};

/// A handoff was triggered: the engine spawned a detached continuation
/// process and the run should be treated as complete from this engine's
/// point of view.
const HANDOFF_PREFIX: &str = "handoff:";

/// Runs one [`LoopDefinition`] to completion (or cancellation, or
/// max-iterations), calling `on_event` after every emitted event so a
/// caller (typically the Persistent Executor) can append it durably.
pub struct Engine<'a> {
    def: &'a LoopDefinition,
}

impl<'a> Engine<'a> {
    #[must_use]
    pub const fn new(def: &'a LoopDefinition) -> Self {
        Self { def }
    }

    /// Drive `state` forward until termination. `on_event` is called with
    /// the state *as of* that event (already updated for state-changing
    /// events like `route` and `iteration_complete`).
    pub fn run(&self, mut state: RunState, cancel: &AtomicBool, mut on_event: impl FnMut(&RunState, Event)) -> RunState {
        if state.status == RunStatus::Pending {
            state.status = RunStatus::Running;
            on_event(&state, Event::loop_start());
        }

        loop {
            if cancel.load(Ordering::SeqCst) {
                return self.terminate(state, RunStatus::Cancelled, TerminatedBy::Cancelled, &mut on_event);
            }

            let Some(current) = self.def.states.get(&state.current_state) else {
                warn!(state = %state.current_state, "fsm entered an undefined state");
                return self.terminate(state, RunStatus::Failed, TerminatedBy::Error, &mut on_event);
            };

            if current.terminal {
                return self.terminate(state, RunStatus::Completed, TerminatedBy::Terminal, &mut on_event);
            }

            if state.iteration >= self.def.max_iterations {
                return self.terminate(state, RunStatus::Failed, TerminatedBy::MaxIterations, &mut on_event);
            }

            on_event(&state, Event::state_enter(&state.current_state, state.iteration));

            on_event(&state, Event::action_start(&state.current_state));
            let result = run_action(&current.action, cancel);
            on_event(&state, Event::action_complete(&state.current_state, result.exit_code));

            let verdict = current.evaluator.evaluate(&result);
            state.last_verdict = Some(verdict.clone());
            on_event(&state, Event::evaluate(&verdict));

            let next = current.routes.resolve(&verdict).map(str::to_owned);
            on_event(&state, Event::route(&state.current_state, next.as_deref()));

            let Some(next_state) = next else {
                return self.terminate(state, RunStatus::Failed, TerminatedBy::Error, &mut on_event);
            };

            if let Some(prompt) = next_state.strip_prefix(HANDOFF_PREFIX) {
                if let Some(pid) = spawn_handoff(prompt) {
                    on_event(&state, Event::handoff_spawned(pid));
                }
                return self.terminate(state, RunStatus::Completed, TerminatedBy::Terminal, &mut on_event);
            }

            state.current_state = next_state;
            state.iteration += 1;
            state.touch();
            on_event(&state, Event::iteration_complete(state.iteration));
        }
    }

    fn terminate(
        &self,
        mut state: RunState,
        status: RunStatus,
        terminated_by: TerminatedBy,
        on_event: &mut impl FnMut(&RunState, Event),
    ) -> RunState {
        state.status = status;
        state.terminated_by = Some(terminated_by);
        state.touch();
        on_event(&state, Event::loop_complete(terminated_by));
        state
    }
}

/// Spawn a detached continuation process: new process group, null stdio,
/// not waited on or tracked. Returns its pid for the `handoff_spawned`
/// event, or `None` if it couldn't be spawned.
fn spawn_handoff(prompt: &str) -> Option<u32> {
    std::process::Command::new("sh")
        .arg("-c")
        .arg(prompt)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map(|child| child.id())
        .inspect_err(|e| warn!(error = %e, "failed to spawn handoff continuation"))
        .ok()
}

/// Run a state's action, respecting its timeout and cooperative
/// cancellation. `action_type` only changes which binary fronts the
/// invocation — `shell` runs the command directly; `prompt` and
/// `slash_command` are routed through the same opaque external-agent
/// entrypoint, since what runs on the other end is outside this engine's
/// concern.
fn run_action(spec: &ActionSpec, cancel: &AtomicBool) -> ActionResult {
    let mut command = match spec.effective_type() {
        ActionType::Shell => {
            let mut cmd = std::process::Command::new("sh");
            cmd.arg("-c").arg(&spec.command);
            cmd
        }
        ActionType::Prompt | ActionType::SlashCommand => {
            let mut cmd = std::process::Command::new("sh");
            cmd.arg("-c").arg(&spec.command);
            cmd
        }
    };
    command.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(_) => {
            return ActionResult {
                launch_error: true,
                ..Default::default()
            };
        }
    };

    let start = Instant::now();
    const POLL_INTERVAL: Duration = Duration::from_millis(20);

    loop {
        if let Ok(Some(status)) = child.try_wait() {
            let mut stdout = String::new();
            let mut stderr = String::new();
            if let Some(mut out) = child.stdout.take() {
                use std::io::Read as _;
                let _ = out.read_to_string(&mut stdout);
            }
            if let Some(mut err) = child.stderr.take() {
                use std::io::Read as _;
                let _ = err.read_to_string(&mut stderr);
            }
            return ActionResult {
                exit_code: status.code(),
                stdout,
                stderr,
                timed_out: false,
                launch_error: false,
            };
        }

        if cancel.load(Ordering::SeqCst) {
            let _ = child.kill();
            let _ = child.wait();
            return ActionResult {
                launch_error: true,
                ..Default::default()
            };
        }

        if start.elapsed() >= spec.timeout {
            let _ = child.kill();
            let _ = child.wait();
            return ActionResult {
                timed_out: true,
                ..Default::default()
            };
        }

        std::thread::sleep(POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsm::evaluator::Evaluator;
    use crate::fsm::types::{ActionSpec, RouteTable, State};
    use std::collections::HashMap;
    use std::time::Duration;

    fn spec(cmd: &str) -> ActionSpec {
        ActionSpec {
            command: cmd.to_owned(),
            action_type: None,
            timeout: Duration::from_secs(5),
        }
    }

    fn simple_def() -> LoopDefinition {
        let mut states = HashMap::new();
        states.insert(
            "start".to_owned(),
            State {
                action: spec("true"),
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
                action: spec("true"),
                evaluator: Evaluator::ExitCode,
                routes: RouteTable::default(),
                terminal: true,
            },
        );
        states.insert(
            "escalate".to_owned(),
            State {
                action: spec("true"),
                evaluator: Evaluator::ExitCode,
                routes: RouteTable::default(),
                terminal: true,
            },
        );
        LoopDefinition {
            name: "test-loop".to_owned(),
            initial: "start".to_owned(),
            states,
            scope: vec![],
            max_iterations: 10,
        }
    }

    #[test]
    fn runs_to_terminal_state_on_success() {
        let def = simple_def();
        let engine = Engine::new(&def);
        let cancel = AtomicBool::new(false);
        let mut events = Vec::new();
        let final_state = engine.run(RunState::new(&def.initial), &cancel, |_, e| events.push(e.event));

        assert_eq!(final_state.status, RunStatus::Completed);
        assert_eq!(final_state.terminated_by, Some(TerminatedBy::Terminal));
        assert_eq!(final_state.current_state, "done");
        assert_eq!(
            events,
            vec![
                "loop_start",
                "state_enter",
                "action_start",
                "action_complete",
                "evaluate",
                "route",
                "iteration_complete",
                "loop_complete",
            ]
        );
    }

    #[test]
    fn cancellation_stops_the_loop() {
        let def = simple_def();
        let engine = Engine::new(&def);
        let cancel = AtomicBool::new(true);
        let final_state = engine.run(RunState::new(&def.initial), &cancel, |_, _| {});
        assert_eq!(final_state.status, RunStatus::Cancelled);
        assert_eq!(final_state.terminated_by, Some(TerminatedBy::Cancelled));
    }

    #[test]
    fn max_iterations_terminates_non_terminally() {
        let mut def = simple_def();
        // Route "start" back to itself forever so iteration cap is what stops it.
        def.states.get_mut("start").unwrap().routes = RouteTable {
            route: [("success".to_owned(), "start".to_owned())].into_iter().collect(),
            default: None,
        };
        def.max_iterations = 3;
        let engine = Engine::new(&def);
        let cancel = AtomicBool::new(false);
        let final_state = engine.run(RunState::new(&def.initial), &cancel, |_, _| {});
        assert_eq!(final_state.terminated_by, Some(TerminatedBy::MaxIterations));
        assert_eq!(final_state.iteration, 3);
    }

    #[test]
    fn unmatched_verdict_without_default_terminates_with_error() {
        let mut def = simple_def();
        def.states.get_mut("start").unwrap().action = spec("false");
        def.states.get_mut("start").unwrap().routes = RouteTable {
            route: [("success".to_owned(), "done".to_owned())].into_iter().collect(),
            default: None,
        };
        let engine = Engine::new(&def);
        let cancel = AtomicBool::new(false);
        let final_state = engine.run(RunState::new(&def.initial), &cancel, |_, _| {});
        assert_eq!(final_state.terminated_by, Some(TerminatedBy::Error));
    }

    #[test]
    fn action_timeout_yields_error_verdict() {
        let mut def = simple_def();
        def.states.get_mut("start").unwrap().action = ActionSpec {
            command: "sleep 5".to_owned(),
            action_type: None,
            timeout: Duration::from_millis(50),
        };
        def.states.get_mut("start").unwrap().routes = RouteTable {
            route: [("error".to_owned(), "escalate".to_owned())].into_iter().collect(),
            default: None,
        };
        let engine = Engine::new(&def);
        let cancel = AtomicBool::new(false);
        let final_state = engine.run(RunState::new(&def.initial), &cancel, |_, _| {});
        assert_eq!(final_state.current_state, "escalate");
    }

    #[test]
    fn resuming_from_a_later_iteration_preserves_it() {
        let def = simple_def();
        let engine = Engine::new(&def);
        let cancel = AtomicBool::new(false);
        let mut resumed = RunState::new(&def.initial);
        resumed.iteration = 7;
        resumed.status = RunStatus::Running;
        resumed.current_state = "start".to_owned();
        let final_state = engine.run(resumed, &cancel, |_, _| {});
        assert_eq!(final_state.current_state, "done");
    }
}
