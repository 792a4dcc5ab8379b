//! Compiles the four loop paradigms down to a single [`LoopDefinition`]
//! state table. The engine itself is paradigm-agnostic — paradigm identity
//! doesn't exist at runtime, only the compiled states and routes do.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::fsm::evaluator::Evaluator;
use crate::fsm::types::{ActionSpec, LoopDefinition, RouteTable, State};

fn action(command: impl Into<String>, timeout: Duration) -> ActionSpec {
    ActionSpec {
        command: command.into(),
        action_type: None,
        timeout,
    }
}

fn routes(pairs: &[(&str, &str)], default: Option<&str>) -> RouteTable {
    RouteTable {
        route: pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect(),
        default: default.map(str::to_owned),
    }
}

fn terminal_state() -> State {
    State {
        action: action("true", Duration::from_secs(1)),
        evaluator: Evaluator::ExitCode,
        routes: RouteTable::default(),
        terminal: true,
    }
}

/// A single check with fix/escalate routing: check fails → fix → re-check;
/// fix fails or exhausts → escalate.
pub struct GoalParadigm {
    pub name: String,
    pub scope: Vec<PathBuf>,
    pub max_iterations: u32,
    pub check: ActionSpec,
    pub check_evaluator: Evaluator,
    pub fix: ActionSpec,
}

impl GoalParadigm {
    #[must_use]
    pub fn compile(self) -> LoopDefinition {
        let mut states = HashMap::new();
        states.insert(
            "check".to_owned(),
            State {
                action: self.check,
                evaluator: self.check_evaluator,
                routes: routes(&[("success", "done"), ("failure", "fix")], Some("escalate")),
                terminal: false,
            },
        );
        states.insert(
            "fix".to_owned(),
            State {
                action: self.fix,
                evaluator: Evaluator::ExitCode,
                routes: routes(&[("success", "check"), ("failure", "escalate")], Some("escalate")),
                terminal: false,
            },
        );
        states.insert("done".to_owned(), terminal_state());
        states.insert("escalate".to_owned(), terminal_state());

        LoopDefinition {
            name: self.name,
            initial: "check".to_owned(),
            states,
            scope: self.scope,
            max_iterations: self.max_iterations,
        }
    }
}

/// A per-constraint check/fix chain: each constraint must pass before the
/// next is attempted; a failing constraint is fixed and re-checked in
/// place.
pub struct Constraint {
    pub name: String,
    pub check: ActionSpec,
    pub check_evaluator: Evaluator,
    pub fix: ActionSpec,
}

pub struct InvariantsParadigm {
    pub name: String,
    pub scope: Vec<PathBuf>,
    pub max_iterations: u32,
    pub constraints: Vec<Constraint>,
}

impl InvariantsParadigm {
    #[must_use]
    pub fn compile(self) -> LoopDefinition {
        let mut states = HashMap::new();
        let n = self.constraints.len();

        for (i, constraint) in self.constraints.into_iter().enumerate() {
            let check_name = format!("check_{i}");
            let fix_name = format!("fix_{i}");
            let next_check = if i + 1 < n { format!("check_{}", i + 1) } else { "done".to_owned() };

            states.insert(
                check_name.clone(),
                State {
                    action: constraint.check,
                    evaluator: constraint.check_evaluator,
                    routes: routes(&[("success", &next_check), ("failure", &fix_name)], Some("escalate")),
                    terminal: false,
                },
            );
            states.insert(
                fix_name,
                State {
                    action: constraint.fix,
                    evaluator: Evaluator::ExitCode,
                    routes: routes(&[("success", &check_name), ("failure", "escalate")], Some("escalate")),
                    terminal: false,
                },
            );
        }

        states.insert("done".to_owned(), terminal_state());
        states.insert("escalate".to_owned(), terminal_state());

        LoopDefinition {
            name: self.name,
            initial: if n == 0 { "done".to_owned() } else { "check_0".to_owned() },
            states,
            scope: self.scope,
            max_iterations: self.max_iterations,
        }
    }
}

/// A metric-improvement loop: measure, then step if not yet converged.
pub struct ConvergenceParadigm {
    pub name: String,
    pub scope: Vec<PathBuf>,
    pub max_iterations: u32,
    pub measure: ActionSpec,
    pub measure_evaluator: Evaluator,
    pub step: ActionSpec,
}

impl ConvergenceParadigm {
    #[must_use]
    pub fn compile(self) -> LoopDefinition {
        let mut states = HashMap::new();
        states.insert(
            "measure".to_owned(),
            State {
                action: self.measure,
                evaluator: self.measure_evaluator,
                routes: routes(&[("converged", "done"), ("improved", "step"), ("regressed", "step")], Some("step")),
                terminal: false,
            },
        );
        states.insert(
            "step".to_owned(),
            State {
                action: self.step,
                evaluator: Evaluator::ExitCode,
                routes: routes(&[("success", "measure"), ("failure", "escalate")], Some("escalate")),
                terminal: false,
            },
        );
        states.insert("done".to_owned(), terminal_state());
        states.insert("escalate".to_owned(), terminal_state());

        LoopDefinition {
            name: self.name,
            initial: "measure".to_owned(),
            states,
            scope: self.scope,
            max_iterations: self.max_iterations,
        }
    }
}

/// Ordered steps, repeated as a block until the `until` check passes.
pub struct ImperativeParadigm {
    pub name: String,
    pub scope: Vec<PathBuf>,
    pub max_iterations: u32,
    pub steps: Vec<ActionSpec>,
    pub until: ActionSpec,
    pub until_evaluator: Evaluator,
}

impl ImperativeParadigm {
    #[must_use]
    pub fn compile(self) -> LoopDefinition {
        let mut states = HashMap::new();
        let n = self.steps.len();

        for (i, step) in self.steps.into_iter().enumerate() {
            let name = format!("step_{i}");
            let next = if i + 1 < n { format!("step_{}", i + 1) } else { "until_check".to_owned() };
            states.insert(
                name,
                State {
                    action: step,
                    evaluator: Evaluator::ExitCode,
                    routes: routes(&[("success", &next), ("failure", "escalate")], Some("escalate")),
                    terminal: false,
                },
            );
        }

        states.insert(
            "until_check".to_owned(),
            State {
                action: self.until,
                evaluator: self.until_evaluator,
                routes: routes(&[("success", "done")], Some(if n == 0 { "done" } else { "step_0" })),
                terminal: false,
            },
        );
        states.insert("done".to_owned(), terminal_state());
        states.insert("escalate".to_owned(), terminal_state());

        LoopDefinition {
            name: self.name,
            initial: if n == 0 { "until_check".to_owned() } else { "step_0".to_owned() },
            states,
            scope: self.scope,
            max_iterations: self.max_iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn goal_paradigm_compiles_four_states() {
        let def = GoalParadigm {
            name: "fix-lint".to_owned(),
            scope: vec![],
            max_iterations: 5,
            check: action("cargo clippy", Duration::from_secs(60)),
            check_evaluator: Evaluator::ExitCode,
            fix: action("cargo clippy --fix", Duration::from_secs(60)),
        }
        .compile();
        assert_eq!(def.initial, "check");
        assert_eq!(def.states.len(), 4);
        assert!(def.states["done"].terminal);
        assert!(def.states["escalate"].terminal);
    }

    #[test]
    fn invariants_paradigm_chains_constraints_in_order() {
        let def = InvariantsParadigm {
            name: "invariants".to_owned(),
            scope: vec![],
            max_iterations: 10,
            constraints: vec![
                Constraint {
                    name: "no-unwraps".to_owned(),
                    check: action("grep -rL unwrap src", Duration::from_secs(10)),
                    check_evaluator: Evaluator::ExitCode,
                    fix: action("true", Duration::from_secs(10)),
                },
                Constraint {
                    name: "no-todo".to_owned(),
                    check: action("grep -rL TODO src", Duration::from_secs(10)),
                    check_evaluator: Evaluator::ExitCode,
                    fix: action("true", Duration::from_secs(10)),
                },
            ],
        }
        .compile();
        assert_eq!(def.initial, "check_0");
        assert_eq!(def.states["check_0"].routes.resolve("success"), Some("check_1"));
        assert_eq!(def.states["check_1"].routes.resolve("success"), Some("done"));
    }

    #[test]
    fn convergence_paradigm_routes_improved_and_regressed_to_step() {
        let def = ConvergenceParadigm {
            name: "perf".to_owned(),
            scope: vec![],
            max_iterations: 20,
            measure: action("bench", Duration::from_secs(30)),
            measure_evaluator: Evaluator::OutputMatch {
                pattern: "converged".to_owned(),
                on_match: "converged".to_owned(),
                on_no_match: "improved".to_owned(),
            },
            step: action("optimize", Duration::from_secs(30)),
        }
        .compile();
        assert_eq!(def.states["measure"].routes.resolve("improved"), Some("step"));
        assert_eq!(def.states["measure"].routes.resolve("converged"), Some("done"));
    }

    #[test]
    fn imperative_paradigm_loops_back_to_first_step_until_done() {
        let def = ImperativeParadigm {
            name: "migrate".to_owned(),
            scope: vec![],
            max_iterations: 5,
            steps: vec![action("step-a", Duration::from_secs(10)), action("step-b", Duration::from_secs(10))],
            until: action("check-done", Duration::from_secs(10)),
            until_evaluator: Evaluator::ExitCode,
        }
        .compile();
        assert_eq!(def.initial, "step_0");
        assert_eq!(def.states["step_0"].routes.resolve("success"), Some("step_1"));
        assert_eq!(def.states["step_1"].routes.resolve("success"), Some("until_check"));
        assert_eq!(def.states["until_check"].routes.resolve("failure"), Some("step_0"));
    }
}
