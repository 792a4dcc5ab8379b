//! Pluggable verdict evaluators. Each variant is a pure function of an
//! action's result: `Evaluate(action_result) -> verdict`, with dynamic
//! dispatch collapsed to a tagged enum rather than a trait object, since
//! every variant needs to round-trip through a loop definition file.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static VERDICT_HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^##\s*VERDICT\s*\n+(\S+)").expect("static regex"));

/// The outcome of running a state's action.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActionResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    /// Set when the action was killed for exceeding its per-action timeout.
    pub timed_out: bool,
    /// Set when the subprocess itself could not be launched, or cancellation
    /// fired mid-flight.
    pub launch_error: bool,
}

impl ActionResult {
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        matches!(self.exit_code, Some(0)) && !self.timed_out && !self.launch_error
    }
}

/// AND/OR combination mode for [`Evaluator::Composite`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMode {
    And,
    Or,
}

/// A pluggable verdict evaluator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evaluator {
    /// Zero exit code is `"success"`, anything else `"failure"`; a timed
    /// out or unlaunchable action is always `"error"`.
    ExitCode,
    /// Regex or substring match against stdout.
    OutputMatch {
        pattern: String,
        #[serde(default = "default_match_verdict")]
        on_match: String,
        #[serde(default = "default_no_match_verdict")]
        on_no_match: String,
    },
    /// Delegates to an external judge subprocess, which must print
    /// `## VERDICT\n<verdict>` where `<verdict>` is one of
    /// `declared_verdicts`. The judge receives the action's stdout, stderr,
    /// and exit code via environment variables.
    Llm {
        command: String,
        declared_verdicts: Vec<String>,
    },
    /// AND/OR of sub-evaluators. A sub-evaluator "passes" if its verdict is
    /// `"success"`.
    Composite {
        mode: CompositeMode,
        evaluators: Vec<Evaluator>,
    },
}

fn default_match_verdict() -> String {
    "success".to_owned()
}
fn default_no_match_verdict() -> String {
    "failure".to_owned()
}

impl Evaluator {
    /// Evaluate `result`, producing a verdict string.
    #[must_use]
    pub fn evaluate(&self, result: &ActionResult) -> String {
        if result.timed_out || result.launch_error {
            return "error".to_owned();
        }

        match self {
            Self::ExitCode => {
                if result.succeeded() {
                    "success".to_owned()
                } else {
                    "failure".to_owned()
                }
            }
            Self::OutputMatch {
                pattern,
                on_match,
                on_no_match,
            } => {
                let is_match = Regex::new(pattern).map(|re| re.is_match(&result.stdout)).unwrap_or(false) || result.stdout.contains(pattern.as_str());
                if is_match {
                    on_match.clone()
                } else {
                    on_no_match.clone()
                }
            }
            Self::Llm { command, declared_verdicts } => run_judge(command, result, declared_verdicts),
            Self::Composite { mode, evaluators } => {
                let verdicts: Vec<String> = evaluators.iter().map(|e| e.evaluate(result)).collect();
                let all_pass = verdicts.iter().all(|v| v == "success");
                let any_pass = verdicts.iter().any(|v| v == "success");
                let pass = match mode {
                    CompositeMode::And => all_pass,
                    CompositeMode::Or => any_pass,
                };
                if pass {
                    "success".to_owned()
                } else {
                    "failure".to_owned()
                }
            }
        }
    }
}

fn run_judge(command: &str, result: &ActionResult, declared_verdicts: &[String]) -> String {
    let output = std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("LLP_ACTION_STDOUT", &result.stdout)
        .env("LLP_ACTION_STDERR", &result.stderr)
        .env("LLP_ACTION_EXIT_CODE", result.exit_code.map_or_else(String::new, |c| c.to_string()))
        .output();

    let Ok(output) = output else {
        return "error".to_owned();
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let Some(caps) = VERDICT_HEADING_RE.captures(&stdout) else {
        return "error".to_owned();
    };
    let verdict = caps[1].to_owned();
    if declared_verdicts.iter().any(|v| v == &verdict) {
        verdict
    } else {
        "error".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_evaluator_maps_zero_to_success() {
        let result = ActionResult {
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(Evaluator::ExitCode.evaluate(&result), "success");
    }

    #[test]
    fn exit_code_evaluator_maps_nonzero_to_failure() {
        let result = ActionResult {
            exit_code: Some(1),
            ..Default::default()
        };
        assert_eq!(Evaluator::ExitCode.evaluate(&result), "failure");
    }

    #[test]
    fn timeout_always_yields_error_regardless_of_evaluator() {
        let result = ActionResult {
            exit_code: Some(0),
            timed_out: true,
            ..Default::default()
        };
        assert_eq!(Evaluator::ExitCode.evaluate(&result), "error");
    }

    #[test]
    fn output_match_uses_regex_and_custom_verdicts() {
        let evaluator = Evaluator::OutputMatch {
            pattern: r"PASS\b".to_owned(),
            on_match: "good".to_owned(),
            on_no_match: "bad".to_owned(),
        };
        let passing = ActionResult {
            exit_code: Some(0),
            stdout: "tests: PASS".to_owned(),
            ..Default::default()
        };
        let failing = ActionResult {
            exit_code: Some(0),
            stdout: "tests: FAIL".to_owned(),
            ..Default::default()
        };
        assert_eq!(evaluator.evaluate(&passing), "good");
        assert_eq!(evaluator.evaluate(&failing), "bad");
    }

    #[test]
    fn composite_and_requires_all_success() {
        let evaluator = Evaluator::Composite {
            mode: CompositeMode::And,
            evaluators: vec![Evaluator::ExitCode, Evaluator::ExitCode],
        };
        let ok = ActionResult {
            exit_code: Some(0),
            ..Default::default()
        };
        assert_eq!(evaluator.evaluate(&ok), "success");
    }

    #[test]
    fn composite_or_passes_on_any_success() {
        let evaluator = Evaluator::Composite {
            mode: CompositeMode::Or,
            evaluators: vec![
                Evaluator::OutputMatch {
                    pattern: "nope".to_owned(),
                    on_match: "success".to_owned(),
                    on_no_match: "failure".to_owned(),
                },
                Evaluator::ExitCode,
            ],
        };
        let ok = ActionResult {
            exit_code: Some(0),
            stdout: "whatever".to_owned(),
            ..Default::default()
        };
        assert_eq!(evaluator.evaluate(&ok), "success");
    }

    #[test]
    fn llm_judge_rejects_undeclared_verdicts() {
        let evaluator = Evaluator::Llm {
            command: "printf '## VERDICT\\nWEIRD\\n'".to_owned(),
            declared_verdicts: vec!["success".to_owned(), "failure".to_owned()],
        };
        let result = ActionResult::default();
        assert_eq!(evaluator.evaluate(&result), "error");
    }

    #[test]
    fn llm_judge_accepts_declared_verdict() {
        let evaluator = Evaluator::Llm {
            command: "printf '## VERDICT\\nsuccess\\n'".to_owned(),
            declared_verdicts: vec!["success".to_owned(), "failure".to_owned()],
        };
        let result = ActionResult::default();
        assert_eq!(evaluator.evaluate(&result), "success");
    }
}
