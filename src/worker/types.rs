//! Worker pipeline data model: stages, parsed agent responses, and the
//! result handed off to the Merge Coordinator.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static VERDICT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^##\s*VERDICT\s*\n+(\S+)").expect("static regex"));
static VALIDATED_FILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^##\s*VALIDATED_FILE\s*\n+(\S.*)$").expect("static regex"));
static CORRECTIONS_SECTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?ms)^##\s*CORRECTIONS_MADE\s*\n(.*?)(?:\n##\s|\z)").expect("static regex"));
static CORRECTION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([\w_]+)\]\s*(.+)").expect("static regex"));

/// Where a worker currently is in its pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Stage {
    Setup,
    Validating,
    Implementing,
    Verifying,
    Merging,
    Completed,
    Failed,
    Interrupted,
}

impl Stage {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }
}

/// A `[category] text` correction note reported by the ready agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Correction {
    pub category: String,
    pub text: String,
}

/// Verdict reported by the ready/manage agents' structured stdout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentVerdict {
    Ready,
    NotReady,
    Completed,
    Failed,
    /// Anything that didn't match a declared verdict, or missing entirely.
    Unrecognized,
}

impl AgentVerdict {
    fn parse(raw: &str) -> Self {
        match raw {
            "READY" => Self::Ready,
            "NOT_READY" => Self::NotReady,
            "COMPLETED" => Self::Completed,
            "FAILED" => Self::Failed,
            _ => Self::Unrecognized,
        }
    }
}

/// Parsed structured response from an agent invocation's stdout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentResponse {
    pub verdict: AgentVerdict,
    pub validated_file: Option<PathBuf>,
    pub corrections: Vec<Correction>,
}

/// Parse an agent's stdout per the `## VERDICT` / `## VALIDATED_FILE` /
/// `## CORRECTIONS_MADE` convention. Missing sections yield empty/unrecognized
/// defaults rather than an error — agents are opaque and their output is
/// best-effort structured text.
#[must_use]
pub fn parse_agent_response(stdout: &str) -> AgentResponse {
    let verdict = VERDICT_RE
        .captures(stdout)
        .map_or(AgentVerdict::Unrecognized, |caps| AgentVerdict::parse(&caps[1]));

    let validated_file = VALIDATED_FILE_RE.captures(stdout).map(|caps| PathBuf::from(caps[1].trim()));

    let corrections = CORRECTIONS_SECTION_RE
        .captures(stdout)
        .map(|caps| {
            caps[1]
                .lines()
                .filter_map(|line| {
                    let trimmed = line.trim_start_matches(['-', '*', ' ']);
                    CORRECTION_LINE_RE.captures(trimmed).map(|c| Correction {
                        category: c[1].to_owned(),
                        text: c[2].trim().to_owned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    AgentResponse {
        verdict,
        validated_file,
        corrections,
    }
}

/// The outcome of one worker's full pipeline run, handed to the Merge
/// Coordinator on success or recorded directly as failed/interrupted.
#[derive(Clone, Debug)]
pub struct WorkerResult {
    pub issue_id: String,
    pub branch_name: String,
    pub worktree_path: PathBuf,
    pub success: bool,
    pub interrupted: bool,
    pub changed_files: Vec<PathBuf>,
    pub stderr_digest: String,
    pub stage_at_exit: Stage,
    pub corrections: Vec<Correction>,
    pub timing: Duration,
}
