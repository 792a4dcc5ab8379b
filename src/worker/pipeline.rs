//! Per-issue worker pipeline: SETUP → VALIDATING → IMPLEMENTING → VERIFYING
//! → MERGING(handoff), run inside an isolated worktree.
//!
//! Grounded on the teacher's `workspace::create` (worktree provisioning) and
//! `workspace::sync` (bringing a workspace up to date before handing it
//! off), reshaped around one branch per issue instead of one workspace per
//! named agent session.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use llp_git::{merge_ops, worktree, GitLock};

use crate::fsm::evaluator::ActionResult;
use crate::issue::Issue;
use crate::worker::leak::{detect_leaks, remove_leaks};
use crate::worker::types::{parse_agent_response, AgentVerdict, Correction, Stage, WorkerResult};

/// Invokes the opaque "ready" and "manage" agents. Implementations shell out
/// to an external subprocess; tests substitute a canned-response fake.
pub trait AgentInvoker: Send + Sync {
    /// Validate `issue_id` (or, on fallback retry, an explicit relative
    /// path) against `worktree`.
    fn validate(&self, target: &str, worktree: &Path, timeout: Duration) -> ActionResult;

    /// Perform `action` (`"fix"` / `"implement"` / `"improve"`) against
    /// `target` inside `worktree`. `continuation_of` carries a prior partial
    /// transcript token when resuming after context exhaustion.
    fn manage(&self, target: &str, action: &str, worktree: &Path, continuation_of: Option<&str>, timeout: Duration) -> ActionResult;
}

/// Shells out to configurable command templates, substituting the target,
/// action, and worktree path via environment variables — the same
/// subprocess-plus-env-var protocol as the FSM engine's `llm` evaluator.
pub struct ShellAgentInvoker {
    pub ready_command: String,
    pub manage_command: String,
}

impl AgentInvoker for ShellAgentInvoker {
    fn validate(&self, target: &str, worktree: &Path, timeout: Duration) -> ActionResult {
        run_agent_command(&self.ready_command, worktree, timeout, &[("LLP_ISSUE_TARGET", target)])
    }

    fn manage(&self, target: &str, action: &str, worktree: &Path, continuation_of: Option<&str>, timeout: Duration) -> ActionResult {
        let mut env = vec![("LLP_ISSUE_TARGET", target), ("LLP_ACTION", action)];
        if let Some(token) = continuation_of {
            env.push(("LLP_CONTINUATION_OF", token));
        }
        run_agent_command(&self.manage_command, worktree, timeout, &env)
    }
}

fn run_agent_command(command: &str, worktree: &Path, timeout: Duration, env: &[(&str, &str)]) -> ActionResult {
    let mut cmd = std::process::Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(worktree)
        .env("CLAUDE_BASH_MAINTAIN_PROJECT_WORKING_DIR", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in env {
        cmd.env(key, value);
    }
    run_with_timeout(cmd, timeout, &AtomicBool::new(false))
}

/// Spawn `cmd` and poll for completion, killing it on timeout or
/// cancellation. Mirrors the FSM engine's action runner: a 20ms poll loop
/// rather than an async runtime.
fn run_with_timeout(mut cmd: std::process::Command, timeout: Duration, cancel: &AtomicBool) -> ActionResult {
    let mut child = match cmd.spawn() {
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
        if start.elapsed() >= timeout {
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

/// Runs a single issue through the full pipeline.
pub struct Pipeline<'a> {
    pub lock: &'a GitLock,
    pub mainline_branch: &'a str,
    pub issue: &'a Issue,
    pub invoker: &'a dyn AgentInvoker,
    pub action_timeout: Duration,
    pub max_continuations: u32,
    pub cancel: &'a AtomicBool,
    pub on_stage: &'a (dyn Fn(Stage) + Sync),
}

impl Pipeline<'_> {
    /// Run the pipeline to completion (or interruption), returning a
    /// [`WorkerResult`] for the Merge Coordinator.
    pub fn run(&self) -> WorkerResult {
        let start = Instant::now();
        let unix_ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();

        (self.on_stage)(Stage::Setup);
        let setup = self.setup(unix_ts);
        let worktree_info = match setup {
            Ok(info) => info,
            Err(detail) => {
                return self.failed_result(String::new(), String::new(), Stage::Failed, detail, start.elapsed());
            }
        };

        let baseline = worktree::status_paths(self.lock, self.lock.repo().root()).unwrap_or_default();
        self.check_leaks(&baseline);

        if self.cancel.load(Ordering::SeqCst) {
            return self.interrupted_result(&worktree_info, Stage::Setup, start.elapsed());
        }

        (self.on_stage)(Stage::Validating);
        let validated = self.validate();
        self.check_leaks(&baseline);
        let (target, corrections) = match validated {
            ValidateOutcome::Ready { target, corrections } => (target, corrections),
            ValidateOutcome::NotReady => {
                return self.failed_result(
                    worktree_info.branch.clone(),
                    worktree_info.path.display().to_string(),
                    Stage::Failed,
                    "ready agent reported NOT_READY".to_owned(),
                    start.elapsed(),
                );
            }
            ValidateOutcome::Error(detail) => {
                return self.failed_result(worktree_info.branch.clone(), worktree_info.path.display().to_string(), Stage::Failed, detail, start.elapsed());
            }
        };

        if self.cancel.load(Ordering::SeqCst) {
            return self.interrupted_result(&worktree_info, Stage::Validating, start.elapsed());
        }

        (self.on_stage)(Stage::Implementing);
        let implemented = self.implement(&target, &worktree_info.path);
        self.check_leaks(&baseline);
        if let Err(detail) = implemented {
            return self.failed_result(worktree_info.branch.clone(), worktree_info.path.display().to_string(), Stage::Failed, detail, start.elapsed());
        }

        if self.cancel.load(Ordering::SeqCst) {
            return self.interrupted_result(&worktree_info, Stage::Implementing, start.elapsed());
        }

        (self.on_stage)(Stage::Verifying);
        let verified = self.verify(&worktree_info.path);
        self.check_leaks(&baseline);
        let changed_files = match verified {
            Ok(files) => files,
            Err(detail) => {
                return self.failed_result(worktree_info.branch.clone(), worktree_info.path.display().to_string(), Stage::Failed, detail, start.elapsed());
            }
        };

        (self.on_stage)(Stage::Merging);
        WorkerResult {
            issue_id: self.issue.id.clone(),
            branch_name: worktree_info.branch,
            worktree_path: worktree_info.path,
            success: true,
            interrupted: false,
            changed_files,
            stderr_digest: String::new(),
            stage_at_exit: Stage::Merging,
            corrections,
            timing: start.elapsed(),
        }
    }

    /// Compare current main-repo `git status` against `baseline` and remove
    /// any path attributed to this worker. Called after every stage,
    /// success or failure, per spec §4.8's leak-detection contract.
    fn check_leaks(&self, baseline: &[PathBuf]) {
        let current = worktree::status_paths(self.lock, self.lock.repo().root()).unwrap_or_default();
        let leaks = detect_leaks(baseline, &current, &self.issue.id);
        if !leaks.is_empty() {
            warn!(issue_id = %self.issue.id, count = leaks.len(), "cleaning up leaked paths attributed to this worker");
            remove_leaks(self.lock, self.lock.repo().root(), &leaks);
        }
    }

    fn setup(&self, unix_ts: u64) -> Result<worktree::WorktreeInfo, String> {
        let info = worktree::create(self.lock, &self.issue.id, self.mainline_branch, unix_ts).map_err(|e| e.to_string())?;
        copy_claude_dir(self.lock.repo().root(), &info.path);
        Ok(info)
    }

    fn validate(&self) -> ValidateOutcome {
        let result = self.invoker.validate(&self.issue.id, &self.issue.path, self.action_timeout);
        if !result.succeeded() && result.timed_out {
            return ValidateOutcome::Error("ready agent timed out".to_owned());
        }
        let response = parse_agent_response(&result.stdout);

        match response.verdict {
            AgentVerdict::Ready => {
                let corrections = response.corrections;
                let target = response
                    .validated_file
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| self.issue.id.clone());
                ValidateOutcome::Ready { target, corrections }
            }
            AgentVerdict::NotReady => ValidateOutcome::NotReady,
            AgentVerdict::Completed | AgentVerdict::Failed | AgentVerdict::Unrecognized => {
                // A mismatched validation target: retry once with the
                // explicit relative path instead of the abstract id.
                let fallback_path = self.issue.path.display().to_string();
                let retry = self.invoker.validate(&fallback_path, &self.issue.path, self.action_timeout);
                let retry_response = parse_agent_response(&retry.stdout);
                if retry_response.verdict == AgentVerdict::Ready {
                    info!(issue_id = %self.issue.id, "ready agent validated via fallback path");
                    ValidateOutcome::Ready {
                        target: fallback_path,
                        corrections: retry_response.corrections,
                    }
                } else {
                    ValidateOutcome::NotReady
                }
            }
        }
    }

    fn implement(&self, target: &str, worktree_path: &Path) -> Result<(), String> {
        let mut continuation_of: Option<String> = None;
        for attempt in 0..=self.max_continuations {
            let result = self.invoker.manage(target, "implement", worktree_path, continuation_of.as_deref(), self.action_timeout);
            if result.succeeded() {
                return Ok(());
            }
            if is_context_exhausted(&result.stdout) && attempt < self.max_continuations {
                continuation_of = Some(format!("{}-{attempt}", self.issue.id));
                continue;
            }
            return Err(format!("manage agent failed: {}", result.stderr.lines().next().unwrap_or("unknown error")));
        }
        Err("manage agent exhausted continuation budget".to_owned())
    }

    fn verify(&self, worktree_path: &Path) -> Result<Vec<PathBuf>, String> {
        let changed = worktree::status_paths(self.lock, worktree_path).map_err(|e| e.to_string())?;
        if changed.is_empty() {
            return Err("no changes produced".to_owned());
        }
        match merge_ops::sync_rebase(self.lock, worktree_path, self.mainline_branch) {
            Ok(_) => {}
            Err(llp_git::GitError::RebaseConflict { sha, .. }) => {
                warn!(issue_id = %self.issue.id, sha, "rebase conflict during verify; leaving for merge coordinator");
            }
            Err(e) => return Err(e.to_string()),
        }
        Ok(changed)
    }

    fn failed_result(&self, branch_name: String, worktree_path: String, stage: Stage, detail: String, timing: Duration) -> WorkerResult {
        WorkerResult {
            issue_id: self.issue.id.clone(),
            branch_name,
            worktree_path: PathBuf::from(worktree_path),
            success: false,
            interrupted: false,
            changed_files: Vec::new(),
            stderr_digest: detail,
            stage_at_exit: stage,
            corrections: Vec::new(),
            timing,
        }
    }

    fn interrupted_result(&self, info: &worktree::WorktreeInfo, stage: Stage, timing: Duration) -> WorkerResult {
        WorkerResult {
            issue_id: self.issue.id.clone(),
            branch_name: info.branch.clone(),
            worktree_path: info.path.clone(),
            success: false,
            interrupted: true,
            changed_files: Vec::new(),
            stderr_digest: "cancelled".to_owned(),
            stage_at_exit: stage,
            corrections: Vec::new(),
            timing,
        }
    }
}

enum ValidateOutcome {
    Ready { target: String, corrections: Vec<Correction> },
    NotReady,
    Error(String),
}

fn is_context_exhausted(stdout: &str) -> bool {
    let lower = stdout.to_lowercase();
    lower.contains("context_exhausted") || lower.contains("context window") || lower.contains("maximum context")
}

fn copy_claude_dir(repo_root: &Path, worktree_path: &Path) {
    let source = repo_root.join(".claude");
    if !source.is_dir() {
        return;
    }
    let dest = worktree_path.join(".claude");
    if let Err(e) = copy_dir_recursive(&source, &dest) {
        warn!(error = %e, "failed to copy .claude directory into worktree");
    }
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &dest_path)?;
        } else {
            std::fs::copy(entry.path(), &dest_path)?;
        }
    }
    Ok(())
}
