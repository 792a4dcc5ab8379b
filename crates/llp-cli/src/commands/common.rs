//! Shared plumbing for subcommands: repo discovery, config loading, and
//! wiring the library's domain types (git lock, agent invoker) together.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use llp::config::{AgentConfig, LlpConfig, MergeConfig};
use llp::issue::{Issue, IssueType};
use llp::worker::{AgentInvoker, ShellAgentInvoker};
use llp_git::{GitLock, GitRepo, RetryPolicy};

/// Outcome of a subcommand, mapped to the spec's exit codes by `main`.
pub enum Outcome {
    Success,
    NonTerminal,
}

/// Resolve the repository root: the explicit `--repo`, or the current
/// directory if it looks like a git repository.
pub fn repo_root(explicit: Option<&Path>) -> Result<PathBuf> {
    let dir = match explicit {
        Some(p) => p.to_path_buf(),
        None => std::env::current_dir().context("reading current directory")?,
    };
    if !dir.join(".git").exists() {
        bail!("'{}' is not a git repository root (no .git found)", dir.display());
    }
    Ok(dir)
}

/// Load `.llp.toml` from the repository root (all-defaults if absent).
pub fn load_config(repo: &Path) -> Result<LlpConfig> {
    LlpConfig::load(&repo.join(".llp.toml")).map_err(|e| anyhow::anyhow!("{e}"))
}

pub fn parse_category(s: &str) -> Result<IssueType> {
    IssueType::from_dir_name(s).ok_or_else(|| anyhow::anyhow!("unknown issue category '{s}', expected one of: bugs, features, enhancements"))
}

/// Load every parseable issue under `.issues/` belonging to `category`.
/// Unparseable files are logged and skipped rather than failing the run.
pub fn load_category(repo: &Path, category: IssueType) -> Result<Vec<Issue>> {
    let (issues, errors) = llp::issue::load_all(&repo.join(".issues"));
    for err in &errors {
        tracing::warn!(error = %err, "skipping unparseable issue file");
    }
    Ok(issues.into_iter().filter(|i| i.issue_type == category).collect())
}

/// Apply `--only`/`--skip` id filters, `--only` first.
pub fn apply_only_skip(mut issues: Vec<Issue>, only: &[String], skip: &[String]) -> Vec<Issue> {
    if !only.is_empty() {
        issues.retain(|i| only.iter().any(|id| id == &i.id));
    }
    if !skip.is_empty() {
        issues.retain(|i| !skip.iter().any(|id| id == &i.id));
    }
    issues
}

/// Per-category orchestrator state path, so `auto bugs` and `auto
/// features` never clobber each other's progress.
pub fn auto_state_path(repo: &Path, category: IssueType) -> PathBuf {
    repo.join(format!(".auto-state-{}.json", category.dir_name()))
}

pub fn git_lock(repo: &Path, merge_cfg: &MergeConfig) -> Arc<GitLock> {
    let policy = RetryPolicy {
        max_attempts: merge_cfg.max_retries,
        base_delay: Duration::from_millis(merge_cfg.base_delay_ms),
        max_delay: Duration::from_millis(merge_cfg.max_delay_ms),
        jitter: merge_cfg.jitter,
    };
    Arc::new(GitLock::with_policy(GitRepo::new(repo), policy))
}

pub fn agent_invoker(cfg: &AgentConfig) -> Arc<dyn AgentInvoker> {
    Arc::new(ShellAgentInvoker {
        ready_command: cfg.ready_command.clone(),
        manage_command: cfg.manage_command.clone(),
    })
}

pub fn new_cancel_flag() -> Arc<AtomicBool> {
    Arc::new(AtomicBool::new(false))
}
