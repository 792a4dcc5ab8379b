//! `llp parallel <category>` — concurrent orchestrator run over a full
//! issue category.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use llp::config::OverlapConfig;
use llp::graph::DependencyGraph;
use llp::orchestrator::Orchestrator;
use llp::queue::PriorityQueue;
use llp::state::OrchestratorState;

use crate::commands::common::{self, Outcome};

#[derive(Args)]
pub struct ParallelArgs {
    /// Issue category to process: bugs, features, or enhancements.
    pub category: String,

    /// Override the configured worker pool size.
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Override the per-action timeout, in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Enable file-scope overlap detection.
    #[arg(long)]
    pub overlap_detection: bool,

    /// When overlap detection is enabled, warn and dispatch anyway
    /// instead of demoting the overlapping issue in the queue.
    #[arg(long)]
    pub warn_only: bool,

    /// Repository root (default: current directory).
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

pub fn run(args: ParallelArgs) -> Result<Outcome> {
    let repo = common::repo_root(args.repo.as_deref())?;
    let cfg = common::load_config(&repo)?;
    let category = common::parse_category(&args.category)?;

    let issues = common::load_category(&repo, category)?;
    let state_path = common::auto_state_path(&repo, category);
    let completed: HashSet<String> = OrchestratorState::load(&state_path).unwrap_or_default().completed_issue_ids.into_iter().collect();

    let graph = DependencyGraph::from_issues(issues, &completed);
    let mut queue = PriorityQueue::new();
    for issue in graph.issues() {
        queue.push(issue.clone());
    }

    let mut workers_cfg = cfg.workers.clone();
    if let Some(n) = args.max_workers {
        workers_cfg.max_workers = n;
    }
    if let Some(secs) = args.timeout {
        workers_cfg.action_timeout_secs = secs;
    }

    let overlap_cfg = OverlapConfig {
        enabled: args.overlap_detection || cfg.overlap.enabled,
        warn_only: args.warn_only || cfg.overlap.warn_only,
    };

    let lock = common::git_lock(&repo, &cfg.merge);
    let invoker = common::agent_invoker(&cfg.agent);
    let cancel = common::new_cancel_flag();

    let mut orchestrator = Orchestrator::new(queue, graph, lock, cfg.repo.branch.clone(), invoker, workers_cfg, overlap_cfg, state_path, cancel);
    orchestrator.run();

    if orchestrator.state().failed_issue_ids.is_empty() {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::NonTerminal)
    }
}
