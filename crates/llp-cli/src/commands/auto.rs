//! `llp auto <category>` — sequential, dependency-aware issue processing.
//!
//! Runs the same [`Orchestrator`] as `parallel`, pinned to a single worker
//! and with overlap detection off: dependency order alone governs the
//! sequence in which issues are dispatched.

use std::collections::HashSet;
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;

use llp::config::{OverlapConfig, WorkersConfig};
use llp::graph::DependencyGraph;
use llp::orchestrator::Orchestrator;
use llp::queue::PriorityQueue;
use llp::state::OrchestratorState;

use crate::commands::common::{self, Outcome};

#[derive(Args)]
pub struct AutoArgs {
    /// Issue category to process: bugs, features, or enhancements.
    pub category: String,

    /// Only process these issue ids.
    #[arg(long, value_delimiter = ',')]
    pub only: Vec<String>,

    /// Skip these issue ids.
    #[arg(long, value_delimiter = ',')]
    pub skip: Vec<String>,

    /// Print the dependency-resolved processing order and exit without
    /// running anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Repository root (default: current directory).
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

pub fn run(args: AutoArgs) -> Result<Outcome> {
    let repo = common::repo_root(args.repo.as_deref())?;
    let cfg = common::load_config(&repo)?;
    let category = common::parse_category(&args.category)?;

    let issues = common::load_category(&repo, category)?;
    let issues = common::apply_only_skip(issues, &args.only, &args.skip);

    let state_path = common::auto_state_path(&repo, category);
    let completed: HashSet<String> = OrchestratorState::load(&state_path).unwrap_or_default().completed_issue_ids.into_iter().collect();

    let graph = DependencyGraph::from_issues(issues, &completed);

    if args.dry_run {
        print_plan(&graph);
        return Ok(Outcome::Success);
    }

    let mut queue = PriorityQueue::new();
    for issue in graph.issues() {
        queue.push(issue.clone());
    }

    let lock = common::git_lock(&repo, &cfg.merge);
    let invoker = common::agent_invoker(&cfg.agent);
    let cancel = common::new_cancel_flag();
    let workers = WorkersConfig {
        max_workers: 1,
        ..cfg.workers
    };

    let mut orchestrator = Orchestrator::new(
        queue,
        graph,
        lock,
        cfg.repo.branch.clone(),
        invoker,
        workers,
        OverlapConfig::default(),
        state_path,
        cancel,
    );
    orchestrator.run();

    if orchestrator.state().failed_issue_ids.is_empty() {
        Ok(Outcome::Success)
    } else {
        Ok(Outcome::NonTerminal)
    }
}

fn print_plan(graph: &DependencyGraph) {
    match graph.topological_sort() {
        Ok(order) => {
            for id in order {
                println!("{id}");
            }
        }
        Err(cycle) => {
            tracing::warn!(cycle = ?cycle.0, "dependency cycle present; printing execution waves instead of a strict order");
            for (index, wave) in graph.execution_waves().iter().enumerate() {
                println!("wave {}: {}", index + 1, wave.join(", "));
            }
        }
    }
}
