//! `llp sprint {create|show|run} <name>` — wave-based execution over a
//! named, fixed issue set.
//!
//! A sprint definition is a small JSON file under `.sprints/<name>.json`
//! naming the issue ids it covers; `run_sprint` (the library's wave
//! scheduler) does the rest.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde::{Deserialize, Serialize};

use llp::graph::DependencyGraph;
use llp::orchestrator::{run_sprint, Orchestrator};
use llp::queue::PriorityQueue;

use crate::commands::common::{self, Outcome};

#[derive(Subcommand)]
pub enum SprintCommands {
    /// Define a sprint from a set of issue ids.
    Create(SprintCreateArgs),
    /// Show the wave plan for a previously defined sprint.
    Show(SprintNameArgs),
    /// Run a previously defined sprint, wave by wave.
    Run(SprintNameArgs),
}

#[derive(Args)]
pub struct SprintCreateArgs {
    pub name: String,

    /// Issue ids this sprint covers.
    #[arg(long, value_delimiter = ',', required = true)]
    pub ids: Vec<String>,

    #[arg(long)]
    pub repo: Option<PathBuf>,
}

#[derive(Args)]
pub struct SprintNameArgs {
    pub name: String,

    #[arg(long)]
    pub repo: Option<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct SprintDefinition {
    name: String,
    issue_ids: Vec<String>,
}

fn sprints_dir(repo: &std::path::Path) -> PathBuf {
    repo.join(".sprints")
}

fn sprint_path(repo: &std::path::Path, name: &str) -> PathBuf {
    sprints_dir(repo).join(format!("{name}.json"))
}

pub fn run(cmd: SprintCommands) -> Result<Outcome> {
    match cmd {
        SprintCommands::Create(args) => create(args),
        SprintCommands::Show(args) => show(args),
        SprintCommands::Run(args) => run_sprint_cmd(args),
    }
}

fn create(args: SprintCreateArgs) -> Result<Outcome> {
    let repo = common::repo_root(args.repo.as_deref())?;
    std::fs::create_dir_all(sprints_dir(&repo))?;
    let def = SprintDefinition {
        name: args.name.clone(),
        issue_ids: args.ids,
    };
    let body = serde_json::to_vec_pretty(&def).context("serializing sprint definition")?;
    std::fs::write(sprint_path(&repo, &args.name), body)?;
    println!("created sprint '{}' with {} issue(s)", def.name, def.issue_ids.len());
    Ok(Outcome::Success)
}

fn load_def(repo: &std::path::Path, name: &str) -> Result<SprintDefinition> {
    let raw = std::fs::read_to_string(sprint_path(repo, name)).with_context(|| format!("no sprint named '{name}' (run `llp sprint create` first)"))?;
    Ok(serde_json::from_str(&raw)?)
}

fn graph_for(repo: &std::path::Path, def: &SprintDefinition) -> Result<DependencyGraph> {
    let (all_issues, errors) = llp::issue::load_all(&repo.join(".issues"));
    for err in &errors {
        tracing::warn!(error = %err, "skipping unparseable issue file");
    }
    let wanted: HashSet<&String> = def.issue_ids.iter().collect();
    let issues: Vec<_> = all_issues.into_iter().filter(|i| wanted.contains(&i.id)).collect();
    if issues.len() != def.issue_ids.len() {
        bail!("sprint '{}' references issue ids not found under .issues/", def.name);
    }
    Ok(DependencyGraph::from_issues(issues, &HashSet::new()))
}

fn show(args: SprintNameArgs) -> Result<Outcome> {
    let repo = common::repo_root(args.repo.as_deref())?;
    let def = load_def(&repo, &args.name)?;
    let graph = graph_for(&repo, &def)?;
    for (index, wave) in graph.execution_waves().iter().enumerate() {
        println!("wave {}: {}", index + 1, wave.join(", "));
    }
    Ok(Outcome::Success)
}

fn run_sprint_cmd(args: SprintNameArgs) -> Result<Outcome> {
    let repo = common::repo_root(args.repo.as_deref())?;
    let cfg = common::load_config(&repo)?;
    let def = load_def(&repo, &args.name)?;
    let graph = graph_for(&repo, &def)?;

    let lock = common::git_lock(&repo, &cfg.merge);
    let invoker = common::agent_invoker(&cfg.agent);
    let mainline = cfg.repo.branch.clone();
    let workers_cfg = cfg.workers.clone();
    let overlap_cfg = cfg.overlap;
    let state_path = repo.join(format!(".auto-state-sprint-{}.json", def.name));

    let result = run_sprint(&def.name, &graph, |queue: PriorityQueue, wave_graph: DependencyGraph, _label: String| {
        Orchestrator::new(
            queue,
            wave_graph,
            Arc::clone(&lock),
            mainline.clone(),
            Arc::clone(&invoker),
            workers_cfg.clone(),
            overlap_cfg,
            state_path.clone(),
            common::new_cancel_flag(),
        )
    });

    println!("ran {} of {} wave(s)", result.waves_run, result.waves_total);
    if let Some(stalled) = result.stalled_at_wave {
        println!("stalled at wave {stalled}: not all issues in that wave completed");
        return Ok(Outcome::NonTerminal);
    }
    Ok(Outcome::Success)
}
