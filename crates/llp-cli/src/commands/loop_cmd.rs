//! `llp loop {run|resume|list|validate} <name>` — FSM loop runner.
//!
//! Loop definitions live at `.loops/<name>.yaml`; durable run state for
//! `<name>` lives under `.loops/.running/<name>/` (`state.json` and
//! `events.jsonl`, per [`llp::fsm::PersistentExecutor`]).

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};

use llp::fsm::{LoopDefinition, PersistentExecutor, RunState, RunStatus, TerminatedBy};
use llp::scope_lock::ScopeLockManager;

use crate::commands::common::{self, Outcome};

#[derive(Subcommand)]
pub enum LoopCommands {
    /// Start a fresh run of `name`, overwriting any prior run state.
    Run(LoopArgs),
    /// Resume `name` from its last persisted state.
    Resume(LoopArgs),
    /// List loop definitions under `.loops/`.
    List(ListArgs),
    /// Structurally validate `name`'s loop definition.
    Validate(SimpleLoopArgs),
}

#[derive(Args)]
pub struct LoopArgs {
    pub name: String,

    /// Block until the loop's scope frees up instead of failing
    /// immediately on a conflict.
    #[arg(long)]
    pub queue: bool,

    /// Suppress the final status line.
    #[arg(long)]
    pub quiet: bool,

    #[arg(long)]
    pub repo: Option<PathBuf>,
}

#[derive(Args)]
pub struct SimpleLoopArgs {
    pub name: String,

    #[arg(long)]
    pub repo: Option<PathBuf>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long)]
    pub repo: Option<PathBuf>,
}

pub fn run(cmd: LoopCommands) -> Result<Outcome> {
    match cmd {
        LoopCommands::Run(args) => run_loop(args, false),
        LoopCommands::Resume(args) => run_loop(args, true),
        LoopCommands::List(args) => list(args),
        LoopCommands::Validate(args) => validate(args),
    }
}

fn loops_dir(repo: &std::path::Path) -> PathBuf {
    repo.join(".loops")
}

fn definition_path(repo: &std::path::Path, name: &str) -> PathBuf {
    loops_dir(repo).join(format!("{name}.yaml"))
}

fn load_definition(repo: &std::path::Path, name: &str) -> Result<LoopDefinition> {
    let raw = std::fs::read_to_string(definition_path(repo, name)).with_context(|| format!("no loop named '{name}' at .loops/{name}.yaml"))?;
    let def: LoopDefinition = serde_yaml::from_str(&raw).with_context(|| format!("parsing .loops/{name}.yaml"))?;
    Ok(def)
}

fn list(args: ListArgs) -> Result<Outcome> {
    let repo = common::repo_root(args.repo.as_deref())?;
    let dir = loops_dir(&repo);
    let Ok(entries) = std::fs::read_dir(&dir) else {
        return Ok(Outcome::Success);
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("yaml") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                println!("{stem}");
            }
        }
    }
    Ok(Outcome::Success)
}

fn validate(args: SimpleLoopArgs) -> Result<Outcome> {
    let repo = common::repo_root(args.repo.as_deref())?;
    let def = load_definition(&repo, &args.name)?;
    match def.validate() {
        Ok(()) => {
            println!("'{}' is valid", args.name);
            Ok(Outcome::Success)
        }
        Err(detail) => {
            bail!("invalid loop definition '{}': {detail}", args.name);
        }
    }
}

struct ScopeGuard<'a> {
    manager: &'a ScopeLockManager,
    name: &'a str,
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        let _ = self.manager.release(self.name);
    }
}

fn run_loop(args: LoopArgs, resume: bool) -> Result<Outcome> {
    let repo = common::repo_root(args.repo.as_deref())?;
    let def = load_definition(&repo, &args.name)?;
    def.validate().map_err(|detail| anyhow::anyhow!("invalid loop definition '{}': {detail}", args.name))?;

    let running_dir = loops_dir(&repo).join(".running");
    let scope_manager = ScopeLockManager::new(running_dir.clone());

    let normalized = ScopeLockManager::normalize_scope(&def.scope);
    if let Some(conflict) = scope_manager.find_conflict(&normalized) {
        if !args.queue {
            bail!("scope conflict: loop '{}' already holds an overlapping scope", conflict.loop_name);
        }
        if !args.quiet {
            println!("waiting for scope held by '{}'...", conflict.loop_name);
        }
        if !scope_manager.wait_for_scope(&def.scope, Duration::from_secs(3600)) {
            bail!("timed out waiting for scope held by '{}'", conflict.loop_name);
        }
    }
    scope_manager.acquire(&args.name, &def.scope)?;
    let _guard = ScopeGuard {
        manager: &scope_manager,
        name: &args.name,
    };

    let executor = PersistentExecutor::new(running_dir.join(&args.name));
    let state = if resume {
        executor.load()?.ok_or_else(|| anyhow::anyhow!("no persisted run to resume for '{}'", args.name))?
    } else {
        RunState::new(&def.initial)
    };

    let cancel = AtomicBool::new(false);
    let final_state = executor.run(&def, state, &cancel)?;

    if !args.quiet {
        println!(
            "'{}' finished at state '{}' after {} iteration(s): {:?} ({:?})",
            args.name, final_state.current_state, final_state.iteration, final_state.status, final_state.terminated_by
        );
    }

    match (final_state.status, final_state.terminated_by) {
        (RunStatus::Completed, Some(TerminatedBy::Terminal)) => Ok(Outcome::Success),
        _ => Ok(Outcome::NonTerminal),
    }
}
