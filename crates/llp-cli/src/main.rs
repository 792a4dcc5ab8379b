use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

use commands::common::Outcome;
use commands::{auto, loop_cmd, parallel, sprint};

/// Parallel issue orchestrator
///
/// llp schedules `.issues/{bugs,features,enhancements}/` files onto
/// worktree-isolated worker agents, integrates finished branches through a
/// single-writer Merge Coordinator, and runs named FSM loops (goal,
/// invariants, convergence, imperative) with crash-safe persistence.
///
/// QUICK START:
///
///   llp auto features           # sequential, dependency-ordered
///   llp parallel bugs --max-workers 4
///   llp sprint create release-1 --ids FEAT-1,FEAT-2,BUG-9
///   llp sprint run release-1
///   llp loop run refactor-x
#[derive(Parser)]
#[command(name = "llp")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'llp <command> --help' for more information on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Process a category sequentially, in dependency order
    ///
    /// Runs the same orchestrator as `parallel`, pinned to a single
    /// worker and with overlap detection off, so dependency order alone
    /// governs the sequence.
    Auto(auto::AutoArgs),

    /// Process a category with a concurrent worker pool
    Parallel(parallel::ParallelArgs),

    /// Manage and run wave-based sprints over a fixed issue set
    #[command(subcommand)]
    Sprint(sprint::SprintCommands),

    /// Run, resume, list, or validate named FSM loops
    #[command(subcommand)]
    Loop(loop_cmd::LoopCommands),
}

fn main() -> std::process::ExitCode {
    let _telemetry = llp::telemetry::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Auto(args) => auto::run(args),
        Commands::Parallel(args) => parallel::run(args),
        Commands::Sprint(cmd) => sprint::run(cmd),
        Commands::Loop(cmd) => loop_cmd::run(cmd),
    };

    exit_code(result)
}

/// Map a subcommand's result to the documented exit codes: 0 success, 1
/// non-terminal FSM/orchestrator exit (max iterations, cancelled, or any
/// issues left failed), 2 fatal error (invalid config, unrecoverable git
/// state, or any other error bubbled up via `anyhow`).
fn exit_code(result: Result<Outcome>) -> std::process::ExitCode {
    match result {
        Ok(Outcome::Success) => std::process::ExitCode::SUCCESS,
        Ok(Outcome::NonTerminal) => std::process::ExitCode::from(1),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::ExitCode::from(2)
        }
    }
}
