//! The Worker Pool: per-issue pipelines running in isolated git worktrees.

pub mod leak;
pub mod pipeline;
pub mod pool;
pub mod types;

pub use pipeline::{AgentInvoker, Pipeline, ShellAgentInvoker};
pub use pool::{StageMap, WorkerPool};
pub use types::{AgentResponse, AgentVerdict, Correction, Stage, WorkerResult, parse_agent_response};
