//! `llp` — domain logic for the parallel issue orchestrator.
//!
//! The binary entry point lives in `crates/llp-cli`; this crate holds
//! everything that doesn't depend on `clap` or terminal I/O so it can be
//! unit- and property-tested without a CLI harness.

pub mod config;
pub mod error;
pub mod fsm;
pub mod graph;
pub mod issue;
pub mod merge;
pub mod orchestrator;
pub mod overlap;
pub mod queue;
pub mod scope_lock;
pub mod state;
pub mod telemetry;
pub mod worker;

pub use error::LlpError;
