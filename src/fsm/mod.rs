//! The FSM engine: loop paradigms compiled to a uniform state table, driven
//! by a paradigm-agnostic step loop, persisted crash-safely.

pub mod engine;
pub mod evaluator;
pub mod paradigm;
pub mod persistent;
pub mod types;

pub use engine::Engine;
pub use evaluator::{ActionResult, CompositeMode, Evaluator};
pub use paradigm::{Constraint, ConvergenceParadigm, GoalParadigm, ImperativeParadigm, InvariantsParadigm};
pub use persistent::PersistentExecutor;
pub use types::{ActionSpec, ActionType, Event, LoopDefinition, RouteTable, RunState, RunStatus, State, TerminatedBy};
