//! weft runtime
//!
//! Executes a validated [`ExecutionPlan`](weft_plan::ExecutionPlan): a
//! single coordinator task per run owns the step state machine, dispatches
//! ready steps to their tools up to the plan's parallelism bound, moves
//! produced values into the context store, publishes progress events and
//! assembles the final [`ExecutionReport`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod engine;
pub mod executor;
pub mod report;
pub mod scheduler;

pub use config::{EngineConfig, DEFAULT_CANCEL_GRACE_MS};
pub use engine::{Engine, EngineError, RunHandle};
pub use executor::{StepChannels, StepExecutor, StepOutcome, TICK_BUFFER};
pub use report::{ExecutionReport, RunMetrics, StepReport, StepResult};
pub use scheduler::{ExecutionState, ScheduleDecision, ScheduleError, Scheduler};
