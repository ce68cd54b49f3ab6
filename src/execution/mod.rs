//! Workflow execution engine

pub mod engine;
pub mod executor;
pub mod report;
pub mod scheduler;

pub use engine::{EventHandler, ExecutionEngine, ExecutionEvent};
pub use executor::{CellRun, ExecutionResult, StepExecutor};
pub use report::{CellReport, RunReport, StepReport};
pub use scheduler::{ExecutionScheduler, SchedulingStrategy};
