//! greynir-ci - run GitHub-style CI workflows locally

pub mod cli;
pub mod core;
pub mod execution;
pub mod notify;
pub mod persistence;
pub mod runner;

// Re-export commonly used types
pub use core::config::WorkflowConfig;
pub use core::{Event, EventKind, ExecutionStatus, JobStatus, SecretStore, StepState, Workflow};
pub use execution::{ExecutionEngine, ExecutionEvent, RunReport, SchedulingStrategy};
pub use notify::{Notifier, WebhookNotifier};
pub use runner::{CommandRunner, RunnerConfig, ShellRunner};
