//! Core domain models for workflows
//!
//! This module defines the workflow definition (triggers, jobs, matrix,
//! steps), the expression language used in `${{ }}` and `if:`, and the
//! run state shared by the execution engine.

pub mod condition;
pub mod config;
pub mod context;
pub mod expression;
pub mod job;
pub mod matrix;
pub mod state;
pub mod step;
pub mod trigger;
pub mod workflow;

pub use condition::Condition;
pub use context::*;
pub use job::Job;
pub use matrix::{Matrix, MatrixCell};
pub use state::*;
pub use step::*;
pub use trigger::{Event, EventKind, Trigger};
pub use workflow::Workflow;
