//! CLI command definitions

use crate::core::{Event, EventKind};
use crate::execution::SchedulingStrategy;
use clap::Args;
use std::path::PathBuf;

/// Run a workflow
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Event to simulate (push, pull_request, workflow_dispatch, ...)
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Ref the event points at; for pull_request, the base branch
    #[arg(long = "ref", default_value = "refs/heads/main")]
    pub git_ref: String,

    /// Run only this job and the jobs it needs
    #[arg(long)]
    pub job: Option<String>,

    /// Cell scheduling: sequential, parallel, or a number
    #[arg(long, default_value = "parallel")]
    pub strategy: SchedulingStrategy,

    /// Secret values (KEY=VALUE); unset secrets fall back to the environment
    #[arg(long, value_parser = parse_key_value)]
    pub secret: Vec<(String, String)>,

    /// Workflow env overrides (KEY=VALUE)
    #[arg(long, value_parser = parse_key_value)]
    pub env: Vec<(String, String)>,

    /// Extra runner labels this host provides
    #[arg(long)]
    pub label: Vec<String>,

    /// Directory steps run in (defaults to the current directory)
    #[arg(long)]
    pub workspace: Option<PathBuf>,

    /// Default step timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Don't save the run to history
    #[arg(long)]
    pub no_history: bool,

    /// Keep running sibling cells after a failure
    #[arg(long)]
    pub no_fail_fast: bool,
}

impl RunCommand {
    pub fn event(&self) -> Event {
        Event::new(EventKind::from_name(&self.event), self.git_ref.clone())
    }
}

/// Validate a workflow file
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Print the expanded job and cell plan
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to workflow YAML file
    #[arg(short, long)]
    pub file: PathBuf,

    /// Event to check the trigger against
    #[arg(long, default_value = "push")]
    pub event: String,

    /// Ref the event points at
    #[arg(long = "ref", default_value = "refs/heads/main")]
    pub git_ref: String,
}

impl PlanCommand {
    pub fn event(&self) -> Event {
        Event::new(EventKind::from_name(&self.event), self.git_ref.clone())
    }
}

/// Show run history
#[derive(Debug, Args, Clone)]
pub struct HistoryCommand {
    /// Workflow name to filter by
    #[arg(short, long)]
    pub workflow: Option<String>,

    /// Number of recent runs to show
    #[arg(short, long, default_value_t = 10)]
    pub limit: usize,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Parse key=value pairs
pub fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("Invalid key=value pair: {}", s)),
    }
}
