//! Command execution for `run:` steps and built-in actions

pub mod actions;
pub mod client;
pub mod response;
pub mod subprocess;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub use actions::{ActionContext, ActionRef, ActionResult};
pub use client::RunnerConfig;
pub use response::{CommandOutput, RunnerError};
pub use subprocess::ShellRunner;

/// One script to run
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Rendered script text
    pub script: String,

    /// Shell override; the runner's default when `None`
    pub shell: Option<String>,

    pub working_dir: PathBuf,

    /// Variables layered on top of the inherited process environment
    pub env: HashMap<String, String>,

    pub timeout: Option<Duration>,
}

impl CommandSpec {
    pub fn new(script: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            script: script.into(),
            shell: None,
            working_dir: working_dir.into(),
            env: HashMap::new(),
            timeout: None,
        }
    }
}

/// Trait for script execution - allows for different implementations
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a script and capture its output
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, RunnerError>;
}
