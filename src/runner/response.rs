//! Command output and runner error types

use crate::notify::NotifyError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Error types for runner operations
///
/// A script that exits non-zero is not an error here; it comes back as a
/// `CommandOutput` with that exit code.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to spawn '{shell}': {reason}")]
    Spawn { shell: String, reason: String },

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Process exited with code {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("Unsupported action '{0}'")]
    UnsupportedAction(String),

    #[error("Action failed: {0}")]
    Action(String),

    #[error("Notification failed: {0}")]
    Notify(#[from] NotifyError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Captured result of one script
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub exit_code: Option<i32>,

    pub stdout: String,

    pub stderr: String,

    pub duration: Duration,
}

impl CommandOutput {
    /// Create a successful output
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    /// Create an output with the given exit code
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Turn a non-zero exit into `RunnerError::Exit`
    pub fn check(self) -> Result<Self, RunnerError> {
        if self.success() {
            Ok(self)
        } else {
            Err(RunnerError::Exit {
                code: self.exit_code.unwrap_or(-1),
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    /// Stdout followed by stderr, as shown in step logs
    pub fn combined(&self) -> String {
        let mut logs = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !logs.is_empty() && !logs.ends_with('\n') {
                logs.push('\n');
            }
            logs.push_str(&self.stderr);
        }
        logs
    }
}
