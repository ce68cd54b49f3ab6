//! Shell subprocess runner

use crate::runner::{CommandOutput, CommandRunner, CommandSpec, RunnerConfig, RunnerError};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs `run:` scripts through a local shell
#[derive(Debug, Clone)]
pub struct ShellRunner {
    /// Shell used when a step does not name one
    default_shell: String,

    /// Timeout used when a step does not set one
    default_timeout: Duration,

    /// Where scripts for `{0}`-style shells are written
    script_dir: PathBuf,
}

/// Program and arguments for one script
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Script file written for template shells, removed afterwards
    pub script_file: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new(config: &RunnerConfig) -> Self {
        Self {
            default_shell: config.shell.clone(),
            default_timeout: Duration::from_secs(config.timeout_secs),
            script_dir: config.temp_dir.clone(),
        }
    }

    /// Build the command line for `shell`
    ///
    /// `bash` runs with `--noprofile --norc -eo pipefail`, `sh` with `-e`,
    /// and a custom shell may use `{0}` for the path of the script file.
    pub fn invocation(&self, shell: &str, script: &str) -> Result<Invocation, RunnerError> {
        let plain = |program: &str, flags: &[&str]| Invocation {
            program: program.to_string(),
            args: flags
                .iter()
                .map(|s| s.to_string())
                .chain(std::iter::once(script.to_string()))
                .collect(),
            script_file: None,
        };

        let invocation = match shell {
            "bash" => plain("bash", &["--noprofile", "--norc", "-eo", "pipefail", "-c"]),
            "sh" => plain("sh", &["-e", "-c"]),
            "python" => plain("python", &["-c"]),
            template if template.contains("{0}") => {
                std::fs::create_dir_all(&self.script_dir).map_err(|e| {
                    RunnerError::Internal(format!("Failed to create script dir: {}", e))
                })?;
                let path = self.script_dir.join(format!("script-{}", uuid::Uuid::new_v4()));
                std::fs::write(&path, script)
                    .map_err(|e| RunnerError::Internal(format!("Failed to write script: {}", e)))?;

                let mut parts = template.split_whitespace().map(|part| {
                    part.replace("{0}", &path.to_string_lossy())
                });
                let program = parts.next().ok_or_else(|| RunnerError::Spawn {
                    shell: template.to_string(),
                    reason: "empty shell".to_string(),
                })?;
                Invocation {
                    program,
                    args: parts.collect(),
                    script_file: Some(path),
                }
            }
            other => plain(other, &["-c"]),
        };

        Ok(invocation)
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, RunnerError> {
        let shell = spec.shell.as_deref().unwrap_or(&self.default_shell);
        let invocation = self.invocation(shell, &spec.script)?;
        let limit = spec.timeout.unwrap_or(self.default_timeout);

        debug!(
            "Spawning {} in {} (script length: {})",
            invocation.program,
            spec.working_dir.display(),
            spec.script.len()
        );

        let started = Instant::now();
        let result = timeout(
            limit,
            Command::new(&invocation.program)
                .args(&invocation.args)
                .current_dir(&spec.working_dir)
                .envs(&spec.env)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        if let Some(path) = &invocation.script_file {
            let _ = std::fs::remove_file(path);
        }

        let output = result
            .map_err(|_| RunnerError::Timeout(limit.as_secs()))?
            .map_err(|e| RunnerError::Spawn {
                shell: invocation.program.clone(),
                reason: e.to_string(),
            })?;

        let output = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: started.elapsed(),
        };

        // Output stays out of the log: it is masked and reported by the caller
        if !output.success() {
            warn!("{} exited with code {:?}", invocation.program, output.exit_code);
        }

        Ok(output)
    }
}
