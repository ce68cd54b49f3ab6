//! Step executor - runs the steps of one matrix cell

use crate::{
    core::{
        context::{ExpressionContext, StepContext},
        expression::render_template,
        job::Job,
        matrix::MatrixCell,
        state::{JobStatus, StepOutcome, StepState},
        step::{Step, StepAction},
    },
    execution::{
        engine::{EventHandler, ExecutionEvent},
        report::{CellReport, StepReport},
    },
    notify::Notifier,
    runner::{
        actions::{execute_action, ActionContext},
        CommandRunner, CommandSpec, RunnerConfig,
    },
};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Result of executing a step
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    /// Step finished successfully
    Success {
        logs: String,
        exit_code: Option<i32>,
        outputs: HashMap<String, String>,
        /// Variables exported to later steps
        env: HashMap<String, String>,
        /// Directories prepended to `PATH` for later steps
        path: Vec<PathBuf>,
    },
    /// Non-zero exit, timeout, or action error
    Failed {
        error: String,
        logs: String,
        exit_code: Option<i32>,
    },
    /// The run was cancelled while the step was running
    Interrupted,
}

/// A matrix cell ready to run
#[derive(Debug, Clone)]
pub struct CellRun {
    pub job: Arc<Job>,
    pub cell: MatrixCell,
    /// Position of the cell in the expanded matrix
    pub index: usize,
    /// Workflow env with command-line overrides applied, unrendered
    pub workflow_env: Arc<HashMap<String, String>>,
    /// Context with `github`, `runner`, `secrets` and `matrix` filled in
    pub context: ExpressionContext,
}

/// Mutable bookkeeping while a cell runs
#[derive(Debug, Default)]
struct CellState {
    exported_env: HashMap<String, String>,
    extra_path: Vec<PathBuf>,
    failed: bool,
    cancelled: bool,
    timed_out: bool,
}

/// Files a script may append to: `GITHUB_ENV`, `GITHUB_PATH`, `GITHUB_OUTPUT`
#[derive(Debug)]
struct FileCommands {
    env: PathBuf,
    path: PathBuf,
    output: PathBuf,
}

impl FileCommands {
    fn create(dir: &Path, step_index: usize) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let files = Self {
            env: dir.join(format!("env-{}", step_index)),
            path: dir.join(format!("path-{}", step_index)),
            output: dir.join(format!("output-{}", step_index)),
        };
        for file in [&files.env, &files.path, &files.output] {
            std::fs::write(file, "")?;
        }
        Ok(files)
    }

    fn export(&self, env: &mut HashMap<String, String>) {
        env.insert("GITHUB_ENV".to_string(), self.env.to_string_lossy().into_owned());
        env.insert("GITHUB_PATH".to_string(), self.path.to_string_lossy().into_owned());
        env.insert("GITHUB_OUTPUT".to_string(), self.output.to_string_lossy().into_owned());
    }

    /// Read back (outputs, env, path) written by the script
    fn collect(&self) -> (HashMap<String, String>, HashMap<String, String>, Vec<PathBuf>) {
        let read = |p: &Path| std::fs::read_to_string(p).unwrap_or_default();
        let outputs = parse_file_commands(&read(&self.output)).into_iter().collect();
        let env = parse_file_commands(&read(&self.env)).into_iter().collect();
        // Later lines take precedence on PATH
        let path = read(&self.path)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .rev()
            .map(PathBuf::from)
            .collect();
        (outputs, env, path)
    }
}

/// Parse `NAME=value` lines and `NAME<<DELIMITER` blocks
pub fn parse_file_commands(content: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    let mut lines = content.lines();

    while let Some(line) = lines.next() {
        let heredoc = match (line.find('='), line.find("<<")) {
            (Some(eq), Some(h)) => h < eq,
            (None, Some(_)) => true,
            _ => false,
        };

        if heredoc {
            if let Some((name, delimiter)) = line.split_once("<<") {
                let mut value = Vec::new();
                for body in lines.by_ref() {
                    if body == delimiter {
                        break;
                    }
                    value.push(body);
                }
                entries.push((name.trim().to_string(), value.join("\n")));
            }
        } else if let Some((name, value)) = line.split_once('=') {
            if !name.trim().is_empty() {
                entries.push((name.trim().to_string(), value.to_string()));
            }
        }
    }

    entries
}

/// Render a template, falling back to the raw text when it does not parse
fn render_or_raw(template: &str, ctx: &ExpressionContext) -> String {
    render_template(template, ctx).unwrap_or_else(|e| {
        warn!("Could not render '{}': {}", template, e);
        template.to_string()
    })
}

async fn wait_for_cancel(flag: &AtomicBool) {
    while !flag.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Executes the steps of a job cell
pub struct StepExecutor<R> {
    runner: R,
    config: RunnerConfig,
    notifier: Arc<dyn Notifier>,
}

impl<R: CommandRunner> StepExecutor<R> {
    pub fn new(runner: R, config: RunnerConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            runner,
            config,
            notifier,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run every step of one cell, strictly in order
    ///
    /// A failing step fails the cell; later steps run only when their
    /// condition allows it (`failure()`, `always()`). The cancel flag is
    /// watched while each step runs.
    pub async fn execute_cell(
        &self,
        run: CellRun,
        cancel: Arc<AtomicBool>,
        events: EventHandler,
    ) -> CellReport {
        let job = run.job.clone();
        let name = job.display_name(&run.cell);
        let label = run.cell.label();

        if cancel.load(Ordering::SeqCst) {
            info!("Cell {} cancelled before start", name);
            return CellReport::not_run(
                &job.id,
                name,
                run.cell,
                JobStatus::Cancelled,
                "cancelled before start",
            );
        }

        info!("Starting {}", name);
        events(ExecutionEvent::CellStarted {
            job_id: job.id.clone(),
            cell: label.clone(),
        });

        let started_at = Utc::now();
        let deadline = job.timeout.map(|t| Instant::now() + t);
        let run_id = run.context.github.get("run_id").cloned().unwrap_or_default();
        let cell_dir = self
            .config
            .temp_dir
            .join(run_id)
            .join(format!("{}-{}", job.id, run.index));

        let mut ctx = run.context;
        ctx.job_status = JobStatus::Success;
        for (key, value) in run.workflow_env.iter().chain(job.env.iter()) {
            let rendered = render_or_raw(value, &ctx);
            ctx.env.insert(key.clone(), rendered);
        }

        let mut state = CellState::default();
        let mut steps = Vec::with_capacity(job.steps.len());

        for (index, step) in job.steps.iter().enumerate() {
            if !state.failed && !state.cancelled && cancel.load(Ordering::SeqCst) {
                info!("{} cancelled", name);
                state.cancelled = true;
                ctx.job_status = JobStatus::Cancelled;
            }

            let step_env: HashMap<String, String> = step
                .env
                .iter()
                .map(|(k, v)| (k.clone(), render_or_raw(v, &ctx)))
                .collect();
            let step_ctx = ctx.with_env(&step_env);
            // Default names quote the script, which may carry a rendered secret
            let step_name = ctx.secrets.mask(&render_or_raw(&step.name, &step_ctx));

            if state.timed_out {
                let reason = "job timed out";
                steps.push(self.skip(&job.id, &label, step, step_name, reason, &mut ctx, &events));
                continue;
            }

            let should_run = match step.condition.evaluate(&step_ctx) {
                Ok(should_run) => should_run,
                Err(e) => {
                    error!("Invalid condition on step '{}': {}", step_name, e);
                    let now = Utc::now();
                    state.failed = true;
                    ctx.job_status = JobStatus::Failure;
                    events(ExecutionEvent::StepFailed {
                        job_id: job.id.clone(),
                        cell: label.clone(),
                        step: step_name.clone(),
                        error: e.to_string(),
                    });
                    steps.push(StepReport {
                        id: step.id.clone(),
                        name: step_name,
                        state: StepState::Failed {
                            error: format!("Invalid condition: {}", e),
                            exit_code: None,
                            started_at: now,
                            failed_at: now,
                        },
                        logs: String::new(),
                    });
                    continue;
                }
            };

            if !should_run {
                let reason = format!("condition '{}' was false", step.condition.source());
                steps.push(self.skip(&job.id, &label, step, step_name, &reason, &mut ctx, &events));
                continue;
            }

            info!("Running step '{}' in {}", step_name, name);
            events(ExecutionEvent::StepStarted {
                job_id: job.id.clone(),
                cell: label.clone(),
                step: step_name.clone(),
            });

            let mut limit = step
                .timeout
                .unwrap_or_else(|| Duration::from_secs(self.config.timeout_secs));
            let mut limited_by_job = false;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining <= limit {
                    limit = remaining;
                    limited_by_job = true;
                }
            }

            let interruptible = !state.failed && !state.cancelled;
            let step_started = Utc::now();
            let guarded = async {
                let running = self.run_step(step, index, &step_ctx, &step_env, &state, &cell_dir);
                match timeout(limit, running).await {
                    Ok(result) => result,
                    Err(_) if limited_by_job => ExecutionResult::Failed {
                        error: format!(
                            "The job exceeded the maximum execution time of {} minutes",
                            job.timeout.map(|t| t.as_secs() / 60).unwrap_or_default()
                        ),
                        logs: String::new(),
                        exit_code: None,
                    },
                    Err(_) => ExecutionResult::Failed {
                        error: format!("Timeout after {} seconds", limit.as_secs()),
                        logs: String::new(),
                        exit_code: None,
                    },
                }
            };

            let result = tokio::select! {
                result = guarded => result,
                _ = wait_for_cancel(&cancel), if interruptible => ExecutionResult::Interrupted,
            };

            if limited_by_job && deadline.is_some_and(|d| Instant::now() >= d) {
                state.timed_out = true;
            }

            let report = self.finish_step(
                &job.id,
                &label,
                step,
                step_name,
                step_started,
                result,
                &mut state,
                &mut ctx,
                &events,
            );
            steps.push(report);
        }

        let _ = std::fs::remove_dir_all(&cell_dir);

        let status = if state.failed || state.timed_out {
            JobStatus::Failure
        } else if state.cancelled {
            JobStatus::Cancelled
        } else {
            JobStatus::Success
        };

        info!("Finished {}: {}", name, status.as_str());
        events(ExecutionEvent::CellCompleted {
            job_id: job.id.clone(),
            cell: label,
            status,
        });

        CellReport {
            job_id: job.id.clone(),
            name,
            cell: run.cell,
            status,
            reason: None,
            steps,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn skip(
        &self,
        job_id: &str,
        cell: &str,
        step: &Step,
        step_name: String,
        reason: &str,
        ctx: &mut ExpressionContext,
        events: &EventHandler,
    ) -> StepReport {
        debug!("Skipping step '{}': {}", step_name, reason);
        if let Some(id) = &step.id {
            ctx.record_step(
                id,
                StepContext {
                    outcome: StepOutcome::Skipped,
                    conclusion: StepOutcome::Skipped,
                    outputs: HashMap::new(),
                },
            );
        }
        events(ExecutionEvent::StepSkipped {
            job_id: job_id.to_string(),
            cell: cell.to_string(),
            step: step_name.clone(),
            reason: reason.to_string(),
        });
        StepReport {
            id: step.id.clone(),
            name: step_name,
            state: StepState::Skipped {
                reason: reason.to_string(),
            },
            logs: String::new(),
        }
    }

    /// Apply a step result to the cell state and build its report
    #[allow(clippy::too_many_arguments)]
    fn finish_step(
        &self,
        job_id: &str,
        cell: &str,
        step: &Step,
        step_name: String,
        started_at: chrono::DateTime<Utc>,
        result: ExecutionResult,
        state: &mut CellState,
        ctx: &mut ExpressionContext,
        events: &EventHandler,
    ) -> StepReport {
        let now = Utc::now();

        let (step_state, logs, recorded) = match result {
            ExecutionResult::Success {
                logs,
                exit_code,
                outputs,
                env,
                path,
            } => {
                ctx.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
                state.exported_env.extend(env);
                state.extra_path = path.into_iter().chain(state.extra_path.drain(..)).collect();
                events(ExecutionEvent::StepCompleted {
                    job_id: job_id.to_string(),
                    cell: cell.to_string(),
                    step: step_name.clone(),
                    outcome: StepOutcome::Success,
                });
                (
                    StepState::Completed {
                        outcome: StepOutcome::Success,
                        exit_code,
                        started_at,
                        completed_at: now,
                    },
                    logs,
                    StepContext {
                        outcome: StepOutcome::Success,
                        conclusion: StepOutcome::Success,
                        outputs,
                    },
                )
            }
            ExecutionResult::Failed { error, logs, exit_code } if step.continue_on_error => {
                warn!("Step '{}' failed, continuing: {}", step_name, ctx.secrets.mask(&error));
                events(ExecutionEvent::StepCompleted {
                    job_id: job_id.to_string(),
                    cell: cell.to_string(),
                    step: step_name.clone(),
                    outcome: StepOutcome::Failure,
                });
                (
                    StepState::Completed {
                        outcome: StepOutcome::Failure,
                        exit_code,
                        started_at,
                        completed_at: now,
                    },
                    logs,
                    StepContext {
                        outcome: StepOutcome::Failure,
                        conclusion: StepOutcome::Success,
                        outputs: HashMap::new(),
                    },
                )
            }
            ExecutionResult::Failed { error, logs, exit_code } => {
                let error = ctx.secrets.mask(&error);
                error!("Step '{}' failed: {}", step_name, error);
                state.failed = true;
                ctx.job_status = JobStatus::Failure;
                events(ExecutionEvent::StepFailed {
                    job_id: job_id.to_string(),
                    cell: cell.to_string(),
                    step: step_name.clone(),
                    error: error.clone(),
                });
                (
                    StepState::Failed {
                        error,
                        exit_code,
                        started_at,
                        failed_at: now,
                    },
                    logs,
                    StepContext {
                        outcome: StepOutcome::Failure,
                        conclusion: StepOutcome::Failure,
                        outputs: HashMap::new(),
                    },
                )
            }
            ExecutionResult::Interrupted => {
                info!("Step '{}' interrupted", step_name);
                state.cancelled = true;
                ctx.job_status = JobStatus::Cancelled;
                let error = "The operation was canceled.".to_string();
                events(ExecutionEvent::StepFailed {
                    job_id: job_id.to_string(),
                    cell: cell.to_string(),
                    step: step_name.clone(),
                    error: error.clone(),
                });
                (
                    StepState::Failed {
                        error,
                        exit_code: None,
                        started_at,
                        failed_at: now,
                    },
                    String::new(),
                    StepContext {
                        outcome: StepOutcome::Cancelled,
                        conclusion: StepOutcome::Cancelled,
                        outputs: HashMap::new(),
                    },
                )
            }
        };

        if let Some(id) = &step.id {
            ctx.record_step(id, recorded);
        }

        StepReport {
            id: step.id.clone(),
            name: step_name,
            state: step_state,
            logs: ctx.secrets.mask(&logs),
        }
    }

    /// Environment for a step's process
    ///
    /// Workflow and job env are overridden by exported variables, which in
    /// turn are overridden by the step's own env.
    fn process_env(
        &self,
        ctx: &ExpressionContext,
        step_env: &HashMap<String, String>,
        state: &CellState,
    ) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("CI".to_string(), "true".to_string());

        let github_vars = [
            ("GITHUB_WORKFLOW", "workflow"),
            ("GITHUB_JOB", "job"),
            ("GITHUB_REF", "ref"),
            ("GITHUB_REF_NAME", "ref_name"),
            ("GITHUB_EVENT_NAME", "event_name"),
            ("GITHUB_RUN_ID", "run_id"),
            ("GITHUB_WORKSPACE", "workspace"),
        ];
        for (var, key) in github_vars {
            if let Some(value) = ctx.github.get(key) {
                env.insert(var.to_string(), value.clone());
            }
        }
        for (var, key) in [("RUNNER_OS", "os"), ("RUNNER_ARCH", "arch"), ("RUNNER_TEMP", "temp")] {
            if let Some(value) = ctx.runner.get(key) {
                env.insert(var.to_string(), value.clone());
            }
        }

        env.extend(ctx.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        for (key, value) in &state.exported_env {
            if !step_env.contains_key(key) {
                env.insert(key.clone(), value.clone());
            }
        }

        if !state.extra_path.is_empty() && !step_env.contains_key("PATH") {
            let inherited = env
                .get("PATH")
                .map(std::ffi::OsString::from)
                .or_else(|| std::env::var_os("PATH"))
                .unwrap_or_default();
            let dirs = state
                .extra_path
                .iter()
                .cloned()
                .chain(std::env::split_paths(&inherited));
            match std::env::join_paths(dirs) {
                Ok(path) => {
                    env.insert("PATH".to_string(), path.to_string_lossy().into_owned());
                }
                Err(e) => warn!("Could not extend PATH: {}", e),
            }
        }

        env
    }

    async fn run_step(
        &self,
        step: &Step,
        index: usize,
        ctx: &ExpressionContext,
        step_env: &HashMap<String, String>,
        state: &CellState,
        cell_dir: &Path,
    ) -> ExecutionResult {
        match &step.action {
            StepAction::Run { script, shell } => {
                let script = match render_template(script, ctx) {
                    Ok(script) => script,
                    Err(e) => {
                        return ExecutionResult::Failed {
                            error: format!("Failed to render script: {}", e),
                            logs: String::new(),
                            exit_code: None,
                        }
                    }
                };

                let working_dir = match &step.working_directory {
                    Some(dir) => self.config.workspace.join(render_or_raw(dir, ctx)),
                    None => self.config.workspace.clone(),
                };

                let mut env = self.process_env(ctx, step_env, state);
                let files = match FileCommands::create(cell_dir, index) {
                    Ok(files) => {
                        files.export(&mut env);
                        Some(files)
                    }
                    Err(e) => {
                        warn!("File commands unavailable in {}: {}", cell_dir.display(), e);
                        None
                    }
                };

                let mut spec = CommandSpec::new(script, working_dir);
                spec.shell = shell.clone();
                spec.env = env;
                spec.timeout = step.timeout;

                match self.runner.run(spec).await {
                    Ok(output) if output.success() => {
                        let (outputs, env, path) =
                            files.as_ref().map(FileCommands::collect).unwrap_or_default();
                        ExecutionResult::Success {
                            logs: output.combined(),
                            exit_code: output.exit_code,
                            outputs,
                            env,
                            path,
                        }
                    }
                    Ok(output) => ExecutionResult::Failed {
                        error: match output.exit_code {
                            Some(code) => format!("Process completed with exit code {}.", code),
                            None => "Process terminated by a signal.".to_string(),
                        },
                        logs: output.combined(),
                        exit_code: output.exit_code,
                    },
                    Err(e) => ExecutionResult::Failed {
                        error: e.to_string(),
                        logs: String::new(),
                        exit_code: None,
                    },
                }
            }
            StepAction::Uses { action_ref, with } => {
                let mut inputs = HashMap::with_capacity(with.len());
                for (key, value) in with {
                    match render_template(value, ctx) {
                        Ok(rendered) => {
                            inputs.insert(key.clone(), rendered);
                        }
                        Err(e) => {
                            return ExecutionResult::Failed {
                                error: format!("Failed to render input '{}': {}", key, e),
                                logs: String::new(),
                                exit_code: None,
                            }
                        }
                    }
                }

                let env = self.process_env(ctx, step_env, state);
                let action_ctx = ActionContext {
                    inputs: &inputs,
                    env: &env,
                    expr: ctx,
                    config: &self.config,
                    cell_dir,
                    notifier: self.notifier.as_ref(),
                };

                match execute_action(action_ref, &action_ctx).await {
                    Ok(result) => ExecutionResult::Success {
                        logs: result.logs,
                        exit_code: None,
                        outputs: result.outputs,
                        env: result.env,
                        path: result.path,
                    },
                    Err(e) => ExecutionResult::Failed {
                        error: e.to_string(),
                        logs: String::new(),
                        exit_code: None,
                    },
                }
            }
        }
    }
}
