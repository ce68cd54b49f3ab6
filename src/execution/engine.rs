//! Main execution engine - orchestrates the entire workflow run

use crate::{
    core::{
        context::{ExpressionContext, SecretStore},
        expression::render_template,
        job::Job,
        state::{ExecutionStatus, JobStatus, StepOutcome},
        trigger::Event,
        Workflow,
    },
    execution::{
        executor::{CellRun, StepExecutor},
        report::{CellReport, RunReport},
        ExecutionScheduler, SchedulingStrategy,
    },
    notify::Notifier,
    runner::{CommandRunner, RunnerConfig},
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Events that can occur during a workflow run
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: Uuid,
        workflow_name: String,
        event: Event,
    },
    WorkflowSkipped {
        execution_id: Uuid,
        reason: String,
    },
    JobStarted {
        job_id: String,
        cells: usize,
    },
    JobSkipped {
        job_id: String,
        reason: String,
    },
    CellStarted {
        job_id: String,
        cell: String,
    },
    CellSkipped {
        job_id: String,
        cell: String,
        reason: String,
    },
    StepStarted {
        job_id: String,
        cell: String,
        step: String,
    },
    StepCompleted {
        job_id: String,
        cell: String,
        step: String,
        outcome: StepOutcome,
    },
    StepFailed {
        job_id: String,
        cell: String,
        step: String,
        error: String,
    },
    StepSkipped {
        job_id: String,
        cell: String,
        step: String,
        reason: String,
    },
    CellCompleted {
        job_id: String,
        cell: String,
        status: JobStatus,
    },
    JobCompleted {
        job_id: String,
        status: JobStatus,
    },
    WorkflowCompleted {
        execution_id: Uuid,
        status: ExecutionStatus,
    },
}

/// Type for event handlers
pub type EventHandler = Arc<dyn Fn(ExecutionEvent) + Send + Sync>;

/// Main workflow execution engine
pub struct ExecutionEngine<R> {
    scheduler: ExecutionScheduler,
    executor: Arc<StepExecutor<R>>,
    secrets: Arc<SecretStore>,
    env_overrides: HashMap<String, String>,
    fail_fast: Option<bool>,
    event_handlers: Arc<Mutex<Vec<EventHandler>>>,
}

impl<R: CommandRunner + 'static> ExecutionEngine<R> {
    pub fn new(
        runner: R,
        config: RunnerConfig,
        notifier: Arc<dyn Notifier>,
        strategy: SchedulingStrategy,
    ) -> Self {
        Self {
            scheduler: ExecutionScheduler::new(strategy),
            executor: Arc::new(StepExecutor::new(runner, config, notifier)),
            secrets: Arc::new(SecretStore::new()),
            env_overrides: HashMap::new(),
            fail_fast: None,
            event_handlers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Secrets available as `secrets.*`
    pub fn with_secrets(mut self, secrets: SecretStore) -> Self {
        self.secrets = Arc::new(secrets);
        self
    }

    /// Variables layered over the workflow env
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env_overrides = env;
        self
    }

    /// Override every job's `fail-fast`
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = Some(fail_fast);
        self
    }

    /// Add an event handler
    pub fn add_event_handler<F>(&self, handler: F)
    where
        F: Fn(ExecutionEvent) + Send + Sync + 'static,
    {
        self.event_handlers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(handler));
    }

    /// Emit an event to all handlers
    fn emit_event(&self, event: ExecutionEvent) {
        let handlers = self.event_handlers.lock().unwrap_or_else(|e| e.into_inner());
        for handler in handlers.iter() {
            handler(event.clone());
        }
    }

    /// One handler that forwards to every registered handler, for cell tasks
    fn event_sink(&self) -> EventHandler {
        let handlers = self.event_handlers.clone();
        Arc::new(move |event: ExecutionEvent| {
            let handlers = handlers.lock().unwrap_or_else(|e| e.into_inner());
            for handler in handlers.iter() {
                handler(event.clone());
            }
        })
    }

    /// Run the workflow for `event`
    ///
    /// Step failures are part of the report, not errors. `Err` means the
    /// run itself could not proceed.
    pub async fn execute(&self, workflow: &mut Workflow, event: &Event) -> Result<RunReport> {
        let execution_id = workflow.state.execution_id;
        let workflow_name = workflow.name.clone();

        info!(
            "Starting workflow: {} ({}) on {} {}",
            workflow_name, execution_id, event.kind, event.git_ref
        );
        self.emit_event(ExecutionEvent::WorkflowStarted {
            execution_id,
            workflow_name: workflow_name.clone(),
            event: event.clone(),
        });

        if !workflow.trigger.matches(event) {
            let reason = format!(
                "'{}' on {} does not trigger this workflow (listens to: {})",
                event.kind,
                event.git_ref,
                workflow.trigger.event_names().join(", ")
            );
            info!("Skipping workflow {}: {}", workflow_name, reason);
            workflow.state.skip();
            self.emit_event(ExecutionEvent::WorkflowSkipped { execution_id, reason });
            self.emit_event(ExecutionEvent::WorkflowCompleted {
                execution_id,
                status: ExecutionStatus::Skipped,
            });
            return Ok(self.report(workflow, event, Vec::new()));
        }

        workflow.state.start();
        workflow.state.total_cells = workflow.jobs.iter().map(|j| j.cells().len()).sum();

        let sink = self.event_sink();
        let base_context = self.base_context(workflow, event);
        let mut workflow_env = workflow.env.clone();
        workflow_env.extend(self.env_overrides.clone());
        let workflow_env = Arc::new(workflow_env);

        let mut cells = Vec::new();
        let mut run_failed = false;

        loop {
            let job_ids = self.scheduler.next_jobs(workflow);
            if job_ids.is_empty() {
                break;
            }

            for job_id in job_ids {
                let job = workflow
                    .job(&job_id)
                    .cloned()
                    .with_context(|| format!("Job '{}' not found", job_id))?;

                let job = Arc::new(job);
                let (status, reports) = self
                    .execute_job(job.clone(), workflow, &base_context, &workflow_env, &sink)
                    .await?;

                for report in &reports {
                    workflow.state.record(report.status);
                }

                if status == JobStatus::Failure {
                    if job.continue_on_error {
                        warn!("Job {} failed but continue-on-error is set", job_id);
                    } else {
                        run_failed = true;
                    }
                }

                // A failure tolerated by continue-on-error does not block dependents
                let recorded = if status == JobStatus::Failure && job.continue_on_error {
                    JobStatus::Success
                } else {
                    status
                };
                workflow.record_job(&job_id, recorded);
                cells.extend(reports);
            }
        }

        if !workflow.is_complete() {
            workflow.state.fail();
            self.emit_event(ExecutionEvent::WorkflowCompleted {
                execution_id,
                status: ExecutionStatus::Failed,
            });
            anyhow::bail!("Workflow stuck - jobs left with unmet needs");
        }

        let status = if run_failed {
            workflow.state.fail();
            ExecutionStatus::Failed
        } else {
            workflow.state.complete();
            ExecutionStatus::Completed
        };

        info!("Workflow finished: {} - {:?}", workflow_name, status);
        self.emit_event(ExecutionEvent::WorkflowCompleted { execution_id, status });

        Ok(self.report(workflow, event, cells))
    }

    /// Run every cell of one job
    async fn execute_job(
        &self,
        job: Arc<Job>,
        workflow: &Workflow,
        base_context: &ExpressionContext,
        workflow_env: &Arc<HashMap<String, String>>,
        sink: &EventHandler,
    ) -> Result<(JobStatus, Vec<CellReport>)> {
        let cells = job.cells();
        let needs_status = job.needs_status(workflow.job_results());

        let mut job_context = base_context.clone();
        job_context.github.insert("job".to_string(), job.id.clone());
        job_context.job_status = needs_status;

        info!("Starting job {} ({} cells)", job.id, cells.len());
        self.emit_event(ExecutionEvent::JobStarted {
            job_id: job.id.clone(),
            cells: cells.len(),
        });

        let not_run = |status: JobStatus, reason: &str| -> Vec<CellReport> {
            cells
                .iter()
                .map(|cell| {
                    let name = job.display_name(cell);
                    CellReport::not_run(&job.id, name, cell.clone(), status, reason)
                })
                .collect()
        };

        match job.condition.evaluate(&job_context) {
            Ok(true) => {}
            Ok(false) => {
                let reason = if needs_status == JobStatus::Success {
                    format!("condition '{}' was false", job.condition.source())
                } else {
                    format!("a needed job finished with {}", needs_status.as_str())
                };
                info!("Skipping job {}: {}", job.id, reason);
                self.emit_event(ExecutionEvent::JobSkipped {
                    job_id: job.id.clone(),
                    reason: reason.clone(),
                });
                self.emit_event(ExecutionEvent::JobCompleted {
                    job_id: job.id.clone(),
                    status: JobStatus::Skipped,
                });
                return Ok((JobStatus::Skipped, not_run(JobStatus::Skipped, &reason)));
            }
            Err(e) => {
                let reason = format!("invalid condition: {}", e);
                warn!("Job {}: {}", job.id, reason);
                self.emit_event(ExecutionEvent::JobCompleted {
                    job_id: job.id.clone(),
                    status: JobStatus::Failure,
                });
                return Ok((JobStatus::Failure, not_run(JobStatus::Failure, &reason)));
            }
        }

        let config = self.executor.config();
        let mut reports: Vec<(usize, CellReport)> = Vec::new();
        let mut runnable = Vec::new();

        for (index, cell) in cells.iter().enumerate() {
            let mut cell_context = job_context.clone();
            cell_context.matrix = cell.clone();

            let labels: Vec<String> = job
                .runs_on
                .iter()
                .map(|label| {
                    render_template(label, &cell_context).unwrap_or_else(|_| label.clone())
                })
                .collect();

            if !config.supports_labels(&labels) {
                let reason = format!("no runner provides '{}'", labels.join(", "));
                info!("Skipping {}: {}", job.display_name(cell), reason);
                self.emit_event(ExecutionEvent::CellSkipped {
                    job_id: job.id.clone(),
                    cell: cell.label(),
                    reason: reason.clone(),
                });
                let name = job.display_name(cell);
                let report =
                    CellReport::not_run(&job.id, name, cell.clone(), JobStatus::Skipped, reason);
                reports.push((index, report));
                continue;
            }

            runnable.push((index, cell.clone(), cell_context));
        }

        let concurrency = self.scheduler.cell_concurrency(&job, runnable.len());
        let fail_fast = self.fail_fast.unwrap_or(job.fail_fast);
        debug!(
            "Job {}: {} cells, concurrency {}, fail-fast {}",
            job.id,
            runnable.len(),
            concurrency,
            fail_fast
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        for (index, cell, mut context) in runnable {
            context.job_status = JobStatus::Success;
            let run = CellRun {
                job: job.clone(),
                cell,
                index,
                workflow_env: workflow_env.clone(),
                context,
            };
            let executor = self.executor.clone();
            let cancel = cancel.clone();
            let sink = sink.clone();

            // Cells take permits in matrix order
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("Cell semaphore closed")?;

            tasks.spawn(async move {
                let report = executor.execute_cell(run, cancel.clone(), sink).await;
                // Raise the flag before the permit frees the next cell
                let failed = report.status == JobStatus::Failure;
                if fail_fast && failed && !cancel.swap(true, Ordering::SeqCst) {
                    info!(
                        "{} failed, cancelling remaining cells of {}",
                        report.name, report.job_id
                    );
                }
                drop(permit);
                (index, report)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            let (index, report) = joined.context("Cell task failed")?;
            reports.push((index, report));
        }

        reports.sort_by_key(|(index, _)| *index);
        let reports: Vec<CellReport> = reports.into_iter().map(|(_, report)| report).collect();

        let status = job_result(reports.iter().map(|r| r.status));
        info!("Job {} finished: {}", job.id, status.as_str());
        self.emit_event(ExecutionEvent::JobCompleted {
            job_id: job.id.clone(),
            status,
        });

        Ok((status, reports))
    }

    /// Context shared by every cell: `github.*`, `runner.*`, secrets
    fn base_context(&self, workflow: &Workflow, event: &Event) -> ExpressionContext {
        let config = self.executor.config();
        let mut ctx = ExpressionContext::new(self.secrets.clone());

        let ref_name = event
            .branch()
            .or_else(|| event.tag())
            .unwrap_or(&event.git_ref)
            .to_string();
        let workspace = config.workspace.to_string_lossy().into_owned();

        ctx.github.extend([
            ("workflow".to_string(), workflow.name.clone()),
            ("event_name".to_string(), event.kind.to_string()),
            ("ref".to_string(), event.git_ref.clone()),
            ("ref_name".to_string(), ref_name.clone()),
            ("run_id".to_string(), workflow.state.execution_id.to_string()),
            ("workspace".to_string(), workspace.clone()),
        ]);
        if event.kind == crate::core::EventKind::PullRequest {
            ctx.github.insert("base_ref".to_string(), ref_name);
        }

        ctx.runner.extend([
            ("os".to_string(), config.os_name().to_string()),
            ("arch".to_string(), config.arch_name().to_string()),
            ("name".to_string(), "greynir-ci".to_string()),
            ("temp".to_string(), config.temp_dir.to_string_lossy().into_owned()),
            ("workspace".to_string(), workspace),
        ]);

        ctx
    }

    fn report(&self, workflow: &Workflow, event: &Event, cells: Vec<CellReport>) -> RunReport {
        RunReport {
            execution_id: workflow.state.execution_id,
            workflow: workflow.name.clone(),
            event: event.clone(),
            status: workflow.state.status,
            cells,
            started_at: workflow.state.started_at,
            completed_at: workflow.state.completed_at,
        }
    }
}

/// Job result from its cells: failure, then cancelled, then success
///
/// Skipped cells only count when nothing else ran.
fn job_result(statuses: impl Iterator<Item = JobStatus>) -> JobStatus {
    let statuses: Vec<JobStatus> = statuses.collect();
    let ran = statuses.contains(&JobStatus::Success);
    let broken = statuses.contains(&JobStatus::Failure) || statuses.contains(&JobStatus::Cancelled);
    if ran && !broken {
        return JobStatus::Success;
    }
    JobStatus::aggregate(statuses)
}
