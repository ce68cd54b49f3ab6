use anyhow::{Context, Result};
use greynir_ci::cli::commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use greynir_ci::cli::output::*;
use greynir_ci::cli::{Cli, Command};
use greynir_ci::core::config::WorkflowConfig;
use greynir_ci::core::expression::render_template;
use greynir_ci::core::{referenced_secrets, ExpressionContext, SecretStore, Workflow};
use greynir_ci::execution::{ExecutionEngine, ExecutionEvent};
use greynir_ci::notify::WebhookNotifier;
use greynir_ci::persistence::{default_store, ExecutionSummary};
use greynir_ci::runner::{RunnerConfig, ShellRunner};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const NOTIFY_TIMEOUT_SECS: u64 = 30;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let ok = match &cli.command {
        Command::Run(cmd) => run_workflow(cmd).await?,
        Command::Validate(cmd) => validate_workflow(cmd)?,
        Command::Plan(cmd) => plan_workflow(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_workflow(cmd: &RunCommand) -> Result<bool> {
    let config = WorkflowConfig::from_file(&cmd.file).context("Failed to load workflow")?;
    let source = std::fs::read_to_string(&cmd.file)
        .with_context(|| format!("Failed to read {}", cmd.file.display()))?;

    println!("{} Loaded workflow: {}", INFO, style(config.display_name()).bold());

    let mut workflow = config.to_workflow()?;
    if let Some(job) = &cmd.job {
        workflow.retain_job(job)?;
    }

    let mut secrets = SecretStore::new();
    for (key, value) in &cmd.secret {
        secrets.insert(key.clone(), value.clone());
    }
    let referenced = referenced_secrets(&source);
    secrets.resolve_from_env(referenced.iter().map(String::as_str));
    for name in referenced.iter().filter(|name| secrets.get(name).is_none()) {
        println!("{} Secret {} is not set; it will be empty", WARN, style(name).yellow());
    }

    let env: HashMap<String, String> = cmd.env.iter().cloned().collect();
    for (key, value) in &env {
        println!("{} Env override: {} = {}", INFO, style(key).cyan(), style(value).dim());
    }

    let mut runner_config = RunnerConfig::new();
    if let Some(workspace) = &cmd.workspace {
        let workspace = workspace
            .canonicalize()
            .with_context(|| format!("Workspace {} not found", workspace.display()))?;
        runner_config = runner_config.with_workspace(workspace);
    }
    for label in &cmd.label {
        runner_config = runner_config.with_label(label.clone());
    }
    if let Some(secs) = cmd.timeout {
        runner_config = runner_config.with_timeout(secs);
    }

    let notifier =
        WebhookNotifier::new(NOTIFY_TIMEOUT_SECS).context("Failed to create webhook client")?;
    let mut engine = ExecutionEngine::new(
        ShellRunner::new(&runner_config),
        runner_config,
        Arc::new(notifier),
        cmd.strategy,
    )
    .with_secrets(secrets)
    .with_env(env);
    if cmd.no_fail_fast {
        engine = engine.with_fail_fast(false);
    }

    let total_cells: usize = workflow.jobs.iter().map(|j| j.cells().len()).sum();
    let job_cells: HashMap<String, usize> = workflow
        .jobs
        .iter()
        .map(|j| (j.id.clone(), j.cells().len()))
        .collect();
    let progress = create_progress_bar(total_cells);
    let bar = progress.clone();
    engine.add_event_handler(move |event| {
        if let Some(line) = format_execution_event(&event) {
            bar.println(line);
        }
        match &event {
            ExecutionEvent::StepStarted { job_id, cell, step } => {
                bar.set_message(format!("{} {} {}", job_id, cell, step));
            }
            ExecutionEvent::CellCompleted { .. } | ExecutionEvent::CellSkipped { .. } => bar.inc(1),
            ExecutionEvent::JobSkipped { job_id, .. } => {
                bar.inc(job_cells.get(job_id).copied().unwrap_or(1) as u64)
            }
            _ => {}
        }
    });

    println!();
    let event = cmd.event();
    let result = engine.execute(&mut workflow, &event).await;
    progress.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("{:#}", e);
            println!(
                "\n{} {} {}",
                CROSS,
                style(&workflow.name).bold(),
                style("could not run").red()
            );
            return Ok(false);
        }
    };

    println!();
    for cell in &report.cells {
        println!("  {}", format_cell(cell));
    }
    for logs in format_failure_logs(&report, 20) {
        println!("\n{}", logs);
    }

    if !cmd.no_history {
        let summary = ExecutionSummary::from_report(&report);
        match default_store().await {
            Ok(store) => {
                store.save_execution(&summary).await?;
                info!("Saved run {} to history", summary.execution_id);
            }
            Err(e) => println!("{} History unavailable: {:#}", WARN, e),
        }
    }

    let elapsed = match (report.started_at, report.completed_at) {
        (Some(start), Some(end)) => end
            .signed_duration_since(start)
            .to_std()
            .map(format_duration)
            .unwrap_or_default(),
        _ => String::new(),
    };

    if report.succeeded() {
        println!(
            "\n{} {} {} {}",
            CHECK,
            style(&report.workflow).bold(),
            format_status(report.status),
            style(elapsed).dim()
        );
        Ok(true)
    } else {
        println!(
            "\n{} {} {} ({} of {} cells failed) {}",
            CROSS,
            style(&report.workflow).bold(),
            format_status(report.status),
            report.cells_with(greynir_ci::JobStatus::Failure),
            report.cells.len(),
            style(elapsed).dim()
        );
        Ok(false)
    }
}

fn validate_workflow(cmd: &ValidateCommand) -> Result<bool> {
    let result = WorkflowConfig::from_file(&cmd.file).and_then(|config| {
        let workflow = config.to_workflow()?;
        Ok((config, workflow))
    });

    match result {
        Ok((config, workflow)) => {
            if cmd.json {
                let jobs: Vec<_> = workflow
                    .jobs
                    .iter()
                    .map(|job| {
                        serde_json::json!({
                            "id": job.id,
                            "needs": job.needs,
                            "cells": job.cells().len(),
                            "steps": job.steps.len(),
                        })
                    })
                    .collect();
                let data = serde_json::json!({
                    "valid": true,
                    "name": workflow.name,
                    "on": workflow.trigger.event_names(),
                    "jobs": jobs,
                    "config": config,
                });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{} Workflow is valid!", CHECK);
                println!("  Name: {}", style(&workflow.name).bold());
                println!("  On: {}", style(workflow.trigger.event_names().join(", ")).cyan());
                for job in &workflow.jobs {
                    println!(
                        "  Job {}: {} cells, {} steps",
                        style(&job.id).bold(),
                        style(job.cells().len()).cyan(),
                        style(job.steps.len()).cyan()
                    );
                }
            }
            Ok(true)
        }
        Err(e) => {
            if cmd.json {
                let data = serde_json::json!({ "valid": false, "error": format!("{:#}", e) });
                println!("{}", serde_json::to_string_pretty(&data)?);
            } else {
                println!("{} Validation failed:", CROSS);
                println!("  {}", style(format!("{:#}", e)).red());
            }
            Ok(false)
        }
    }
}

fn plan_workflow(cmd: &PlanCommand) -> Result<bool> {
    let config = WorkflowConfig::from_file(&cmd.file).context("Failed to load workflow")?;
    let workflow: Workflow = config.to_workflow()?;
    let event = cmd.event();
    let runner = RunnerConfig::new();

    println!("{} Plan for {}", INFO, style(&workflow.name).bold());
    if !workflow.trigger.matches(&event) {
        println!(
            "{} '{}' on {} does not trigger this workflow (listens to: {})",
            SKIP,
            event.kind,
            event.git_ref,
            workflow.trigger.event_names().join(", ")
        );
        return Ok(true);
    }

    for job_id in workflow.execution_order() {
        let Some(job) = workflow.job(job_id) else {
            continue;
        };
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" (needs {})", job.needs.join(", "))
        };
        println!("\n  {}{}", style(&job.id).bold(), style(needs).dim());

        for cell in job.cells() {
            let mut ctx = ExpressionContext::new(Arc::new(SecretStore::new()));
            ctx.matrix = cell.clone();
            let labels: Vec<String> = job
                .runs_on
                .iter()
                .map(|label| render_template(label, &ctx).unwrap_or_else(|_| label.clone()))
                .collect();
            let marker = if runner.supports_labels(&labels) {
                String::new()
            } else {
                style(" [no matching runner]").yellow().to_string()
            };
            println!(
                "    {} on {}{}",
                job.display_name(&cell),
                style(labels.join(", ")).cyan(),
                marker
            );
        }

        for step in &job.steps {
            println!("      - {}", step.name);
        }
    }

    Ok(true)
}

async fn show_history(cmd: &HistoryCommand) -> Result<bool> {
    let store = default_store().await?;
    let executions = store.list_executions(cmd.workflow.as_deref(), cmd.limit).await?;

    if cmd.json {
        let data = serde_json::json!({ "executions": executions });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(true);
    }

    if executions.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(true);
    }

    println!("{} Run history (showing latest {}):", INFO, cmd.limit);
    for summary in &executions {
        println!("  {}", format_execution_summary(summary));
    }

    Ok(true)
}
