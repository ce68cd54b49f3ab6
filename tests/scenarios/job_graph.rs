//! Test: jobs with needs, conditions and continue-on-error

use crate::helpers::*;
use greynir_ci::core::{Event, ExecutionStatus, JobStatus};
use greynir_ci::execution::{ExecutionEvent, SchedulingStrategy};
use std::sync::{Arc, Mutex};

const PIPELINE: &str = r#"
name: pipeline
on: push
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - run: flake8 src
  test:
    runs-on: ubuntu-latest
    needs: lint
    steps:
      - run: python -m pytest
  docs:
    runs-on: ubuntu-latest
    continue-on-error: true
    steps:
      - run: sphinx-build docs out
  publish:
    runs-on: ubuntu-latest
    needs: [test, docs]
    steps:
      - run: twine upload dist/*
  report:
    runs-on: ubuntu-latest
    needs: publish
    if: always()
    steps:
      - run: echo done
"#;

/// Everything passes: jobs run in dependency order
#[tokio::test]
async fn test_jobs_follow_needs() {
    let sandbox = Sandbox::new();
    let engine = sandbox.engine(
        MockRunner::new(),
        &RecordingNotifier::default(),
        SchedulingStrategy::Sequential,
    );

    let order = Arc::new(Mutex::new(Vec::new()));
    let seen = order.clone();
    engine.add_event_handler(move |event| {
        if let ExecutionEvent::JobStarted { job_id, .. } = event {
            seen.lock().unwrap().push(job_id);
        }
    });

    let report = run(&engine, PIPELINE).await;

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(*order.lock().unwrap(), vec!["lint", "test", "docs", "publish", "report"]);
}

/// A failed need skips its dependents; `always()` still runs
#[tokio::test]
async fn test_failed_need_skips_dependents() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_on("flake8");
    let calls = runner.calls();
    let engine = sandbox.engine(
        runner,
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    let report = run(&engine, PIPELINE).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_cell_status(&report, "lint", "", JobStatus::Failure);
    assert_cell_status(&report, "test", "", JobStatus::Skipped);
    assert_cell_status(&report, "docs", "", JobStatus::Success);
    assert_cell_status(&report, "publish", "", JobStatus::Skipped);
    assert_cell_status(&report, "report", "", JobStatus::Success);

    let scripts: Vec<String> = calls.lock().unwrap().iter().map(|c| c.script.clone()).collect();
    assert!(!scripts.iter().any(|s| s.contains("pytest")));
    assert!(scripts.iter().any(|s| s.contains("echo done")));
}

/// A job with continue-on-error fails without failing the run or its dependents
#[tokio::test]
async fn test_continue_on_error_job() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_on("sphinx-build");
    let engine = sandbox.engine(
        runner,
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    let report = run(&engine, PIPELINE).await;

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_cell_status(&report, "docs", "", JobStatus::Failure);
    assert_cell_status(&report, "publish", "", JobStatus::Success);
}

/// Selecting one job keeps only it and what it needs
#[tokio::test]
async fn test_selected_job_with_needs() {
    let sandbox = Sandbox::new();
    let engine = sandbox.engine(
        MockRunner::new(),
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    let mut workflow = workflow(PIPELINE);
    workflow.retain_job("test").unwrap();
    let report = engine.execute(&mut workflow, &Event::push("main")).await.unwrap();

    let jobs: Vec<&str> = report.cells.iter().map(|c| c.job_id.as_str()).collect();
    assert_eq!(jobs, vec!["lint", "test"]);
    assert!(workflow.retain_job("nope").is_err());
}

/// Workflow, job and step env all reach the command
#[tokio::test]
async fn test_env_layers_reach_command() {
    let yaml = r#"
on: push
env:
  PACKAGE: reynir
jobs:
  build:
    runs-on: ubuntu-latest
    env:
      TARGET: ${{ env.PACKAGE }}-dist
    steps:
      - run: build ${{ env.TARGET }}
        env:
          LEVEL: "3"
"#;
    let sandbox = Sandbox::new();
    let runner = MockRunner::new();
    let calls = runner.calls();
    let engine = sandbox.engine(
        runner,
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    let report = run(&engine, yaml).await;

    assert_eq!(report.status, ExecutionStatus::Completed);
    let calls = calls.lock().unwrap();
    assert_eq!(calls[0].script, "build reynir-dist");
    assert_eq!(calls[0].env["TARGET"], "reynir-dist");
    assert_eq!(calls[0].env["LEVEL"], "3");
    assert_eq!(calls[0].env["CI"], "true");
}
