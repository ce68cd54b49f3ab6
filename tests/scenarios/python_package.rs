//! Test: the shipped python-package workflow across its interpreter matrix

use crate::helpers::*;
use greynir_ci::core::{ExecutionStatus, JobStatus};
use greynir_ci::execution::SchedulingStrategy;
use std::collections::BTreeSet;

const LABELS: &[&str] = &[
    "(ubuntu-latest, 3.7)",
    "(ubuntu-latest, 3.8)",
    "(ubuntu-latest, 3.9)",
    "(ubuntu-latest, 3.10)",
    "(ubuntu-latest, 3.11)",
    "(ubuntu-latest, pypy-3.7)",
    "(ubuntu-latest, pypy-3.8)",
];

/// Every interpreter passes: seven green cells, no notification
#[cfg(unix)]
#[tokio::test]
async fn test_all_cells_pass() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new();
    let calls = runner.calls();
    let notifier = RecordingNotifier::default();
    let engine = sandbox.engine(runner, &notifier, SchedulingStrategy::Parallel);

    let report = run(&engine, PYTHON_PACKAGE).await;

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(report.workflow, "tests");
    assert_eq!(report.cells.len(), 7);
    for label in LABELS {
        assert_cell_status(&report, "build", label, JobStatus::Success);
    }

    let steps = step_states(cell(&report, "build", "(ubuntu-latest, 3.10)"));
    assert_eq!(
        steps,
        vec![
            ("Run actions/checkout@v3".to_string(), "completed"),
            ("Set up Python 3.10".to_string(), "completed"),
            ("Install GreynirEngine".to_string(), "completed"),
            ("Test with pytest".to_string(), "completed"),
            ("Slack notification".to_string(), "skipped"),
        ]
    );

    assert!(notifier.sent().is_empty());

    // Install and test ran once per cell, each under its own interpreter
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 14);
    let interpreters: BTreeSet<String> =
        calls.iter().filter_map(|c| c.interpreter.clone()).collect();
    let expected: BTreeSet<String> =
        INTERPRETERS.iter().map(|(name, _)| name.to_string()).collect();
    assert_eq!(interpreters, expected);
}

/// One interpreter fails its tests: that cell fails and notifies, the rest pass
#[cfg(unix)]
#[tokio::test]
async fn test_failing_cell_sends_notification() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_on_interpreter("pypy3.7", "python -m pytest");
    let notifier = RecordingNotifier::default();
    let engine = sandbox
        .engine(runner, &notifier, SchedulingStrategy::Parallel)
        .with_fail_fast(false);

    let report = run(&engine, PYTHON_PACKAGE).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert!(!report.succeeded());
    assert_cell_status(&report, "build", "(ubuntu-latest, pypy-3.7)", JobStatus::Failure);
    assert_eq!(report.cells_with(JobStatus::Success), 6);

    let failed = cell(&report, "build", "(ubuntu-latest, pypy-3.7)");
    assert_eq!(
        step_states(failed)[3..],
        [
            ("Test with pytest".to_string(), "failed"),
            ("Slack notification".to_string(), "completed"),
        ]
    );
    assert!(failed.failed_step().unwrap().logs.contains("FAILED under pypy3.7"));

    let sent = notifier.sent();
    assert_eq!(sent.len(), 1);
    let (url, payload) = &sent[0];
    assert_eq!(url, "https://hooks.slack.test/T000/B000");
    assert_eq!(payload.status, JobStatus::Failure);
    assert_eq!(payload.workflow, "tests");
    assert_eq!(payload.job, "build");
    assert_eq!(payload.cell, "(ubuntu-latest, pypy-3.7)");
    assert_eq!(payload.author_name.as_deref(), Some("Integration Testing"));
}

/// Fail-fast: with one cell at a time, the first failure cancels the rest
#[cfg(unix)]
#[tokio::test]
async fn test_fail_fast_cancels_remaining_cells() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_on_interpreter("python3.7", "pip install -e .");
    let calls = runner.calls();
    let notifier = RecordingNotifier::default();
    let engine = sandbox.engine(runner, &notifier, SchedulingStrategy::Sequential);

    let report = run(&engine, PYTHON_PACKAGE).await;

    assert_eq!(report.status, ExecutionStatus::Failed);
    assert_cell_status(&report, "build", "(ubuntu-latest, 3.7)", JobStatus::Failure);
    for label in &LABELS[1..] {
        assert_cell_status(&report, "build", label, JobStatus::Cancelled);
    }

    // The test step was skipped after the failed install, the notification still ran
    let first = cell(&report, "build", "(ubuntu-latest, 3.7)");
    assert_eq!(step_states(first)[3], ("Test with pytest".to_string(), "skipped"));
    assert_eq!(notifier.sent().len(), 1);

    // Only the failing install reached the runner
    assert_eq!(calls.lock().unwrap().len(), 1);
}

/// Without a webhook secret the notification step fails, the cell was failing anyway
#[cfg(unix)]
#[tokio::test]
async fn test_missing_webhook_fails_notification_step() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new().fail_on("python -m pytest");
    let notifier = RecordingNotifier::default();
    let engine = greynir_ci::execution::ExecutionEngine::new(
        runner,
        sandbox.runner_config(),
        std::sync::Arc::new(notifier.clone()),
        SchedulingStrategy::Sequential,
    );

    let report = run(&engine, PYTHON_PACKAGE).await;

    let first = cell(&report, "build", "(ubuntu-latest, 3.7)");
    assert_eq!(first.status, JobStatus::Failure);
    assert_eq!(step_states(first)[4], ("Slack notification".to_string(), "failed"));
    assert!(notifier.sent().is_empty());
}
