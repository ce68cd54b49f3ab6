//! Test: which events start a run

use crate::helpers::*;
use greynir_ci::core::{Event, ExecutionStatus, JobStatus};
use greynir_ci::execution::SchedulingStrategy;

const MAIN_ONLY: &str = r#"
name: release
on:
  push:
    branches: [main, "release/**"]
    tags: ["v*"]
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: make dist
"#;

/// A push to a branch outside the filter runs nothing and is not a failure
#[tokio::test]
async fn test_untriggered_push_is_skipped() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new();
    let calls = runner.calls();
    let engine = sandbox.engine(
        runner,
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    let mut workflow = workflow(MAIN_ONLY);
    let report = engine
        .execute(&mut workflow, &Event::push("feature/login"))
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Skipped);
    assert!(report.succeeded());
    assert!(report.cells.is_empty());
    assert!(calls.lock().unwrap().is_empty());
}

/// Branch globs and tag filters both admit a push
#[tokio::test]
async fn test_filtered_refs_trigger() {
    let sandbox = Sandbox::new();
    let engine = sandbox.engine(
        MockRunner::new(),
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    for git_ref in ["main", "refs/heads/release/2.0/rc1", "refs/tags/v3.4.0"] {
        let mut workflow = workflow(MAIN_ONLY);
        let report = engine.execute(&mut workflow, &Event::push(git_ref)).await.unwrap();
        assert_eq!(report.status, ExecutionStatus::Completed, "ref {}", git_ref);
    }
}

/// Pull requests are not in the trigger list, so they do not run
#[tokio::test]
async fn test_unlisted_event_is_skipped() {
    let sandbox = Sandbox::new();
    let engine = sandbox.engine(
        MockRunner::new(),
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    let mut workflow = workflow(MAIN_ONLY);
    let report = engine
        .execute(&mut workflow, &Event::pull_request("main"))
        .await
        .unwrap();
    assert_eq!(report.status, ExecutionStatus::Skipped);
}

/// The shipped workflow runs for pull requests against any branch
#[cfg(unix)]
#[tokio::test]
async fn test_pull_request_runs_python_package() {
    let sandbox = Sandbox::new();
    let engine = sandbox.engine(
        MockRunner::new(),
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    let mut workflow = workflow(PYTHON_PACKAGE);
    let report = engine
        .execute(&mut workflow, &Event::pull_request("some/feature"))
        .await
        .unwrap();

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_eq!(report.cells_with(JobStatus::Success), 7);
}
