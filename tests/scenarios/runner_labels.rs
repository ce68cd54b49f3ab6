//! Test: cells whose runs-on labels this host cannot provide

use crate::helpers::*;
use greynir_ci::core::{ExecutionStatus, JobStatus};
use greynir_ci::execution::{ExecutionEvent, SchedulingStrategy};
use std::sync::{Arc, Mutex};

const CROSS_PLATFORM: &str = r#"
name: cross-platform
on: push
jobs:
  test:
    runs-on: ${{ matrix.os }}
    strategy:
      matrix:
        os: [ubuntu-latest, windows-latest, macos-latest]
        python-version: ["3.11"]
    steps:
      - run: python -m pytest
"#;

/// Only the cell this host can run executes; the others are skipped, not failed
#[tokio::test]
async fn test_unsupported_labels_skip_cells() {
    let sandbox = Sandbox::new();
    let runner = MockRunner::new();
    let calls = runner.calls();
    let engine = sandbox.engine(
        runner,
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    let skipped = Arc::new(Mutex::new(Vec::new()));
    let sink = skipped.clone();
    engine.add_event_handler(move |event| {
        if let ExecutionEvent::CellSkipped { cell, .. } = event {
            sink.lock().unwrap().push(cell);
        }
    });

    let report = run(&engine, CROSS_PLATFORM).await;

    assert_eq!(report.status, ExecutionStatus::Completed);
    assert_cell_status(&report, "test", "(ubuntu-latest, 3.11)", JobStatus::Success);
    assert_cell_status(&report, "test", "(windows-latest, 3.11)", JobStatus::Skipped);
    assert_cell_status(&report, "test", "(macos-latest, 3.11)", JobStatus::Skipped);

    let reason = cell(&report, "test", "(windows-latest, 3.11)").reason.clone().unwrap();
    assert!(reason.contains("windows-latest"));

    assert_eq!(calls.lock().unwrap().len(), 1);
    assert_eq!(
        *skipped.lock().unwrap(),
        vec!["(windows-latest, 3.11)", "(macos-latest, 3.11)"]
    );
}

/// Labels are compared without regard to case
#[tokio::test]
async fn test_labels_ignore_case() {
    let yaml = r#"
on: push
jobs:
  build:
    runs-on: [Ubuntu-Latest, LINUX]
    steps:
      - run: make
"#;
    let sandbox = Sandbox::new();
    let engine = sandbox.engine(
        MockRunner::new(),
        &RecordingNotifier::default(),
        SchedulingStrategy::Parallel,
    );

    let report = run(&engine, yaml).await;
    assert_cell_status(&report, "build", "", JobStatus::Success);
}
