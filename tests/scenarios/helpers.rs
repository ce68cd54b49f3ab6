//! Shared fixtures: a scripted command runner, a recording notifier, and a
//! sandbox with fake interpreters

use async_trait::async_trait;
use greynir_ci::core::config::WorkflowConfig;
use greynir_ci::core::{Event, JobStatus, SecretStore, StepState, Workflow};
use greynir_ci::execution::{CellReport, ExecutionEngine, RunReport, SchedulingStrategy};
use greynir_ci::notify::{NotificationPayload, Notifier, NotifyError};
use greynir_ci::runner::{CommandOutput, CommandRunner, CommandSpec, RunnerConfig, RunnerError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const PYTHON_PACKAGE: &str = include_str!("../../workflows/python-package.yml");

/// Interpreter versions of the canonical matrix, as the fakes report them
pub const INTERPRETERS: &[(&str, &str)] = &[
    ("python3.7", "3.7.17"),
    ("python3.8", "3.8.18"),
    ("python3.9", "3.9.18"),
    ("python3.10", "3.10.13"),
    ("python3.11", "3.11.6"),
    ("pypy3.7", "3.7.13"),
    ("pypy3.8", "3.8.16"),
];

/// A command the mock was asked to run
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub script: String,
    /// File name of the interpreter behind `python` on the step's PATH
    pub interpreter: Option<String>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone)]
struct Rule {
    script_contains: String,
    interpreter: Option<String>,
    exit_code: i32,
    output: String,
}

/// Command runner that answers from rules instead of spawning processes
///
/// The first rule whose script fragment (and interpreter, when set) matches
/// decides the result. Unmatched commands succeed and echo their script.
#[derive(Clone, Default)]
pub struct MockRunner {
    rules: Vec<Rule>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts containing `fragment` exit with 1
    pub fn fail_on(mut self, fragment: &str) -> Self {
        self.rules.push(Rule {
            script_contains: fragment.to_string(),
            interpreter: None,
            exit_code: 1,
            output: format!("FAILED: {}", fragment),
        });
        self
    }

    /// Scripts containing `fragment` exit with 1 when `interpreter` is active
    pub fn fail_on_interpreter(mut self, interpreter: &str, fragment: &str) -> Self {
        self.rules.push(Rule {
            script_contains: fragment.to_string(),
            interpreter: Some(interpreter.to_string()),
            exit_code: 1,
            output: format!("FAILED under {}: {}", interpreter, fragment),
        });
        self
    }

    /// Handle on the recorded calls, usable after the runner moved into an engine
    pub fn calls(&self) -> Arc<Mutex<Vec<RecordedCall>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: CommandSpec) -> Result<CommandOutput, RunnerError> {
        let interpreter = active_interpreter(&spec.env);
        self.calls.lock().unwrap().push(RecordedCall {
            script: spec.script.clone(),
            interpreter: interpreter.clone(),
            env: spec.env.clone(),
        });

        let rule = self.rules.iter().find(|rule| {
            spec.script.contains(&rule.script_contains)
                && rule
                    .interpreter
                    .as_ref()
                    .map_or(true, |wanted| interpreter.as_ref() == Some(wanted))
        });

        Ok(match rule {
            Some(rule) => CommandOutput::new(rule.output.clone()).with_exit_code(rule.exit_code),
            None => CommandOutput::new(spec.script),
        })
    }
}

/// Follow the `python` shim on PATH to the interpreter it points at
fn active_interpreter(env: &HashMap<String, String>) -> Option<String> {
    let path = env.get("PATH")?;
    std::env::split_paths(path).find_map(|dir| {
        let target = std::fs::read_link(dir.join("python")).ok()?;
        Some(target.file_name()?.to_string_lossy().into_owned())
    })
}

/// Notifier that keeps every payload instead of posting it
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<(String, NotificationPayload)>>>,
}

impl RecordingNotifier {
    pub fn sent(&self) -> Vec<(String, NotificationPayload)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        webhook_url: &str,
        payload: &NotificationPayload,
    ) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap()
            .push((webhook_url.to_string(), payload.clone()));
        Ok(())
    }
}

/// A workspace, a temp dir, and a bin dir of fake interpreters
pub struct Sandbox {
    _dir: TempDir,
    pub workspace: PathBuf,
    pub temp: PathBuf,
    pub bin: PathBuf,
}

impl Sandbox {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let workspace = dir.path().join("workspace");
        let temp = dir.path().join("tmp");
        let bin = dir.path().join("bin");
        for path in [&workspace, &temp, &bin] {
            std::fs::create_dir_all(path).unwrap();
        }
        for (name, version) in INTERPRETERS {
            fake_interpreter(&bin, name, version);
        }
        Self {
            _dir: dir,
            workspace,
            temp,
            bin,
        }
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig::new()
            .with_workspace(&self.workspace)
            .with_temp_dir(&self.temp)
            .with_labels(vec!["ubuntu-latest".to_string(), "linux".to_string()])
            .with_python_search_path(vec![self.bin.clone()])
    }

    pub fn engine(
        &self,
        runner: MockRunner,
        notifier: &RecordingNotifier,
        strategy: SchedulingStrategy,
    ) -> ExecutionEngine<MockRunner> {
        let mut secrets = SecretStore::new();
        secrets.insert("SLACK_WEBHOOK_URL", "https://hooks.slack.test/T000/B000");
        ExecutionEngine::new(runner, self.runner_config(), Arc::new(notifier.clone()), strategy)
            .with_secrets(secrets)
    }
}

#[cfg(unix)]
fn fake_interpreter(dir: &Path, name: &str, version: &str) {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\necho {}\n", version)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

#[cfg(not(unix))]
fn fake_interpreter(_dir: &Path, _name: &str, _version: &str) {}

pub fn workflow(yaml: &str) -> Workflow {
    WorkflowConfig::from_yaml(yaml).unwrap().to_workflow().unwrap()
}

/// Run `yaml` for a push to main
pub async fn run(engine: &ExecutionEngine<MockRunner>, yaml: &str) -> RunReport {
    let mut workflow = workflow(yaml);
    engine.execute(&mut workflow, &Event::push("main")).await.unwrap()
}

pub fn cell<'a>(report: &'a RunReport, job_id: &str, label: &str) -> &'a CellReport {
    report
        .cell(job_id, label)
        .unwrap_or_else(|| panic!("no cell {} {} in report", job_id, label))
}

pub fn assert_cell_status(report: &RunReport, job_id: &str, label: &str, status: JobStatus) {
    let cell = cell(report, job_id, label);
    assert_eq!(
        cell.status, status,
        "cell {} expected {:?}, got {:?} ({:?})",
        cell.name, status, cell.status, cell.reason
    );
}

/// Step names and a short state tag, for readable assertions
pub fn step_states(cell: &CellReport) -> Vec<(String, &'static str)> {
    cell.steps
        .iter()
        .map(|step| {
            let tag = match &step.state {
                StepState::Completed { .. } => "completed",
                StepState::Failed { .. } => "failed",
                StepState::Skipped { .. } => "skipped",
                StepState::Pending | StepState::Running { .. } => "unfinished",
            };
            (step.name.clone(), tag)
        })
        .collect()
}
