//! Built-in `uses:` actions
//!
//! Actions are resolved from their `owner/name@version` reference. Only
//! the actions a Python package workflow needs are built in:
//! - `actions/checkout`: the repository is already the local workspace
//! - `actions/setup-python`: pick a local interpreter and put it first on `PATH`
//! - Slack notification actions: post to a webhook through a `Notifier`
//!
//! Anything else fails the step.

use crate::core::{context::ExpressionContext, state::JobStatus};
use crate::notify::{NotificationPayload, Notifier, NotifyError};
use crate::runner::{RunnerConfig, RunnerError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Parsed action reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    /// Owner, `actions` for first-party actions
    pub owner: String,
    /// Action name
    pub name: String,
    /// Version (tag, branch, or commit)
    pub version: String,
}

impl ActionRef {
    /// Parse `owner/name@version`; `name@version` means `actions/name`
    pub fn parse(action_str: &str) -> Option<Self> {
        if action_str.starts_with("./") || action_str.starts_with("docker://") {
            return None;
        }

        let (path, version) = match action_str.rfind('@') {
            Some(at_pos) => (&action_str[..at_pos], &action_str[at_pos + 1..]),
            None => (action_str, "main"),
        };

        let parts: Vec<&str> = path.split('/').collect();
        let (owner, name) = match parts.as_slice() {
            [name] if !name.is_empty() => ("actions", *name),
            // `owner/repo/subdir` points into a repository
            [owner, name, ..] if !owner.is_empty() && !name.is_empty() => (*owner, *name),
            _ => return None,
        };

        Some(ActionRef {
            owner: owner.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        })
    }

    /// `owner/name` without version
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// Actions this runner implements itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinAction {
    Checkout,
    SetupPython,
    SlackNotify,
}

impl BuiltinAction {
    pub fn resolve(action_ref: &ActionRef) -> Option<Self> {
        match (action_ref.owner.to_ascii_lowercase().as_str(), action_ref.name.as_str()) {
            ("actions", "checkout") => Some(BuiltinAction::Checkout),
            ("actions", "setup-python") => Some(BuiltinAction::SetupPython),
            ("8398a7", "action-slack")
            | ("rtcamp", "action-slack-notify")
            | ("slackapi", "slack-github-action") => Some(BuiltinAction::SlackNotify),
            _ => None,
        }
    }
}

/// Everything an action may read
pub struct ActionContext<'a> {
    /// Rendered `with:` inputs
    pub inputs: &'a HashMap<String, String>,

    /// Step environment (workflow, job and step env, rendered)
    pub env: &'a HashMap<String, String>,

    pub expr: &'a ExpressionContext,

    pub config: &'a RunnerConfig,

    /// Scratch directory of the current matrix cell
    pub cell_dir: &'a Path,

    pub notifier: &'a dyn Notifier,
}

/// Result of executing an action
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub logs: String,

    /// `steps.<id>.outputs`
    pub outputs: HashMap<String, String>,

    /// Variables exported to later steps
    pub env: HashMap<String, String>,

    /// Directories prepended to `PATH` for later steps
    pub path: Vec<PathBuf>,
}

/// Execute a `uses:` reference
pub async fn execute_action(
    action: &str,
    ctx: &ActionContext<'_>,
) -> Result<ActionResult, RunnerError> {
    let action_ref =
        ActionRef::parse(action).ok_or_else(|| RunnerError::UnsupportedAction(action.to_string()))?;
    let builtin = BuiltinAction::resolve(&action_ref)
        .ok_or_else(|| RunnerError::UnsupportedAction(action_ref.slug()))?;

    debug!("Running built-in action {} ({:?})", action, builtin);

    match builtin {
        BuiltinAction::Checkout => checkout(ctx),
        BuiltinAction::SetupPython => setup_python(ctx).await,
        BuiltinAction::SlackNotify => slack_notify(ctx).await,
    }
}

fn checkout(ctx: &ActionContext<'_>) -> Result<ActionResult, RunnerError> {
    let workspace = match ctx.inputs.get("path").filter(|p| !p.is_empty()) {
        Some(path) => ctx.config.workspace.join(path),
        None => ctx.config.workspace.clone(),
    };

    if !workspace.is_dir() {
        return Err(RunnerError::Action(format!(
            "Workspace {} does not exist",
            workspace.display()
        )));
    }

    let requested_ref = ctx
        .inputs
        .get("ref")
        .filter(|r| !r.is_empty())
        .cloned()
        .or_else(|| ctx.expr.github.get("ref").cloned())
        .unwrap_or_default();

    info!("Using local checkout at {}", workspace.display());
    Ok(ActionResult {
        logs: format!(
            "Using local checkout at {} (ref: {})\n",
            workspace.display(),
            if requested_ref.is_empty() { "working tree" } else { &requested_ref }
        ),
        ..Default::default()
    })
}

/// Interpreter family requested by `python-version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PythonRequest {
    CPython(String),
    PyPy(String),
}

impl PythonRequest {
    /// Parse `3.9`, `3.10.4`, `3.x`, `pypy-3.8` or `pypy3.8`
    pub fn parse(spec: &str) -> Result<Self, RunnerError> {
        let spec = spec.trim();
        let (pypy, version) = match spec.strip_prefix("pypy") {
            Some(rest) => (true, rest.trim_start_matches('-')),
            None => (false, spec),
        };

        let parts: Vec<&str> = version
            .split('.')
            .filter(|p| !p.is_empty() && *p != "x")
            .take(2)
            .collect();
        if parts.is_empty() || !parts.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())) {
            return Err(RunnerError::Action(format!("Invalid python-version '{}'", spec)));
        }

        let version = parts.join(".");
        Ok(if pypy {
            PythonRequest::PyPy(version)
        } else {
            PythonRequest::CPython(version)
        })
    }

    pub fn version(&self) -> &str {
        match self {
            PythonRequest::CPython(v) | PythonRequest::PyPy(v) => v,
        }
    }

    /// Executable names to look for, most specific first
    ///
    /// The flag says whether the interpreter's reported version must be checked.
    pub fn candidates(&self) -> Vec<(String, bool)> {
        match self {
            PythonRequest::CPython(v) => vec![(format!("python{}", v), false)],
            PythonRequest::PyPy(v) => {
                vec![(format!("pypy{}", v), false), ("pypy3".to_string(), true)]
            }
        }
    }

    /// Does a reported `X.Y.Z` version satisfy this request?
    fn accepts(&self, reported: &str) -> bool {
        let wanted = self.version();
        reported == wanted || reported.starts_with(&format!("{}.", wanted))
    }
}

/// A resolved interpreter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub path: PathBuf,
    pub version: String,
}

/// Search `dirs` for an interpreter matching `request`
pub async fn find_interpreter(
    request: &PythonRequest,
    dirs: &[PathBuf],
) -> Result<Interpreter, RunnerError> {
    for (name, verify) in request.candidates() {
        for dir in dirs {
            let path = dir.join(&name);
            if !is_executable(&path) {
                continue;
            }

            let reported = query_version(&path).await;
            match (&reported, verify) {
                (Some(version), true) if !request.accepts(version) => {
                    debug!("{} reports {}, wanted {}", path.display(), version, request.version());
                    continue;
                }
                (None, true) => continue,
                _ => {}
            }

            return Ok(Interpreter {
                version: reported.unwrap_or_else(|| request.version().to_string()),
                path,
            });
        }
    }

    Err(RunnerError::Action(format!(
        "No interpreter found for {:?} on the search path",
        request
    )))
}

async fn query_version(path: &Path) -> Option<String> {
    let output = tokio::time::timeout(
        Duration::from_secs(10),
        Command::new(path)
            .args(["-c", "import sys; print('.'.join(map(str, sys.version_info[:3])))"])
            .kill_on_drop(true)
            .output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        return None;
    }
    let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!version.is_empty()).then_some(version)
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Link `python` and `python3` to the chosen interpreter
#[cfg(unix)]
fn write_shims(shim_dir: &Path, interpreter: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(shim_dir)?;
    for name in ["python", "python3"] {
        let link = shim_dir.join(name);
        if link.symlink_metadata().is_ok() {
            std::fs::remove_file(&link)?;
        }
        std::os::unix::fs::symlink(interpreter, &link)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn write_shims(_shim_dir: &Path, _interpreter: &Path) -> std::io::Result<()> {
    Ok(())
}

async fn setup_python(ctx: &ActionContext<'_>) -> Result<ActionResult, RunnerError> {
    let spec = ctx
        .inputs
        .get("python-version")
        .filter(|v| !v.is_empty())
        .map(String::as_str)
        .unwrap_or("3");
    let request = PythonRequest::parse(spec)?;
    let interpreter = find_interpreter(&request, &ctx.config.python_search_path).await?;

    let bin_dir = interpreter
        .path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    let location = match bin_dir.file_name() {
        Some(name) if name == "bin" => bin_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| bin_dir.clone()),
        _ => bin_dir.clone(),
    };

    let shim_dir = ctx.cell_dir.join("python-shims");
    write_shims(&shim_dir, &interpreter.path)
        .map_err(|e| RunnerError::Action(format!("Failed to link interpreter: {}", e)))?;

    let version_label = match request {
        PythonRequest::PyPy(_) => format!("pypy{}", interpreter.version),
        PythonRequest::CPython(_) => interpreter.version.clone(),
    };

    info!("Using {} for python-version {}", interpreter.path.display(), spec);

    let python_path = interpreter.path.to_string_lossy().into_owned();
    Ok(ActionResult {
        logs: format!("Successfully set up {} ({})\n", version_label, python_path),
        outputs: HashMap::from([
            ("python-version".to_string(), version_label),
            ("python-path".to_string(), python_path),
        ]),
        env: HashMap::from([(
            "pythonLocation".to_string(),
            location.to_string_lossy().into_owned(),
        )]),
        path: vec![shim_dir, bin_dir],
    })
}

fn parse_status(status: &str) -> Option<JobStatus> {
    match status.trim().to_ascii_lowercase().as_str() {
        "success" => Some(JobStatus::Success),
        "failure" => Some(JobStatus::Failure),
        "cancelled" => Some(JobStatus::Cancelled),
        "skipped" => Some(JobStatus::Skipped),
        _ => None,
    }
}

async fn slack_notify(ctx: &ActionContext<'_>) -> Result<ActionResult, RunnerError> {
    let non_empty = |value: Option<&String>| value.filter(|v| !v.trim().is_empty()).cloned();

    let webhook = non_empty(ctx.inputs.get("webhook_url"))
        .or_else(|| non_empty(ctx.env.get("SLACK_WEBHOOK_URL")))
        .or_else(|| non_empty(ctx.env.get("SLACK_WEBHOOK")))
        .ok_or(RunnerError::Notify(NotifyError::MissingWebhook))?;

    let status = ctx
        .inputs
        .get("status")
        .and_then(|s| parse_status(s))
        .unwrap_or(ctx.expr.job_status);

    let mut payload = NotificationPayload::from_context(ctx.expr).with_status(status);
    if let Some(author) = non_empty(ctx.inputs.get("author_name")) {
        payload = payload.with_author(author);
    }
    if let Some(text) = non_empty(ctx.inputs.get("text"))
        .or_else(|| non_empty(ctx.inputs.get("message")))
        .or_else(|| non_empty(ctx.env.get("SLACK_MESSAGE")))
    {
        payload = payload.with_text(text);
    }

    ctx.notifier.notify(&webhook, &payload).await?;

    Ok(ActionResult {
        logs: format!("Notification sent ({})\n", status.as_str()),
        ..Default::default()
    })
}
