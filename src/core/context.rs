//! Expression context - the data `${{ }}` expressions can see

use crate::core::{
    matrix::MatrixCell,
    state::{JobStatus, StepOutcome},
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Replacement text for secret values in logs
pub const SECRET_MASK: &str = "***";

/// Named secrets available as `secrets.NAME`
///
/// Values come from explicit configuration first, then from the process
/// environment variable of the same name.
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    values: HashMap<String, String>,
}

impl SecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an explicit secret value
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Fill in every referenced secret not set explicitly from the environment
    pub fn resolve_from_env<'a>(&mut self, names: impl IntoIterator<Item = &'a str>) {
        for name in names {
            if self.values.contains_key(name) {
                continue;
            }
            if let Ok(value) = std::env::var(name) {
                self.values.insert(name.to_string(), value);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every known secret value in `text` with `***`
    pub fn mask(&self, text: &str) -> String {
        let mut values: Vec<&str> = self
            .values
            .values()
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .collect();
        // Longest first so a secret containing another is masked whole
        values.sort_by_key(|v| std::cmp::Reverse(v.len()));

        let mut masked = text.to_string();
        for value in values {
            masked = masked.replace(value, SECRET_MASK);
        }
        masked
    }
}

/// Names referenced as `secrets.NAME` anywhere in `text`
pub fn referenced_secrets(text: &str) -> Vec<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| {
        Regex::new(r"secrets\.([A-Za-z_][A-Za-z0-9_]*)").expect("static secret pattern")
    });

    let mut names: Vec<String> = re
        .captures_iter(text)
        .map(|cap| cap[1].to_string())
        .collect();
    names.sort();
    names.dedup();
    names
}

/// Recorded result of a finished step (`steps.<id>.*`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepContext {
    pub outcome: StepOutcome,
    pub conclusion: StepOutcome,
    pub outputs: HashMap<String, String>,
}

/// Everything an expression can reference while a job cell runs
#[derive(Debug, Clone)]
pub struct ExpressionContext {
    /// Merged workflow, job and step env
    pub env: HashMap<String, String>,

    /// Current matrix cell
    pub matrix: MatrixCell,

    /// Secrets, shared across all cells of a run
    pub secrets: Arc<SecretStore>,

    /// `github.*` values (event_name, ref, ref_name, workflow, job, ...)
    pub github: HashMap<String, String>,

    /// `runner.*` values (os, arch, name, temp, workspace)
    pub runner: HashMap<String, String>,

    /// Status of the job so far; drives `success()` / `failure()`
    pub job_status: JobStatus,

    /// Finished steps with an id
    pub steps: HashMap<String, StepContext>,
}

impl ExpressionContext {
    pub fn new(secrets: Arc<SecretStore>) -> Self {
        Self {
            env: HashMap::new(),
            matrix: MatrixCell::default(),
            secrets,
            github: HashMap::new(),
            runner: HashMap::new(),
            job_status: JobStatus::Success,
            steps: HashMap::new(),
        }
    }

    /// Record a finished step so later steps can read its outcome and outputs
    pub fn record_step(&mut self, step_id: &str, step: StepContext) {
        self.steps.insert(step_id.to_string(), step);
    }

    /// Context with the given env layered on top
    pub fn with_env(&self, env: &HashMap<String, String>) -> Self {
        let mut ctx = self.clone();
        ctx.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        ctx
    }

    /// Resolve a dotted path like `matrix.python-version` or `steps.x.outputs.y`
    pub fn lookup(&self, path: &[String]) -> Option<String> {
        let (root, rest) = path.split_first()?;
        match (root.as_str(), rest) {
            ("matrix", [key]) => self.matrix.get(key).map(str::to_string),
            ("env", [key]) => self.env.get(key).cloned(),
            ("secrets", [key]) => self.secrets.get(key).map(str::to_string),
            ("github", [key]) => self.github.get(key).cloned(),
            ("runner", [key]) => self.runner.get(key).cloned(),
            ("job", [key]) if key == "status" => Some(self.job_status.as_str().to_string()),
            ("steps", [id, field]) => {
                let step = self.steps.get(id)?;
                match field.as_str() {
                    "outcome" => Some(step.outcome.as_str().to_string()),
                    "conclusion" => Some(step.conclusion.as_str().to_string()),
                    _ => None,
                }
            }
            ("steps", [id, outputs, name]) if outputs == "outputs" => {
                self.steps.get(id)?.outputs.get(name).cloned()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_masking() {
        let mut secrets = SecretStore::new();
        secrets.insert("SLACK_WEBHOOK_URL", "https://hooks.example/T000/B000/XXXX");
        secrets.insert("EMPTY", "");

        let log = "posting to https://hooks.example/T000/B000/XXXX now";
        assert_eq!(secrets.mask(log), "posting to *** now");
        assert_eq!(secrets.mask("nothing secret"), "nothing secret");
    }

    #[test]
    fn test_mask_longest_first() {
        let mut secrets = SecretStore::new();
        secrets.insert("SHORT", "abc");
        secrets.insert("LONG", "abcdef");
        assert_eq!(secrets.mask("x abcdef y abc"), "x *** y ***");
    }

    #[test]
    fn test_explicit_secret_wins_over_env() {
        let mut secrets = SecretStore::new();
        secrets.insert("PATH", "explicit");
        secrets.resolve_from_env(["PATH"]);
        assert_eq!(secrets.get("PATH"), Some("explicit"));
    }

    #[test]
    fn test_referenced_secrets() {
        let text =
            "url: ${{ secrets.SLACK_WEBHOOK_URL }} token: ${{secrets.TOKEN}} again ${{ secrets.TOKEN }}";
        assert_eq!(referenced_secrets(text), vec!["SLACK_WEBHOOK_URL", "TOKEN"]);
    }

    #[test]
    fn test_lookup_paths() {
        let mut ctx = ExpressionContext::new(Arc::new(SecretStore::new()));
        ctx.matrix = MatrixCell {
            values: vec![("python-version".to_string(), "3.9".to_string())],
        };
        ctx.env.insert("CI".to_string(), "true".to_string());
        ctx.record_step(
            "setup",
            StepContext {
                outcome: StepOutcome::Success,
                conclusion: StepOutcome::Success,
                outputs: HashMap::from([(
                    "python-path".to_string(),
                    "/usr/bin/python3.9".to_string(),
                )]),
            },
        );

        let path = |s: &str| s.split('.').map(str::to_string).collect::<Vec<_>>();
        assert_eq!(ctx.lookup(&path("matrix.python-version")), Some("3.9".to_string()));
        assert_eq!(ctx.lookup(&path("env.CI")), Some("true".to_string()));
        assert_eq!(ctx.lookup(&path("job.status")), Some("success".to_string()));
        assert_eq!(ctx.lookup(&path("steps.setup.outcome")), Some("success".to_string()));
        assert_eq!(
            ctx.lookup(&path("steps.setup.outputs.python-path")),
            Some("/usr/bin/python3.9".to_string())
        );
        assert_eq!(ctx.lookup(&path("secrets.MISSING")), None);
    }
}
