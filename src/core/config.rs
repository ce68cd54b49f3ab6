//! Workflow configuration from YAML

use crate::core::{
    condition::Condition,
    matrix::{scalar_to_string, Matrix},
    trigger::Trigger,
    Workflow,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Top-level workflow file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Workflow name (defaults to the file stem)
    #[serde(default)]
    pub name: Option<String>,

    /// Trigger definition in any of its YAML forms
    #[serde(default)]
    pub on: Value,

    /// Workflow-wide environment
    #[serde(default)]
    pub env: HashMap<String, Value>,

    /// Defaults for `run` steps
    #[serde(default)]
    pub defaults: Option<DefaultsConfig>,

    /// Jobs, in declaration order
    pub jobs: Mapping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub run: Option<RunDefaults>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunDefaults {
    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,
}

/// `runs-on` accepts one label or a list of labels
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    Single(String),
    List(Vec<String>),
}

impl RunsOn {
    pub fn to_labels(&self) -> Vec<String> {
        match self {
            RunsOn::Single(s) => vec![s.clone()],
            RunsOn::List(v) => v.clone(),
        }
    }
}

/// `needs` accepts one job id or a list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobNeeds {
    Single(String),
    List(Vec<String>),
}

impl JobNeeds {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            JobNeeds::Single(s) => vec![s.clone()],
            JobNeeds::List(v) => v.clone(),
        }
    }
}

/// A job as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "runs-on")]
    pub runs_on: RunsOn,

    #[serde(default)]
    pub needs: Option<JobNeeds>,

    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    #[serde(default)]
    pub env: HashMap<String, Value>,

    #[serde(default)]
    pub strategy: Option<StrategyConfig>,

    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,

    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,

    pub steps: Vec<StepConfig>,
}

/// `strategy:` block
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub matrix: Option<Mapping>,

    #[serde(default = "default_fail_fast", rename = "fail-fast")]
    pub fail_fast: bool,

    #[serde(default, rename = "max-parallel")]
    pub max_parallel: Option<usize>,
}

fn default_fail_fast() -> bool {
    true
}

/// A step as written in YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepConfig {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Action reference, e.g. `actions/setup-python@v4`
    #[serde(default)]
    pub uses: Option<String>,

    /// Action inputs
    #[serde(default)]
    pub with: HashMap<String, Value>,

    /// Shell script
    #[serde(default)]
    pub run: Option<String>,

    #[serde(default)]
    pub shell: Option<String>,

    #[serde(default)]
    pub env: HashMap<String, Value>,

    #[serde(default, rename = "if")]
    pub condition: Option<String>,

    #[serde(default, rename = "working-directory")]
    pub working_directory: Option<String>,

    #[serde(default, rename = "continue-on-error")]
    pub continue_on_error: bool,

    #[serde(default, rename = "timeout-minutes")]
    pub timeout_minutes: Option<u64>,
}

/// Convert a YAML env/with map to strings
pub fn string_map(map: &HashMap<String, Value>) -> Result<HashMap<String, String>> {
    map.iter()
        .map(|(k, v)| {
            scalar_to_string(v)
                .map(|s| (k.clone(), s))
                .with_context(|| format!("Value for '{}' must be a scalar", k))
        })
        .collect()
}

impl WorkflowConfig {
    /// Load workflow configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;
        let mut config = Self::from_yaml(&content)?;
        if config.name.is_none() {
            config.name = path
                .file_stem()
                .and_then(|s| s.to_str())
                .map(str::to_string);
        }
        Ok(config)
    }

    /// Parse workflow configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WorkflowConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Workflow name, or a placeholder when the file gave none
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("workflow")
    }

    /// Parse the jobs mapping, keeping declaration order
    pub fn jobs(&self) -> Result<Vec<(String, JobConfig)>> {
        self.jobs
            .iter()
            .map(|(key, value)| {
                let id = key
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("Job ids must be strings"))?
                    .to_string();
                let job: JobConfig = serde_yaml::from_value(value.clone())
                    .with_context(|| format!("Invalid job '{}'", id))?;
                Ok((id, job))
            })
            .collect()
    }

    /// Validate the workflow configuration
    pub fn validate(&self) -> Result<()> {
        Trigger::from_value(&self.on).context("Invalid 'on' section")?;
        string_map(&self.env).context("Invalid workflow env")?;

        let jobs = self.jobs()?;
        if jobs.is_empty() {
            anyhow::bail!("Workflow defines no jobs");
        }

        let job_ids: HashSet<&str> = jobs.iter().map(|(id, _)| id.as_str()).collect();

        for (job_id, job) in &jobs {
            if job.steps.is_empty() {
                anyhow::bail!("Job '{}' has no steps", job_id);
            }

            if let Some(needs) = &job.needs {
                for dep in needs.to_vec() {
                    if !job_ids.contains(dep.as_str()) {
                        anyhow::bail!("Job '{}' needs non-existent job '{}'", job_id, dep);
                    }
                }
            }

            if let Some(condition) = &job.condition {
                Condition::parse(condition)
                    .with_context(|| format!("Job '{}' has an invalid 'if' condition", job_id))?;
            }

            if let Some(matrix) = job.strategy.as_ref().and_then(|s| s.matrix.as_ref()) {
                Matrix::from_mapping(matrix)
                    .with_context(|| format!("Job '{}' has an invalid matrix", job_id))?;
            }

            if job.strategy.as_ref().and_then(|s| s.max_parallel) == Some(0) {
                anyhow::bail!("Job '{}' has max-parallel of 0", job_id);
            }

            string_map(&job.env).with_context(|| format!("Invalid env in job '{}'", job_id))?;

            let mut seen_step_ids = HashSet::new();
            for (index, step) in job.steps.iter().enumerate() {
                let label = step
                    .id
                    .clone()
                    .or_else(|| step.name.clone())
                    .unwrap_or_else(|| format!("#{}", index + 1));

                match (&step.uses, &step.run) {
                    (Some(_), Some(_)) => anyhow::bail!(
                        "Step '{}' in job '{}' has both 'uses' and 'run'",
                        label,
                        job_id
                    ),
                    (None, None) => anyhow::bail!(
                        "Step '{}' in job '{}' needs either 'uses' or 'run'",
                        label,
                        job_id
                    ),
                    _ => {}
                }

                if let Some(id) = &step.id {
                    if !seen_step_ids.insert(id.as_str()) {
                        anyhow::bail!("Duplicate step ID '{}' in job '{}'", id, job_id);
                    }
                }

                if let Some(condition) = &step.condition {
                    Condition::parse(condition).with_context(|| {
                        format!(
                            "Step '{}' in job '{}' has an invalid 'if' condition",
                            label, job_id
                        )
                    })?;
                }

                string_map(&step.env).with_context(|| {
                    format!("Invalid env in step '{}' of job '{}'", label, job_id)
                })?;
                string_map(&step.with).with_context(|| {
                    format!("Invalid inputs in step '{}' of job '{}'", label, job_id)
                })?;
            }
        }

        self.check_cycles(&jobs)?;

        Ok(())
    }

    /// Check for cycles in the `needs` graph
    fn check_cycles(&self, jobs: &[(String, JobConfig)]) -> Result<()> {
        let mut visited = HashSet::new();
        let mut recursion_stack = HashSet::new();

        for (job_id, _) in jobs {
            if !visited.contains(job_id) {
                Self::dfs_check(job_id, jobs, &mut visited, &mut recursion_stack)?;
            }
        }

        Ok(())
    }

    fn dfs_check(
        job_id: &str,
        jobs: &[(String, JobConfig)],
        visited: &mut HashSet<String>,
        recursion_stack: &mut HashSet<String>,
    ) -> Result<()> {
        visited.insert(job_id.to_string());
        recursion_stack.insert(job_id.to_string());

        if let Some((_, job)) = jobs.iter().find(|(id, _)| id == job_id) {
            for dep in job.needs.as_ref().map(JobNeeds::to_vec).unwrap_or_default() {
                if recursion_stack.contains(&dep) {
                    anyhow::bail!("Cycle detected in job dependencies involving '{}'", dep);
                }
                if !visited.contains(&dep) {
                    Self::dfs_check(&dep, jobs, visited, recursion_stack)?;
                }
            }
        }

        recursion_stack.remove(job_id);
        Ok(())
    }

    /// Convert config to a Workflow domain model
    pub fn to_workflow(&self) -> Result<Workflow> {
        Workflow::from_config(self)
    }
}
