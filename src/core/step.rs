//! Step domain model

use crate::core::{
    condition::Condition,
    config::{string_map, RunDefaults, StepConfig},
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;

/// What a step does
#[derive(Debug, Clone, PartialEq)]
pub enum StepAction {
    /// Shell script; `shell` overrides the runner's default shell
    Run {
        script: String,
        shell: Option<String>,
    },
    /// Action reference with its raw (unrendered) inputs
    Uses {
        action_ref: String,
        with: HashMap<String, String>,
    },
}

/// A single step in a job
#[derive(Debug, Clone)]
pub struct Step {
    /// Optional identifier used by `steps.<id>.*`
    pub id: Option<String>,

    /// Display name (may contain `${{ }}` templates)
    pub name: String,

    pub action: StepAction,

    /// Step env, rendered right before the step runs
    pub env: HashMap<String, String>,

    pub condition: Condition,

    pub continue_on_error: bool,

    pub timeout: Option<Duration>,

    pub working_directory: Option<String>,
}

impl Step {
    /// Create a step from a step config
    pub fn from_config(config: &StepConfig, defaults: &RunDefaults) -> Result<Self> {
        let action = match (&config.uses, &config.run) {
            (Some(uses), None) => StepAction::Uses {
                action_ref: uses.clone(),
                with: string_map(&config.with)?,
            },
            (None, Some(run)) => StepAction::Run {
                script: run.clone(),
                shell: config.shell.clone().or_else(|| defaults.shell.clone()),
            },
            _ => anyhow::bail!("Step needs exactly one of 'uses' or 'run'"),
        };

        let condition = match &config.condition {
            Some(source) => Condition::parse(source)
                .with_context(|| format!("Invalid condition '{}'", source))?,
            None => Condition::default(),
        };

        let name = config
            .name
            .clone()
            .unwrap_or_else(|| default_name(&action));

        let working_directory = match action {
            StepAction::Run { .. } => config
                .working_directory
                .clone()
                .or_else(|| defaults.working_directory.clone()),
            StepAction::Uses { .. } => None,
        };

        Ok(Step {
            id: config.id.clone(),
            name,
            action,
            env: string_map(&config.env)?,
            condition,
            continue_on_error: config.continue_on_error,
            timeout: config.timeout_minutes.map(|m| Duration::from_secs(m * 60)),
            working_directory,
        })
    }

}

/// Hosted-CI style default names: `Run <first line>` or `Run <action>`
fn default_name(action: &StepAction) -> String {
    match action {
        StepAction::Run { script, .. } => {
            let first = script.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
            format!("Run {}", first.trim())
        }
        StepAction::Uses { action_ref, .. } => format!("Run {}", action_ref),
    }
}
