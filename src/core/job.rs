//! Job domain model

use crate::core::{
    condition::Condition,
    config::{string_map, JobConfig, RunDefaults},
    matrix::{Matrix, MatrixCell},
    state::JobStatus,
    step::Step,
};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;

/// A job: a list of steps run once per matrix cell
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,

    pub name: Option<String>,

    /// `runs-on` labels, possibly templated (`${{ matrix.os }}`)
    pub runs_on: Vec<String>,

    /// Jobs that must finish successfully first
    pub needs: Vec<String>,

    /// Job-level `if:`, evaluated once before the matrix expands
    pub condition: Condition,

    pub env: HashMap<String, String>,

    pub matrix: Matrix,

    /// Cancel sibling cells after the first failing cell
    pub fail_fast: bool,

    pub max_parallel: Option<usize>,

    /// Bound on each cell's total run time
    pub timeout: Option<Duration>,

    pub continue_on_error: bool,

    pub steps: Vec<Step>,
}

impl Job {
    pub fn from_config(id: &str, config: &JobConfig, defaults: &RunDefaults) -> Result<Self> {
        let steps = config
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                Step::from_config(step, defaults)
                    .with_context(|| format!("Invalid step #{} in job '{}'", index + 1, id))
            })
            .collect::<Result<Vec<_>>>()?;

        let strategy = config.strategy.as_ref();
        let matrix = match strategy.and_then(|s| s.matrix.as_ref()) {
            Some(mapping) => Matrix::from_mapping(mapping)?,
            None => Matrix::default(),
        };

        let condition = match &config.condition {
            Some(source) => Condition::parse(source)?,
            None => Condition::default(),
        };

        Ok(Job {
            id: id.to_string(),
            name: config.name.clone(),
            runs_on: config.runs_on.to_labels(),
            needs: config.needs.as_ref().map(|n| n.to_vec()).unwrap_or_default(),
            condition,
            env: string_map(&config.env)?,
            matrix,
            fail_fast: strategy.map(|s| s.fail_fast).unwrap_or(true),
            max_parallel: strategy.and_then(|s| s.max_parallel),
            timeout: config.timeout_minutes.map(|m| Duration::from_secs(m * 60)),
            continue_on_error: config.continue_on_error,
            steps,
        })
    }

    /// Expanded matrix cells, at least one
    pub fn cells(&self) -> Vec<MatrixCell> {
        self.matrix.expand()
    }

    /// Name shown for one cell, e.g. `build (ubuntu-latest, 3.9)`
    pub fn display_name(&self, cell: &MatrixCell) -> String {
        let base = self.name.as_deref().unwrap_or(&self.id);
        if cell.is_empty() {
            base.to_string()
        } else {
            format!("{} {}", base, cell.label())
        }
    }

    /// Check if all needed jobs have a recorded result
    pub fn dependencies_met(&self, finished: &HashMap<String, JobStatus>) -> bool {
        self.needs.iter().all(|dep| finished.contains_key(dep))
    }

    /// Combined status of the needed jobs
    ///
    /// Any failure wins, then cancellation, then skip.
    pub fn needs_status(&self, finished: &HashMap<String, JobStatus>) -> JobStatus {
        JobStatus::aggregate(self.needs.iter().filter_map(|dep| finished.get(dep).copied()))
    }
}
