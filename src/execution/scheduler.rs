//! Execution scheduler - determines which jobs run next and how many cells at once

use crate::core::{Job, Workflow};
use std::str::FromStr;

/// Strategy for running matrix cells
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingStrategy {
    /// Run cells one at a time
    Sequential,

    /// Run all cells of a job at once
    Parallel,

    /// Limited parallelism (max N concurrent cells)
    LimitedParallel(usize),
}

impl Default for SchedulingStrategy {
    fn default() -> Self {
        SchedulingStrategy::Sequential
    }
}

impl FromStr for SchedulingStrategy {
    type Err = String;

    /// `sequential`, `parallel`, or a number for limited parallelism
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" => Ok(SchedulingStrategy::Sequential),
            "parallel" => Ok(SchedulingStrategy::Parallel),
            other => match other.parse::<usize>() {
                Ok(0) => Err("parallelism must be at least 1".to_string()),
                Ok(n) => Ok(SchedulingStrategy::LimitedParallel(n)),
                Err(_) => Err(format!(
                    "unknown strategy '{}' (expected sequential, parallel, or a number)",
                    s
                )),
            },
        }
    }
}

/// Scheduler for jobs and their cells
#[derive(Debug, Clone)]
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    /// Get the next batch of jobs to execute, in execution order
    pub fn next_jobs(&self, workflow: &Workflow) -> Vec<String> {
        let ready = workflow.ready_jobs().into_iter().map(|j| j.id.clone());
        match self.strategy {
            SchedulingStrategy::Sequential => ready.take(1).collect(),
            _ => ready.collect(),
        }
    }

    /// How many cells of `job` may run at once
    pub fn cell_concurrency(&self, job: &Job, cells: usize) -> usize {
        let limit = match self.strategy {
            SchedulingStrategy::Sequential => 1,
            SchedulingStrategy::Parallel => cells,
            SchedulingStrategy::LimitedParallel(max) => max.min(cells),
        };
        let limit = match job.max_parallel {
            Some(max) => limit.min(max),
            None => limit,
        };
        limit.max(1)
    }
}
