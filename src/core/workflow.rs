//! Workflow domain model

use crate::core::{
    config::{string_map, WorkflowConfig},
    job::Job,
    state::{JobStatus, RunState},
    trigger::Trigger,
};
use anyhow::Result;
use std::collections::{HashMap, HashSet};

/// A workflow definition plus its run state
#[derive(Debug, Clone)]
pub struct Workflow {
    /// Workflow name
    pub name: String,

    pub trigger: Trigger,

    /// Workflow-wide environment
    pub env: HashMap<String, String>,

    /// Jobs in declaration order
    pub jobs: Vec<Job>,

    /// Execution state
    pub state: RunState,

    /// Aggregated result of every finished job
    job_results: HashMap<String, JobStatus>,

    /// Job execution order (topological over `needs`)
    execution_order: Vec<String>,
}

impl Workflow {
    /// Create a workflow from configuration
    pub fn from_config(config: &WorkflowConfig) -> Result<Self> {
        let defaults = config
            .defaults
            .as_ref()
            .and_then(|d| d.run.clone())
            .unwrap_or_default();

        let jobs = config
            .jobs()?
            .iter()
            .map(|(id, job)| Job::from_config(id, job, &defaults))
            .collect::<Result<Vec<_>>>()?;

        let execution_order = Self::topological_sort(&jobs);

        Ok(Workflow {
            name: config.display_name().to_string(),
            trigger: Trigger::from_value(&config.on)?,
            env: string_map(&config.env)?,
            jobs,
            state: RunState::new(),
            job_results: HashMap::new(),
            execution_order,
        })
    }

    /// Get a job by ID
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    /// Keep only `job_id` and everything it needs
    pub fn retain_job(&mut self, job_id: &str) -> Result<()> {
        if self.job(job_id).is_none() {
            anyhow::bail!("Job '{}' not found in workflow '{}'", job_id, self.name);
        }

        let mut keep = HashSet::new();
        let mut pending = vec![job_id.to_string()];
        while let Some(id) = pending.pop() {
            if keep.insert(id.clone()) {
                if let Some(job) = self.job(&id) {
                    pending.extend(job.needs.iter().cloned());
                }
            }
        }

        self.jobs.retain(|j| keep.contains(&j.id));
        self.execution_order.retain(|id| keep.contains(id));
        Ok(())
    }

    /// Record the combined result of a job's cells
    pub fn record_job(&mut self, job_id: &str, status: JobStatus) {
        self.job_results.insert(job_id.to_string(), status);
    }

    pub fn job_results(&self) -> &HashMap<String, JobStatus> {
        &self.job_results
    }

    /// Jobs not yet run whose needs have all finished
    pub fn ready_jobs(&self) -> Vec<&Job> {
        self.execution_order
            .iter()
            .filter_map(|id| self.job(id))
            .filter(|j| {
                !self.job_results.contains_key(&j.id) && j.dependencies_met(&self.job_results)
            })
            .collect()
    }

    /// Check if every job has a result
    pub fn is_complete(&self) -> bool {
        self.jobs.iter().all(|j| self.job_results.contains_key(&j.id))
    }

    /// Get execution order (topological sort)
    pub fn execution_order(&self) -> &[String] {
        &self.execution_order
    }

    /// Topological sort over `needs`, ties broken by declaration order
    fn topological_sort(jobs: &[Job]) -> Vec<String> {
        let mut result = Vec::new();
        let mut visited = HashSet::new();

        for job in jobs {
            Self::visit(&job.id, jobs, &mut visited, &mut result);
        }

        result
    }

    fn visit(job_id: &str, jobs: &[Job], visited: &mut HashSet<String>, result: &mut Vec<String>) {
        // Cycles are rejected during validation
        if !visited.insert(job_id.to_string()) {
            return;
        }

        if let Some(job) = jobs.iter().find(|j| j.id == job_id) {
            for dep in &job.needs {
                Self::visit(dep, jobs, visited, result);
            }
        }

        result.push(job_id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = r#"
name: chain
on: push
jobs:
  deploy:
    runs-on: ubuntu-latest
    needs: [build, lint]
    steps: [{ run: "true" }]
  build:
    runs-on: ubuntu-latest
    steps: [{ run: "true" }]
  lint:
    runs-on: ubuntu-latest
    needs: build
    steps: [{ run: "true" }]
  docs:
    runs-on: ubuntu-latest
    steps: [{ run: "true" }]
"#;

    #[test]
    fn test_topological_sort() {
        let workflow = WorkflowConfig::from_yaml(CHAIN).unwrap().to_workflow().unwrap();
        assert_eq!(workflow.execution_order(), &["build", "lint", "deploy", "docs"]);
    }

    #[test]
    fn test_ready_jobs() {
        let mut workflow = WorkflowConfig::from_yaml(CHAIN).unwrap().to_workflow().unwrap();

        let ready: Vec<&str> = workflow.ready_jobs().iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ready, vec!["build", "docs"]);

        workflow.record_job("build", JobStatus::Success);
        let ready: Vec<&str> = workflow.ready_jobs().iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ready, vec!["lint", "docs"]);

        workflow.record_job("lint", JobStatus::Failure);
        workflow.record_job("docs", JobStatus::Success);
        let ready: Vec<&str> = workflow.ready_jobs().iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ready, vec!["deploy"]);
        assert_eq!(workflow.job_results()["lint"], JobStatus::Failure);
        assert!(!workflow.is_complete());

        workflow.record_job("deploy", JobStatus::Skipped);
        assert!(workflow.is_complete());
    }

    #[test]
    fn test_retain_job_keeps_needs() {
        let mut workflow = WorkflowConfig::from_yaml(CHAIN).unwrap().to_workflow().unwrap();
        workflow.retain_job("lint").unwrap();
        assert_eq!(workflow.execution_order(), &["build", "lint"]);
        assert!(workflow.job("docs").is_none());
        assert!(workflow.retain_job("missing").is_err());
    }
}
