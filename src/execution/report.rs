//! Results of a workflow run

use crate::core::{
    matrix::MatrixCell,
    state::{ExecutionStatus, JobStatus, StepState},
    trigger::Event,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One step as it ran in one cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub id: Option<String>,
    /// Rendered display name
    pub name: String,
    pub state: StepState,
    /// Captured output with secrets masked
    pub logs: String,
}

/// One matrix cell of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellReport {
    pub job_id: String,
    /// Display name, e.g. `build (ubuntu-latest, 3.9)`
    pub name: String,
    pub cell: MatrixCell,
    pub status: JobStatus,
    /// Why the cell was skipped or cancelled before running
    pub reason: Option<String>,
    pub steps: Vec<StepReport>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CellReport {
    /// A cell that never ran
    pub fn not_run(
        job_id: &str,
        name: String,
        cell: MatrixCell,
        status: JobStatus,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.to_string(),
            name,
            cell,
            status,
            reason: Some(reason.into()),
            steps: Vec::new(),
            started_at: None,
            completed_at: None,
        }
    }

    /// First step that failed the cell
    pub fn failed_step(&self) -> Option<&StepReport> {
        self.steps
            .iter()
            .find(|s| matches!(s.state, StepState::Failed { .. }))
    }
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub execution_id: Uuid,
    pub workflow: String,
    pub event: Event,
    pub status: ExecutionStatus,
    pub cells: Vec<CellReport>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunReport {
    pub fn cells_with(&self, status: JobStatus) -> usize {
        self.cells.iter().filter(|c| c.status == status).count()
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.status, ExecutionStatus::Completed | ExecutionStatus::Skipped)
    }

    /// Cells of one job, in matrix order
    pub fn job_cells(&self, job_id: &str) -> Vec<&CellReport> {
        self.cells.iter().filter(|c| c.job_id == job_id).collect()
    }

    /// Find a cell by job id and matrix label, e.g. `("build", "(ubuntu-latest, 3.9)")`
    pub fn cell(&self, job_id: &str, label: &str) -> Option<&CellReport> {
        self.cells
            .iter()
            .find(|c| c.job_id == job_id && c.cell.label() == label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(job: &str, python: &str, status: JobStatus) -> CellReport {
        let cell = MatrixCell {
            values: vec![("python-version".to_string(), python.to_string())],
        };
        CellReport::not_run(job, format!("{} {}", job, cell.label()), cell, status, "test")
    }

    #[test]
    fn test_report_queries() {
        let report = RunReport {
            execution_id: Uuid::new_v4(),
            workflow: "tests".to_string(),
            event: Event::push("main"),
            status: ExecutionStatus::Failed,
            cells: vec![
                cell("build", "3.8", JobStatus::Success),
                cell("build", "3.9", JobStatus::Failure),
                cell("docs", "3.9", JobStatus::Skipped),
            ],
            started_at: None,
            completed_at: None,
        };

        assert!(!report.succeeded());
        assert_eq!(report.cells_with(JobStatus::Success), 1);
        assert_eq!(report.job_cells("build").len(), 2);
        assert_eq!(report.cell("build", "(3.9)").unwrap().status, JobStatus::Failure);
        assert!(report.cell("build", "(3.7)").is_none());
    }
}
