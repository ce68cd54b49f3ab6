//! Execution state models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall workflow run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    /// Run has not started
    Pending,
    /// Run is in progress
    Running,
    /// Every job cell succeeded or was skipped
    Completed,
    /// At least one job cell failed
    Failed,
    /// Run was cancelled before finishing
    Cancelled,
    /// The event did not trigger the workflow
    Skipped,
}

/// Final status of a job (one matrix cell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl JobStatus {
    /// Status string as exposed to expressions (`job.status`)
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
        }
    }

    /// Combine several statuses: failure, then cancelled, then skipped
    ///
    /// An empty set is a success.
    pub fn aggregate(statuses: impl IntoIterator<Item = JobStatus>) -> JobStatus {
        let statuses: Vec<JobStatus> = statuses.into_iter().collect();
        [JobStatus::Failure, JobStatus::Cancelled, JobStatus::Skipped]
            .into_iter()
            .find(|s| statuses.contains(s))
            .unwrap_or(JobStatus::Success)
    }
}

/// Outcome or conclusion of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Success,
    Failure,
    Cancelled,
    Skipped,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Success => "success",
            StepOutcome::Failure => "failure",
            StepOutcome::Cancelled => "cancelled",
            StepOutcome::Skipped => "skipped",
        }
    }
}

/// State of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StepState {
    /// Step has not been reached yet
    Pending,
    /// Step is currently running
    Running {
        started_at: DateTime<Utc>,
    },
    /// Step finished and did not fail the job
    ///
    /// `outcome` is `failure` when `continue-on-error` swallowed a failure.
    Completed {
        outcome: StepOutcome,
        exit_code: Option<i32>,
        started_at: DateTime<Utc>,
        completed_at: DateTime<Utc>,
    },
    /// Step failed and failed the job with it
    Failed {
        error: String,
        exit_code: Option<i32>,
        started_at: DateTime<Utc>,
        failed_at: DateTime<Utc>,
    },
    /// Step condition evaluated to false, or the job was cancelled
    Skipped {
        reason: String,
    },
}

impl StepState {
    /// Check if step is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StepState::Completed { .. } | StepState::Failed { .. } | StepState::Skipped { .. }
        )
    }

    /// `steps.<id>.outcome`: result before `continue-on-error` is applied
    pub fn outcome(&self) -> Option<StepOutcome> {
        match self {
            StepState::Completed { outcome, .. } => Some(*outcome),
            StepState::Failed { .. } => Some(StepOutcome::Failure),
            StepState::Skipped { .. } => Some(StepOutcome::Skipped),
            _ => None,
        }
    }

    /// `steps.<id>.conclusion`: result after `continue-on-error` is applied
    pub fn conclusion(&self) -> Option<StepOutcome> {
        match self {
            StepState::Completed { .. } => Some(StepOutcome::Success),
            StepState::Failed { .. } => Some(StepOutcome::Failure),
            StepState::Skipped { .. } => Some(StepOutcome::Skipped),
            _ => None,
        }
    }
}

/// Overall run state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Current execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: Option<DateTime<Utc>>,

    /// When execution completed/failed
    pub completed_at: Option<DateTime<Utc>>,

    /// Total number of job cells (matrix expanded)
    pub total_cells: usize,

    /// Cells that finished with success
    pub succeeded_cells: usize,

    /// Cells that finished with failure
    pub failed_cells: usize,

    /// Cells that were cancelled or skipped
    pub skipped_cells: usize,
}

impl RunState {
    pub fn new() -> Self {
        Self {
            execution_id: Uuid::new_v4(),
            status: ExecutionStatus::Pending,
            started_at: None,
            completed_at: None,
            total_cells: 0,
            succeeded_cells: 0,
            failed_cells: 0,
            skipped_cells: 0,
        }
    }

    /// Mark run as started
    pub fn start(&mut self) {
        self.status = ExecutionStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Mark run as completed
    pub fn complete(&mut self) {
        self.status = ExecutionStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark run as failed
    pub fn fail(&mut self) {
        self.status = ExecutionStatus::Failed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark run as not triggered
    pub fn skip(&mut self) {
        self.status = ExecutionStatus::Skipped;
        self.completed_at = Some(Utc::now());
    }

    /// Account for a finished cell
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Success => self.succeeded_cells += 1,
            JobStatus::Failure => self.failed_cells += 1,
            JobStatus::Cancelled | JobStatus::Skipped => self.skipped_cells += 1,
        }
    }

    /// Calculate progress (0.0 to 1.0)
    pub fn progress(&self) -> f64 {
        if self.total_cells == 0 {
            return 0.0;
        }
        (self.succeeded_cells + self.failed_cells + self.skipped_cells) as f64
            / self.total_cells as f64
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
