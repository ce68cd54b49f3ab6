//! Persistence layer for workflow run history

#[cfg(feature = "sqlite")]
pub mod store;

#[cfg(feature = "sqlite")]
pub use store::SqliteExecutionStore;

pub use crate::core::ExecutionStatus;
use crate::core::JobStatus;
use crate::execution::RunReport;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Summary of one workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    /// Unique execution ID
    pub execution_id: Uuid,

    /// Workflow name
    pub workflow_name: String,

    /// Event name, e.g. `push`
    pub event: String,

    /// Ref the event pointed at
    pub git_ref: String,

    /// Execution status
    pub status: ExecutionStatus,

    /// When execution started
    pub started_at: DateTime<Utc>,

    /// When execution completed (if complete)
    pub completed_at: Option<DateTime<Utc>>,

    pub total_cells: usize,
    pub succeeded_cells: usize,
    pub failed_cells: usize,
}

impl ExecutionSummary {
    /// Summarize a finished run
    pub fn from_report(report: &RunReport) -> Self {
        Self {
            execution_id: report.execution_id,
            workflow_name: report.workflow.clone(),
            event: report.event.kind.to_string(),
            git_ref: report.event.git_ref.clone(),
            status: report.status,
            started_at: report.started_at.or(report.completed_at).unwrap_or_else(Utc::now),
            completed_at: report.completed_at,
            total_cells: report.cells.len(),
            succeeded_cells: report.cells_with(JobStatus::Success),
            failed_cells: report.cells_with(JobStatus::Failure),
        }
    }
}

/// Trait for persistence backends
#[async_trait::async_trait]
pub trait PersistenceBackend: Send + Sync {
    /// Save a workflow run
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()>;

    /// Load a run by ID
    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>>;

    /// Most recent runs first, optionally for one workflow only
    async fn list_executions(
        &self,
        workflow_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>>;

    /// List all workflow names with recorded runs
    async fn list_workflows(&self) -> Result<Vec<String>>;
}

/// In-memory persistence (for testing or ephemeral use)
pub struct InMemoryPersistence {
    executions: tokio::sync::RwLock<Vec<ExecutionSummary>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self {
            executions: tokio::sync::RwLock::new(Vec::new()),
        }
    }
}

impl Default for InMemoryPersistence {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PersistenceBackend for InMemoryPersistence {
    async fn save_execution(&self, execution: &ExecutionSummary) -> Result<()> {
        let mut execs = self.executions.write().await;
        execs.retain(|e| e.execution_id != execution.execution_id);
        execs.push(execution.clone());
        Ok(())
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<Option<ExecutionSummary>> {
        let execs = self.executions.read().await;
        Ok(execs.iter().find(|e| e.execution_id == execution_id).cloned())
    }

    async fn list_executions(
        &self,
        workflow_name: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ExecutionSummary>> {
        let execs = self.executions.read().await;
        let mut result: Vec<ExecutionSummary> = execs
            .iter()
            .filter(|e| workflow_name.map_or(true, |name| e.workflow_name == name))
            .cloned()
            .collect();
        result.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn list_workflows(&self) -> Result<Vec<String>> {
        let execs = self.executions.read().await;
        let mut names: Vec<String> = execs.iter().map(|e| e.workflow_name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

/// History store at the default location
#[cfg(feature = "sqlite")]
pub async fn default_store() -> Result<std::sync::Arc<dyn PersistenceBackend>> {
    Ok(std::sync::Arc::new(SqliteExecutionStore::with_default_path().await?))
}

/// Without sqlite, history lives only as long as the process
#[cfg(not(feature = "sqlite"))]
pub async fn default_store() -> Result<std::sync::Arc<dyn PersistenceBackend>> {
    Ok(std::sync::Arc::new(InMemoryPersistence::new()))
}

/// Parse a status as stored by `format!("{:?}", status)`
pub fn parse_status(value: &str) -> ExecutionStatus {
    match value {
        "Running" => ExecutionStatus::Running,
        "Completed" => ExecutionStatus::Completed,
        "Failed" => ExecutionStatus::Failed,
        "Cancelled" => ExecutionStatus::Cancelled,
        "Skipped" => ExecutionStatus::Skipped,
        _ => ExecutionStatus::Pending,
    }
}
