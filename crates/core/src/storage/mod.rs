pub mod index;
pub mod memory;

pub use index::RedbExecutionStore;
pub use memory::InMemoryExecutionStore;

use crate::tracker::ExecutionSummary;
use crate::types::{Execution, ExecutionId, ExecutionStatus, WorkflowId};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Durable view of an execution, written by periodic checkpoints and once more
/// when the execution is finalized
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub steps_completed: u32,
    pub steps_failed: u32,
    pub steps_skipped: u32,
    pub steps_total: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Only present on the final snapshot
    pub summary: Option<ExecutionSummary>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionSnapshot {
    /// Partial snapshot of the live counters
    pub fn from_execution(execution: &Execution) -> Self {
        Self {
            execution_id: execution.execution_id,
            workflow_id: execution.workflow_id.clone(),
            status: execution.status,
            steps_completed: execution.steps_completed,
            steps_failed: execution.steps_failed,
            steps_skipped: execution.steps_skipped,
            steps_total: execution.steps_total,
            started_at: execution.started_at,
            completed_at: execution.completed_at,
            summary: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_summary(mut self, summary: ExecutionSummary) -> Self {
        self.summary = Some(summary);
        self
    }
}

/// Persistence collaborator for execution snapshots
#[async_trait::async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Insert or replace the snapshot for `snapshot.execution_id`
    async fn upsert_snapshot(&self, snapshot: ExecutionSnapshot) -> Result<()>;

    /// Latest snapshot of an execution, if any was written
    async fn get_snapshot(&self, execution_id: ExecutionId) -> Result<Option<ExecutionSnapshot>>;
}
