//! Read-side helpers for reporting code that has no live tracker.

use crate::storage::ExecutionStore;
use crate::types::{compute_progress, ExecutionId, ExecutionStatus, WorkflowId};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted status of an execution with its derived progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatusReport {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub progress: u8,
    pub steps_total: u32,
    pub steps_completed: u32,
    pub steps_failed: u32,
    pub steps_skipped: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Status of an execution as last persisted, `None` if it was never written
pub async fn execution_status(
    store: &dyn ExecutionStore,
    execution_id: ExecutionId,
) -> Result<Option<ExecutionStatusReport>> {
    let Some(snapshot) = store.get_snapshot(execution_id).await? else {
        return Ok(None);
    };

    let finished = snapshot.steps_completed + snapshot.steps_failed + snapshot.steps_skipped;

    Ok(Some(ExecutionStatusReport {
        execution_id: snapshot.execution_id,
        workflow_id: snapshot.workflow_id,
        status: snapshot.status,
        progress: compute_progress(finished, snapshot.steps_total),
        steps_total: snapshot.steps_total,
        steps_completed: snapshot.steps_completed,
        steps_failed: snapshot.steps_failed,
        steps_skipped: snapshot.steps_skipped,
        started_at: snapshot.started_at,
        completed_at: snapshot.completed_at,
    }))
}

/// True while the execution is `PENDING` or `RUNNING`; false once terminal or
/// when nothing was persisted for it
pub async fn is_execution_running(
    store: &dyn ExecutionStore,
    execution_id: ExecutionId,
) -> Result<bool> {
    Ok(store
        .get_snapshot(execution_id)
        .await?
        .is_some_and(|s| !s.status.is_terminal()))
}
