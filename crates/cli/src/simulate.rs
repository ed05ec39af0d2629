use anyhow::{Context, Result};
use forgeflow_core::storage::ExecutionStore;
use forgeflow_core::workflow::WorkflowDag;
use forgeflow_core::{
    ExecutionId, ExecutionState, ExecutionStatus, ExecutionTracker, StepKey, StepPayload,
    TrackerConfig, WorkflowId, WorkflowStep,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// Workflow definition file accepted by the CLI (JSON or TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowFile {
    pub workflow_id: String,
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read workflow file {}", path.display()))?;

        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        if is_toml {
            toml::from_str(&content).context("Failed to parse TOML workflow file")
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON workflow file")
        }
    }
}

/// Drive a tracker through the workflow in dependency order.
///
/// Steps listed in `fail` are failed instead of completed; every step that
/// depends on a failed or skipped step is skipped.
pub async fn simulate(
    workflow: &WorkflowFile,
    store: Arc<dyn ExecutionStore>,
    config: TrackerConfig,
    fail: &HashSet<StepKey>,
) -> Result<ExecutionState> {
    let dag = WorkflowDag::build(&workflow.steps).context("Workflow failed validation")?;

    let tracker = ExecutionTracker::new(
        ExecutionId::new(),
        WorkflowId::new(workflow.workflow_id.clone()),
        store,
        config,
    );

    tracker.on_step_status_change(|e| {
        tracing::info!(
            "Step {}: {} -> {}",
            e.step_key,
            e.previous_status,
            e.current_status
        );
    });

    tracker.initialize(&workflow.steps);
    tracker.start()?;

    let mut completed: HashSet<StepKey> = HashSet::new();

    for step in dag.topological_order() {
        let key = &step.step_key;

        // Dependencies come first in topological order, so a step that cannot
        // run here has a failed or skipped dependency
        if !dag.can_execute(key, &completed) {
            tracing::info!("Skipping step {} due to failed dependencies", key);
            tracker.skip_step(key, Some("Dependency failed".to_string()))?;
            continue;
        }

        tracker.start_step(key)?;

        if fail.contains(key) {
            tracker.fail_step(key, "Simulated failure")?;
            let blocked = dag.dependents(key).unwrap_or_default();
            if !blocked.is_empty() {
                let blocked: Vec<&str> = blocked.iter().map(|k| k.as_str()).collect();
                tracing::warn!("Step {} failed; blocking {}", key, blocked.join(", "));
            }
        } else {
            let output = StepPayload(serde_json::json!({ "step": key.as_str() }));
            tracker.complete_step(key, Some(output))?;
            completed.insert(key.clone());
        }
    }

    let status = if tracker.state().execution.steps_failed > 0 {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Completed
    };

    tracker.finalize(status, None).await?;
    tracker.destroy();

    tracing::info!("Execution {} finished as {}", tracker.execution_id(), status);

    Ok(tracker.state())
}
