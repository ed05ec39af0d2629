//! Error types for workflow validation and execution tracking.

use crate::types::{ExecutionStatus, StepKey};

/// A step list that cannot be accepted as a workflow DAG.
///
/// All variants are caller mistakes: retrying without changing the step list
/// gives the same error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DagError {
    /// Two steps share the same key.
    #[error("Duplicate step key: {step_key}")]
    DuplicateStepKey { step_key: StepKey },

    /// A dependency names a key that no step declares.
    #[error("Step {step_key} depends on non-existent step {dependency}")]
    MissingDependency {
        step_key: StepKey,
        dependency: StepKey,
    },

    /// The dependency graph contains a cycle. `from` depends on `to`, and `to`
    /// is already on the current traversal path.
    #[error("Cycle detected in workflow steps: {from} -> {to}")]
    CycleDetected { from: StepKey, to: StepKey },
}

/// Errors raised by an execution tracker.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// A lifecycle or step operation was called before `initialize`.
    #[error("Execution tracker used before initialize()")]
    NotInitialized,

    /// `finalize` was asked to end the execution in a non-terminal status.
    #[error("Cannot finalize execution with non-terminal status {0}")]
    InvalidFinalStatus(ExecutionStatus),

    /// The final snapshot could not be written.
    #[error("Failed to persist execution snapshot: {0}")]
    Persistence(#[source] anyhow::Error),
}
