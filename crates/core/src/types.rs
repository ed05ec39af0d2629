use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Unique identifier for a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a persisted workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub String);

impl WorkflowId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identifier of a step within one workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepKey(pub String);

impl StepKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StepKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

/// Status of a workflow execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

/// Status of a single step inside an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        };
        f.write_str(s)
    }
}

/// Definition of a workflow step, as stored with the workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub step_key: StepKey,
    pub step_name: String,
    #[serde(default)]
    pub depends_on: Vec<StepKey>,
}

impl WorkflowStep {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            step_key: StepKey::new(key),
            step_name: name.into(),
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = keys.into_iter().map(StepKey::new).collect();
        self
    }
}

/// Opaque serializable payload produced by a step or an execution.
///
/// The tracker never inspects the shape; it only measures the serialized size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepPayload(pub serde_json::Value);

impl StepPayload {
    /// Size in bytes of the JSON encoding
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(&self.0).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

impl From<serde_json::Value> for StepPayload {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// Runtime state of one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecutionState {
    pub step_key: StepKey,
    pub step_name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub retry_count: u32,
    pub output: Option<StepPayload>,
    pub error: Option<String>,
}

impl StepExecutionState {
    pub fn pending(step: &WorkflowStep) -> Self {
        Self {
            step_key: step.step_key.clone(),
            step_name: step.step_name.clone(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            retry_count: 0,
            output: None,
            error: None,
        }
    }
}

/// Aggregate state of one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub status: ExecutionStatus,
    pub steps_total: u32,
    pub steps_pending: u32,
    pub steps_running: u32,
    pub steps_completed: u32,
    pub steps_failed: u32,
    pub steps_skipped: u32,
    pub progress: u8,
    pub current_step: Option<StepKey>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub intermediate_results: BTreeMap<StepKey, StepPayload>,
    pub output: Option<StepPayload>,
}

impl Execution {
    pub fn new(execution_id: ExecutionId, workflow_id: WorkflowId) -> Self {
        Self {
            execution_id,
            workflow_id,
            status: ExecutionStatus::Pending,
            steps_total: 0,
            steps_pending: 0,
            steps_running: 0,
            steps_completed: 0,
            steps_failed: 0,
            steps_skipped: 0,
            progress: 0,
            current_step: None,
            started_at: None,
            completed_at: None,
            intermediate_results: BTreeMap::new(),
            output: None,
        }
    }

    /// Number of steps that reached a terminal state
    pub fn steps_finished(&self) -> u32 {
        self.steps_completed + self.steps_failed + self.steps_skipped
    }
}

/// Point-in-time copy of an execution and its step states
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionState {
    pub execution: Execution,
    pub steps: Vec<StepExecutionState>,
}

impl ExecutionState {
    pub fn step(&self, key: &StepKey) -> Option<&StepExecutionState> {
        self.steps.iter().find(|s| &s.step_key == key)
    }
}

/// Percentage of finished steps, rounded half up. 100 for an empty execution.
pub fn compute_progress(finished: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let finished = u64::from(finished.min(total));
    let total = u64::from(total);
    ((200 * finished + total) / (2 * total)) as u8
}
