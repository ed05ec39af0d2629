use crate::types::{ExecutionId, ExecutionStatus, StepKey, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Execution-level status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub execution_id: ExecutionId,
    pub previous_status: ExecutionStatus,
    pub current_status: ExecutionStatus,
    pub timestamp: DateTime<Utc>,
}

/// Step-level status transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatusChange {
    pub execution_id: ExecutionId,
    pub step_key: StepKey,
    pub previous_status: StepStatus,
    pub current_status: StepStatus,
    pub duration_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Any event a tracker emits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    StatusUpdate(StatusUpdate),
    StepStatusChange(StepStatusChange),
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Synchronous listener registry, one list per event kind.
///
/// Dispatch clones the listener list first, so listeners can subscribe or read
/// tracker state without deadlocking. A panicking listener is logged and the
/// remaining listeners still run.
#[derive(Default)]
pub struct EventBus {
    status_listeners: Mutex<Vec<Listener<StatusUpdate>>>,
    step_listeners: Mutex<Vec<Listener<StepStatusChange>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_status_update<F>(&self, listener: F)
    where
        F: Fn(&StatusUpdate) + Send + Sync + 'static,
    {
        self.status_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    pub fn on_step_status_change<F>(&self, listener: F)
    where
        F: Fn(&StepStatusChange) + Send + Sync + 'static,
    {
        self.step_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    /// Listen to both event kinds through one callback
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(TrackerEvent) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        let for_steps = listener.clone();
        self.on_status_update(move |e| listener(TrackerEvent::StatusUpdate(e.clone())));
        self.on_step_status_change(move |e| for_steps(TrackerEvent::StepStatusChange(e.clone())));
    }

    pub fn emit_status_update(&self, event: &StatusUpdate) {
        let listeners = self
            .status_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        dispatch(&listeners, event, "statusUpdate");
    }

    pub fn emit_step_status_change(&self, event: &StepStatusChange) {
        let listeners = self
            .step_listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        dispatch(&listeners, event, "stepStatusChange");
    }
}

fn dispatch<E>(listeners: &[Listener<E>], event: &E, kind: &str) {
    for listener in listeners {
        if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
            tracing::warn!("{} listener panicked; continuing with remaining listeners", kind);
        }
    }
}
