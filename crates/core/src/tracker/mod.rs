//! Live bookkeeping for one workflow execution.
//!
//! An [`ExecutionTracker`] is owned by the caller that drives the steps of a
//! run. It keeps per-step states and aggregate counters, notifies listeners as
//! transitions happen, pushes partial snapshots to an [`ExecutionStore`] on an
//! interval, and writes one final snapshot with a summary when finalized.
//!
//! All state sits behind one mutex so status pollers can read a consistent
//! copy while the owner mutates.

mod checkpoint;
pub mod config;
pub mod summary;

pub use config::TrackerConfig;
pub use summary::{Bottleneck, ExecutionSummary};

use crate::error::TrackerError;
use crate::events::{EventBus, StatusUpdate, StepStatusChange, TrackerEvent};
use crate::storage::{ExecutionSnapshot, ExecutionStore};
use crate::types::{
    compute_progress, Execution, ExecutionId, ExecutionState, ExecutionStatus, StepExecutionState,
    StepKey, StepPayload, StepStatus, WorkflowId, WorkflowStep,
};
use checkpoint::CheckpointTask;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

pub(crate) struct TrackerState {
    execution: Execution,
    steps: Vec<StepExecutionState>,
    index: HashMap<StepKey, usize>,
    initialized: bool,
}

impl TrackerState {
    fn counter_mut(&mut self, status: StepStatus) -> &mut u32 {
        let e = &mut self.execution;
        match status {
            StepStatus::Pending => &mut e.steps_pending,
            StepStatus::Running => &mut e.steps_running,
            StepStatus::Completed => &mut e.steps_completed,
            StepStatus::Failed => &mut e.steps_failed,
            StepStatus::Skipped => &mut e.steps_skipped,
        }
    }

    fn move_counter(&mut self, from: StepStatus, to: StepStatus) {
        let from_count = self.counter_mut(from);
        *from_count = from_count.saturating_sub(1);
        *self.counter_mut(to) += 1;
        self.execution.progress =
            compute_progress(self.execution.steps_finished(), self.execution.steps_total);
    }
}

/// What a step call asks for
#[derive(Clone, Copy)]
enum StepCommand {
    Start,
    Complete,
    Fail,
    Skip,
}

impl StepCommand {
    fn target(self) -> StepStatus {
        match self {
            Self::Start => StepStatus::Running,
            Self::Complete => StepStatus::Completed,
            Self::Fail => StepStatus::Failed,
            Self::Skip => StepStatus::Skipped,
        }
    }

    /// Whether the command moves a step out of `from`. Terminal steps never move;
    /// a running step is not restarted.
    fn accepts(self, from: StepStatus) -> bool {
        match self {
            Self::Start => from == StepStatus::Pending,
            Self::Complete | Self::Fail | Self::Skip => !from.is_terminal(),
        }
    }
}

/// In-memory tracker for a single execution.
///
/// Listeners run after the state lock is released, so events arrive in the
/// same order as state changes only while a single owner drives the step
/// calls.
pub struct ExecutionTracker {
    execution_id: ExecutionId,
    state: Arc<Mutex<TrackerState>>,
    events: EventBus,
    store: Arc<dyn ExecutionStore>,
    config: TrackerConfig,
    checkpoint: Mutex<Option<CheckpointTask>>,
    /// Terminal status applied
    finalized: AtomicBool,
    /// Final snapshot written
    persisted: AtomicBool,
    /// Final snapshot whose write failed, resent by the next `finalize`
    pending_final: Mutex<Option<ExecutionSnapshot>>,
}

impl ExecutionTracker {
    pub fn new(
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        store: Arc<dyn ExecutionStore>,
        config: TrackerConfig,
    ) -> Self {
        Self {
            execution_id,
            state: Arc::new(Mutex::new(TrackerState {
                execution: Execution::new(execution_id, workflow_id),
                steps: Vec::new(),
                index: HashMap::new(),
                initialized: false,
            })),
            events: EventBus::new(),
            store,
            config,
            checkpoint: Mutex::new(None),
            finalized: AtomicBool::new(false),
            persisted: AtomicBool::new(false),
            pending_final: Mutex::new(None),
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on_status_update<F>(&self, listener: F)
    where
        F: Fn(&StatusUpdate) + Send + Sync + 'static,
    {
        self.events.on_status_update(listener);
    }

    pub fn on_step_status_change<F>(&self, listener: F)
    where
        F: Fn(&StepStatusChange) + Send + Sync + 'static,
    {
        self.events.on_step_status_change(listener);
    }

    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(TrackerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener);
    }

    /// Seed one pending state per step definition.
    ///
    /// Meant to be called once. A second call discards all step progress and
    /// re-seeds from the new definitions. Repeated keys keep their first
    /// definition.
    pub fn initialize(&self, steps: &[WorkflowStep]) {
        let mut state = self.lock();

        if state.execution.status.is_terminal() {
            tracing::warn!(
                "Ignoring initialize() for finished execution {}",
                self.execution_id
            );
            return;
        }
        if state.initialized {
            tracing::warn!(
                "Re-initializing execution {}; previous step state is discarded",
                self.execution_id
            );
        }

        let mut seeded = Vec::with_capacity(steps.len());
        let mut index = HashMap::with_capacity(steps.len());
        for step in steps {
            if index.contains_key(&step.step_key) {
                tracing::warn!(
                    "Ignoring repeated step key {} in execution {}",
                    step.step_key,
                    self.execution_id
                );
                continue;
            }
            index.insert(step.step_key.clone(), seeded.len());
            seeded.push(StepExecutionState::pending(step));
        }

        let total = seeded.len() as u32;
        let e = &mut state.execution;
        e.steps_total = total;
        e.steps_pending = total;
        e.steps_running = 0;
        e.steps_completed = 0;
        e.steps_failed = 0;
        e.steps_skipped = 0;
        e.progress = compute_progress(0, total);
        e.current_step = None;
        e.intermediate_results.clear();

        state.steps = seeded;
        state.index = index;
        state.initialized = true;

        tracing::debug!(
            "Initialized execution {} with {} steps",
            self.execution_id,
            total
        );
    }

    /// Move the execution from `PENDING` to `RUNNING` and begin periodic checkpoints
    pub fn start(&self) -> Result<(), TrackerError> {
        let event = {
            let mut state = self.lock();
            if !state.initialized {
                return Err(TrackerError::NotInitialized);
            }
            if state.execution.status != ExecutionStatus::Pending {
                tracing::debug!(
                    "Ignoring start() for execution {} in status {}",
                    self.execution_id,
                    state.execution.status
                );
                return Ok(());
            }

            let now = Utc::now();
            state.execution.status = ExecutionStatus::Running;
            state.execution.started_at = Some(now);

            StatusUpdate {
                execution_id: self.execution_id,
                previous_status: ExecutionStatus::Pending,
                current_status: ExecutionStatus::Running,
                timestamp: now,
            }
        };

        tracing::info!("Execution {} started", self.execution_id);
        self.spawn_checkpoint();
        self.events.emit_status_update(&event);
        Ok(())
    }

    fn spawn_checkpoint(&self) {
        let mut slot = self.checkpoint.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() || self.finalized.load(Ordering::SeqCst) {
            return;
        }
        *slot = CheckpointTask::spawn(
            self.execution_id,
            self.state.clone(),
            self.store.clone(),
            self.config.db_update_interval(),
        );
    }

    pub fn start_step(&self, step_key: &StepKey) -> Result<(), TrackerError> {
        self.apply_step(step_key, StepCommand::Start, |_, _| {})
    }

    pub fn complete_step(
        &self,
        step_key: &StepKey,
        output: Option<StepPayload>,
    ) -> Result<(), TrackerError> {
        let keep_output = self.config.store_intermediate_results;
        let max_size = self.config.max_intermediate_results_size;

        self.apply_step(step_key, StepCommand::Complete, |state, idx| {
            let Some(output) = output else {
                return;
            };

            if keep_output {
                if output.serialized_size() < max_size {
                    state
                        .execution
                        .intermediate_results
                        .insert(step_key.clone(), output.clone());
                } else {
                    tracing::debug!(
                        "Output of step {} exceeds {} bytes; not kept as intermediate result",
                        step_key,
                        max_size
                    );
                }
            }
            state.steps[idx].output = Some(output);
        })
    }

    pub fn fail_step(
        &self,
        step_key: &StepKey,
        error: impl Into<String>,
    ) -> Result<(), TrackerError> {
        let error = error.into();
        self.apply_step(step_key, StepCommand::Fail, |state, idx| {
            state.steps[idx].error = Some(error);
        })
    }

    pub fn skip_step(
        &self,
        step_key: &StepKey,
        reason: Option<String>,
    ) -> Result<(), TrackerError> {
        self.apply_step(step_key, StepCommand::Skip, |state, idx| {
            state.steps[idx].error = reason;
        })
    }

    /// Count another attempt of an in-flight step. The status is unchanged.
    pub fn record_retry(&self, step_key: &StepKey, attempt: u32) -> Result<(), TrackerError> {
        let mut state = self.lock();
        if !state.initialized {
            return Err(TrackerError::NotInitialized);
        }
        if state.execution.status.is_terminal() {
            return Ok(());
        }

        let Some(&idx) = state.index.get(step_key) else {
            tracing::debug!("record_retry for unknown step {}", step_key);
            return Ok(());
        };

        let step = &mut state.steps[idx];
        if step.status.is_terminal() {
            return Ok(());
        }
        step.retry_count += 1;

        tracing::debug!(
            "Step {} retry recorded (attempt {}, total retries {})",
            step_key,
            attempt,
            step.retry_count
        );
        Ok(())
    }

    /// Shared path of every step transition: checks, counter moves, timing, event.
    fn apply_step<F>(
        &self,
        step_key: &StepKey,
        command: StepCommand,
        update: F,
    ) -> Result<(), TrackerError>
    where
        F: FnOnce(&mut TrackerState, usize),
    {
        let event = {
            let mut state = self.lock();
            if !state.initialized {
                return Err(TrackerError::NotInitialized);
            }

            if state.execution.status.is_terminal() {
                tracing::debug!(
                    "Ignoring step {} update; execution {} is {}",
                    step_key,
                    self.execution_id,
                    state.execution.status
                );
                return Ok(());
            }

            let Some(&idx) = state.index.get(step_key) else {
                tracing::debug!(
                    "Ignoring update for unknown step {} in execution {}",
                    step_key,
                    self.execution_id
                );
                return Ok(());
            };

            let previous = state.steps[idx].status;
            if !command.accepts(previous) {
                tracing::debug!(
                    "Ignoring {} -> {} for step {}",
                    previous,
                    command.target(),
                    step_key
                );
                return Ok(());
            }

            let target = command.target();
            let now = Utc::now();
            let duration_ms = record_timing(&mut state.steps[idx], target, now);
            state.steps[idx].status = target;
            state.move_counter(previous, target);

            if target == StepStatus::Running {
                state.execution.current_step = Some(step_key.clone());
            }

            update(&mut *state, idx);

            StepStatusChange {
                execution_id: self.execution_id,
                step_key: step_key.clone(),
                previous_status: previous,
                current_status: target,
                duration_ms,
                timestamp: now,
            }
        };

        tracing::debug!(
            "Step {} {} -> {}",
            event.step_key,
            event.previous_status,
            event.current_status
        );
        self.events.emit_step_status_change(&event);
        Ok(())
    }

    /// End the execution in a terminal status and write the final snapshot.
    ///
    /// The first call moves the execution into `status`. If the final write
    /// fails the error is returned and the snapshot is kept, so a later call
    /// resends it unchanged (the requested status of that call is ignored).
    /// Once the write has succeeded every further call is a no-op.
    pub async fn finalize(
        &self,
        status: ExecutionStatus,
        output: Option<StepPayload>,
    ) -> Result<(), TrackerError> {
        if !status.is_terminal() {
            return Err(TrackerError::InvalidFinalStatus(status));
        }
        if self.persisted.load(Ordering::SeqCst) {
            tracing::debug!(
                "Execution {} already finalized; ignoring {}",
                self.execution_id,
                status
            );
            return Ok(());
        }

        let snapshot = if self.finalized.swap(true, Ordering::SeqCst) {
            let pending = self
                .pending_final
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            match pending {
                Some(snapshot) => {
                    tracing::info!("Retrying final snapshot for execution {}", self.execution_id);
                    snapshot
                }
                // Another call is writing it right now
                None => return Ok(()),
            }
        } else {
            self.close_execution(status, output).await
        };

        let final_status = snapshot.status;
        match self.store.upsert_snapshot(snapshot.clone()).await {
            Ok(()) => {
                self.persisted.store(true, Ordering::SeqCst);
                tracing::info!("Execution {} finalized as {}", self.execution_id, final_status);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "Failed to persist final snapshot for execution {}: {:#}",
                    self.execution_id,
                    e
                );
                *self
                    .pending_final
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()) = Some(snapshot);
                Err(TrackerError::Persistence(e))
            }
        }
    }

    /// Stop checkpoints, apply the terminal status and build the final
    /// snapshot. Runs once per tracker.
    async fn close_execution(
        &self,
        status: ExecutionStatus,
        output: Option<StepPayload>,
    ) -> ExecutionSnapshot {
        let task = self
            .checkpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.shutdown().await;
        }

        let (event, snapshot) = {
            let mut state = self.lock();
            let previous = state.execution.status;
            let now = Utc::now();

            state.execution.status = status;
            state.execution.completed_at = Some(now);
            state.execution.output = output;

            let summary = ExecutionSummary::build(&state.execution, &state.steps);
            let snapshot =
                ExecutionSnapshot::from_execution(&state.execution).with_summary(summary);

            let event = StatusUpdate {
                execution_id: self.execution_id,
                previous_status: previous,
                current_status: status,
                timestamp: now,
            };
            (event, snapshot)
        };

        self.events.emit_status_update(&event);
        snapshot
    }

    /// True once the final snapshot has been written
    pub fn is_finalized(&self) -> bool {
        self.persisted.load(Ordering::SeqCst)
    }

    /// Consistent copy of the execution and every step state
    pub fn state(&self) -> ExecutionState {
        let state = self.lock();
        ExecutionState {
            execution: state.execution.clone(),
            steps: state.steps.clone(),
        }
    }

    pub fn progress(&self) -> u8 {
        self.lock().execution.progress
    }

    pub fn status(&self) -> ExecutionStatus {
        self.lock().execution.status
    }

    /// Stop periodic checkpoints. Safe in any state and more than once.
    pub fn destroy(&self) {
        let task = self
            .checkpoint
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.cancel();
            tracing::debug!("Checkpoint task cancelled for execution {}", self.execution_id);
        }
    }
}

impl Drop for ExecutionTracker {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Stamp start/completion times for a transition into `target`; returns the
/// step duration once it is terminal.
fn record_timing(
    step: &mut StepExecutionState,
    target: StepStatus,
    now: DateTime<Utc>,
) -> Option<u64> {
    if target == StepStatus::Running {
        step.started_at = Some(now);
        return None;
    }

    step.completed_at = Some(now);

    // A step skipped before it ever ran has no duration
    if target == StepStatus::Skipped && step.started_at.is_none() {
        return None;
    }

    let started = *step.started_at.get_or_insert(now);
    let duration = (now - started).num_milliseconds().max(0) as u64;
    step.duration_ms = Some(duration);
    Some(duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryExecutionStore;
    use std::time::Duration;

    fn steps(keys: &[&str]) -> Vec<WorkflowStep> {
        keys.iter()
            .map(|k| WorkflowStep::new(*k, format!("Step {}", k)))
            .collect()
    }

    fn tracker_with(config: TrackerConfig) -> (ExecutionTracker, Arc<InMemoryExecutionStore>) {
        let store = Arc::new(InMemoryExecutionStore::new());
        let tracker = ExecutionTracker::new(
            ExecutionId::new(),
            WorkflowId::new("wf-test"),
            store.clone(),
            config,
        );
        (tracker, store)
    }

    fn tracker() -> (ExecutionTracker, Arc<InMemoryExecutionStore>) {
        tracker_with(TrackerConfig::default())
    }

    fn key(k: &str) -> StepKey {
        StepKey::new(k)
    }

    fn assert_counters_balanced(state: &ExecutionState) {
        let e = &state.execution;
        let sum = e.steps_pending
            + e.steps_running
            + e.steps_completed
            + e.steps_failed
            + e.steps_skipped;
        assert_eq!(sum, e.steps_total);
    }

    #[test]
    fn test_initialize_seeds_pending_steps() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1", "s2", "s3"]));

        let state = tracker.state();
        assert_eq!(state.execution.steps_total, 3);
        assert_eq!(state.execution.steps_pending, 3);
        assert_eq!(state.execution.status, ExecutionStatus::Pending);
        assert_eq!(state.steps.len(), 3);
        assert!(state.steps.iter().all(|s| s.status == StepStatus::Pending));
        assert_eq!(state.steps[1].step_name, "Step s2");
        assert_eq!(tracker.progress(), 0);
    }

    #[test]
    fn test_operations_before_initialize_fail() {
        let (tracker, _) = tracker();

        assert!(matches!(tracker.start(), Err(TrackerError::NotInitialized)));
        assert!(matches!(
            tracker.start_step(&key("s1")),
            Err(TrackerError::NotInitialized)
        ));
        assert!(matches!(
            tracker.record_retry(&key("s1"), 2),
            Err(TrackerError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_four_step_progress_scenario() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1", "s2", "s3", "s4"]));
        tracker.start().unwrap();

        tracker.start_step(&key("s1")).unwrap();
        tracker.complete_step(&key("s1"), None).unwrap();
        assert_eq!(tracker.progress(), 25);

        tracker.start_step(&key("s2")).unwrap();
        tracker.fail_step(&key("s2"), "boom").unwrap();
        assert_eq!(tracker.progress(), 50);

        tracker.skip_step(&key("s3"), Some("not needed".into())).unwrap();
        assert_eq!(tracker.progress(), 75);

        tracker.skip_step(&key("s4"), None).unwrap();
        assert_eq!(tracker.progress(), 100);

        let state = tracker.state();
        assert_eq!(state.execution.steps_pending, 0);
        assert_eq!(state.execution.steps_completed, 1);
        assert_eq!(state.execution.steps_failed, 1);
        assert_eq!(state.execution.steps_skipped, 2);
        assert_counters_balanced(&state);

        let s2 = state.step(&key("s2")).unwrap();
        assert_eq!(s2.status, StepStatus::Failed);
        assert_eq!(s2.error.as_deref(), Some("boom"));
        assert!(s2.duration_ms.is_some());

        let s3 = state.step(&key("s3")).unwrap();
        assert_eq!(s3.error.as_deref(), Some("not needed"));
        assert!(s3.started_at.is_none());
        assert!(s3.duration_ms.is_none());
        assert!(s3.completed_at.is_some());

        tracker.destroy();
    }

    #[test]
    fn test_unknown_step_is_ignored() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1"]));

        tracker.start_step(&key("nonexistent")).unwrap();
        tracker.complete_step(&key("nonexistent"), None).unwrap();
        tracker.record_retry(&key("nonexistent"), 1).unwrap();

        let state = tracker.state();
        assert_eq!(state.execution.steps_running, 0);
        assert_eq!(state.execution.steps_pending, 1);
        assert!(state.execution.current_step.is_none());
    }

    #[test]
    fn test_terminal_step_calls_are_noops() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1", "s2"]));

        tracker.start_step(&key("s1")).unwrap();
        tracker.complete_step(&key("s1"), None).unwrap();
        tracker.fail_step(&key("s1"), "late failure").unwrap();
        tracker.skip_step(&key("s1"), None).unwrap();
        tracker.start_step(&key("s1")).unwrap();

        let state = tracker.state();
        let s1 = state.step(&key("s1")).unwrap();
        assert_eq!(s1.status, StepStatus::Completed);
        assert!(s1.error.is_none());
        assert_eq!(state.execution.steps_completed, 1);
        assert_eq!(state.execution.steps_failed, 0);
        assert_counters_balanced(&state);
    }

    #[test]
    fn test_duplicate_start_keeps_counters() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1"]));

        tracker.start_step(&key("s1")).unwrap();
        tracker.start_step(&key("s1")).unwrap();

        let state = tracker.state();
        assert_eq!(state.execution.steps_running, 1);
        assert_eq!(state.execution.steps_pending, 0);
        assert_eq!(state.execution.current_step, Some(key("s1")));
    }

    #[test]
    fn test_complete_from_pending_keeps_balance() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1", "s2"]));

        tracker.complete_step(&key("s1"), None).unwrap();
        tracker.start_step(&key("s2")).unwrap();
        tracker.skip_step(&key("s2"), Some("aborted".into())).unwrap();

        let state = tracker.state();
        assert_eq!(state.execution.steps_completed, 1);
        assert_eq!(state.execution.steps_skipped, 1);
        assert_eq!(state.execution.steps_running, 0);
        assert_eq!(state.step(&key("s1")).unwrap().duration_ms, Some(0));
        assert!(state.step(&key("s2")).unwrap().duration_ms.is_some());
        assert_counters_balanced(&state);
    }

    #[test]
    fn test_progress_monotonic() {
        let (tracker, _) = tracker();
        let keys = ["a", "b", "c", "d", "e", "f", "g"];
        tracker.initialize(&steps(&keys));

        let mut last = tracker.progress();
        for (i, k) in keys.iter().enumerate() {
            tracker.start_step(&key(k)).unwrap();
            assert!(tracker.progress() >= last);
            last = tracker.progress();

            match i % 3 {
                0 => tracker.complete_step(&key(k), None).unwrap(),
                1 => tracker.fail_step(&key(k), "err").unwrap(),
                _ => tracker.skip_step(&key(k), None).unwrap(),
            }
            let progress = tracker.progress();
            assert!(progress >= last);
            let finished = (i + 1) as f64;
            assert_eq!(progress, (100.0 * finished / keys.len() as f64).round() as u8);
            last = progress;
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_mixed_calls_keep_progress_and_counters_consistent() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["a", "b", "c", "d", "e", "f"]));

        let calls: &[fn(&ExecutionTracker)] = &[
            |t| t.complete_step(&key("a"), None).unwrap(),
            |t| t.start_step(&key("b")).unwrap(),
            |t| t.start_step(&key("b")).unwrap(),
            |t| t.fail_step(&key("c"), "never started").unwrap(),
            |t| t.skip_step(&key("b"), Some("cancelled".into())).unwrap(),
            |t| t.start_step(&key("ghost")).unwrap(),
            |t| t.fail_step(&key("ghost"), "unknown").unwrap(),
            |t| t.complete_step(&key("b"), None).unwrap(),
            |t| t.start_step(&key("a")).unwrap(),
            |t| t.start_step(&key("d")).unwrap(),
            |t| t.record_retry(&key("d"), 2).unwrap(),
            |t| t.skip_step(&key("e"), None).unwrap(),
            |t| t.complete_step(&key("d"), None).unwrap(),
            |t| t.fail_step(&key("d"), "late").unwrap(),
            |t| t.skip_step(&key("c"), None).unwrap(),
            |t| t.start_step(&key("f")).unwrap(),
            |t| t.fail_step(&key("f"), "boom").unwrap(),
        ];

        let mut last = tracker.progress();
        for call in calls {
            call(&tracker);
            let state = tracker.state();
            assert_counters_balanced(&state);
            assert!(state.execution.progress >= last);
            last = state.execution.progress;
        }

        let state = tracker.state();
        assert_eq!(last, 100);
        assert_eq!(state.execution.steps_completed, 2);
        assert_eq!(state.execution.steps_failed, 2);
        assert_eq!(state.execution.steps_skipped, 2);
        assert_eq!(state.execution.steps_running, 0);
        assert_eq!(state.step(&key("b")).unwrap().status, StepStatus::Skipped);
        assert_eq!(state.step(&key("d")).unwrap().status, StepStatus::Completed);
    }

    #[test]
    fn test_empty_execution_is_complete() {
        let (tracker, _) = tracker();
        tracker.initialize(&[]);
        assert_eq!(tracker.progress(), 100);
    }

    #[test]
    fn test_reinitialize_reseeds() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1", "s2"]));
        tracker.start_step(&key("s1")).unwrap();

        tracker.initialize(&steps(&["x", "y", "z"]));
        let state = tracker.state();
        assert_eq!(state.execution.steps_total, 3);
        assert_eq!(state.execution.steps_pending, 3);
        assert_eq!(state.execution.steps_running, 0);
        assert!(state.step(&key("s1")).is_none());
    }

    #[test]
    fn test_repeated_keys_keep_first_definition() {
        let (tracker, _) = tracker();
        let mut defs = steps(&["s1", "s2"]);
        defs.push(WorkflowStep::new("s1", "Another s1"));
        tracker.initialize(&defs);

        let state = tracker.state();
        assert_eq!(state.execution.steps_total, 2);
        assert_eq!(state.step(&key("s1")).unwrap().step_name, "Step s1");
    }

    #[test]
    fn test_record_retry() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1"]));
        tracker.start_step(&key("s1")).unwrap();

        tracker.record_retry(&key("s1"), 2).unwrap();
        tracker.record_retry(&key("s1"), 3).unwrap();

        let state = tracker.state();
        let s1 = state.step(&key("s1")).unwrap();
        assert_eq!(s1.retry_count, 2);
        assert_eq!(s1.status, StepStatus::Running);
    }

    #[test]
    fn test_intermediate_results_bounded() {
        let (tracker, _) = tracker_with(TrackerConfig {
            store_intermediate_results: true,
            max_intermediate_results_size: 32,
            ..Default::default()
        });
        tracker.initialize(&steps(&["small", "large"]));

        let small = StepPayload(serde_json::json!({"ok": true}));
        let large = StepPayload(serde_json::json!({"blob": "x".repeat(100)}));

        tracker.start_step(&key("small")).unwrap();
        tracker.complete_step(&key("small"), Some(small.clone())).unwrap();
        tracker.start_step(&key("large")).unwrap();
        tracker.complete_step(&key("large"), Some(large.clone())).unwrap();

        let state = tracker.state();
        assert_eq!(state.execution.intermediate_results.get(&key("small")), Some(&small));
        assert!(!state.execution.intermediate_results.contains_key(&key("large")));
        // The step keeps its own output either way
        assert_eq!(state.step(&key("large")).unwrap().output, Some(large));
        assert_eq!(state.execution.steps_completed, 2);
    }

    #[test]
    fn test_intermediate_results_disabled_by_default() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1"]));
        tracker.start_step(&key("s1")).unwrap();
        tracker
            .complete_step(&key("s1"), Some(StepPayload(serde_json::json!(1))))
            .unwrap();

        assert!(tracker.state().execution.intermediate_results.is_empty());
    }

    #[test]
    fn test_state_is_a_copy() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1"]));

        let mut snapshot = tracker.state();
        snapshot.execution.steps_completed = 99;
        snapshot.steps[0].status = StepStatus::Completed;

        let state = tracker.state();
        assert_eq!(state.execution.steps_completed, 0);
        assert_eq!(state.steps[0].status, StepStatus::Pending);
    }

    #[tokio::test]
    async fn test_events_are_emitted_synchronously() {
        let (tracker, _) = tracker();
        let events = Arc::new(Mutex::new(Vec::new()));

        let sink = events.clone();
        tracker.subscribe(move |e| sink.lock().unwrap().push(e));

        tracker.initialize(&steps(&["s1"]));
        tracker.start().unwrap();
        assert_eq!(events.lock().unwrap().len(), 1);

        tracker.start_step(&key("s1")).unwrap();
        tracker.complete_step(&key("s1"), None).unwrap();
        tracker.finalize(ExecutionStatus::Completed, None).await.unwrap();

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 4);

        match &events[0] {
            TrackerEvent::StatusUpdate(e) => {
                assert_eq!(e.previous_status, ExecutionStatus::Pending);
                assert_eq!(e.current_status, ExecutionStatus::Running);
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[2] {
            TrackerEvent::StepStatusChange(e) => {
                assert_eq!(e.step_key, key("s1"));
                assert_eq!(e.previous_status, StepStatus::Running);
                assert_eq!(e.current_status, StepStatus::Completed);
                assert!(e.duration_ms.is_some());
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[3] {
            TrackerEvent::StatusUpdate(e) => {
                assert_eq!(e.previous_status, ExecutionStatus::Running);
                assert_eq!(e.current_status, ExecutionStatus::Completed);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_listener_can_read_state_and_panics_are_isolated() {
        let tracker = Arc::new(tracker().0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        tracker.on_step_status_change(|_| panic!("bad listener"));
        let reader = Arc::downgrade(&tracker);
        let sink = seen.clone();
        tracker.on_step_status_change(move |_| {
            if let Some(t) = reader.upgrade() {
                sink.lock().unwrap().push(t.state().execution.steps_running);
            }
        });

        tracker.initialize(&steps(&["s1"]));
        tracker.start_step(&key("s1")).unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_counters_balanced(&tracker.state());
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let (tracker, store) = tracker();
        tracker.initialize(&steps(&["s1"]));
        tracker.start().unwrap();
        tracker.start_step(&key("s1")).unwrap();
        tracker.complete_step(&key("s1"), None).unwrap();

        tracker
            .finalize(ExecutionStatus::Completed, Some(StepPayload(serde_json::json!("done"))))
            .await
            .unwrap();
        tracker.finalize(ExecutionStatus::Failed, None).await.unwrap();

        assert_eq!(store.write_count(), 1);
        assert_eq!(tracker.status(), ExecutionStatus::Completed);
        assert!(tracker.is_finalized());

        let snapshot = store.history().pop().unwrap();
        assert_eq!(snapshot.status, ExecutionStatus::Completed);
        assert_eq!(snapshot.steps_completed, 1);
        assert!(snapshot.completed_at.is_some());
        let summary = snapshot.summary.unwrap();
        assert_eq!(summary.steps_completed, 1);
        assert_eq!(summary.success_rate, 100.0);
        assert_eq!(summary.output, Some(StepPayload(serde_json::json!("done"))));
    }

    #[tokio::test]
    async fn test_finalize_rejects_non_terminal_status() {
        let (tracker, store) = tracker();
        tracker.initialize(&steps(&["s1"]));

        let result = tracker.finalize(ExecutionStatus::Running, None).await;
        assert!(matches!(
            result,
            Err(TrackerError::InvalidFinalStatus(ExecutionStatus::Running))
        ));
        assert!(!tracker.is_finalized());

        tracker.finalize(ExecutionStatus::Timeout, None).await.unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(tracker.status(), ExecutionStatus::Timeout);
    }

    #[tokio::test]
    async fn test_step_calls_after_finalize_are_ignored() {
        let (tracker, _) = tracker();
        tracker.initialize(&steps(&["s1", "s2"]));
        tracker.start().unwrap();
        tracker.finalize(ExecutionStatus::Cancelled, None).await.unwrap();

        tracker.start_step(&key("s1")).unwrap();
        tracker.skip_step(&key("s2"), None).unwrap();
        tracker.initialize(&steps(&["other"]));

        let state = tracker.state();
        assert_eq!(state.execution.steps_pending, 2);
        assert_eq!(state.execution.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_final_persistence_error_is_returned() {
        let (tracker, store) = tracker();
        tracker.initialize(&steps(&["s1"]));
        tracker.start().unwrap();
        store.set_fail_writes(true);

        let result = tracker.finalize(ExecutionStatus::Failed, None).await;
        assert!(matches!(result, Err(TrackerError::Persistence(_))));
        // In-memory state still reflects the terminal status
        assert_eq!(tracker.status(), ExecutionStatus::Failed);
        assert!(!tracker.is_finalized());
    }

    #[tokio::test]
    async fn test_finalize_retries_failed_final_write() {
        let (tracker, store) = tracker();
        tracker.initialize(&steps(&["s1"]));
        tracker.start().unwrap();
        tracker.start_step(&key("s1")).unwrap();

        let running = ExecutionSnapshot::from_execution(&tracker.state().execution);
        store.upsert_snapshot(running).await.unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        tracker.on_status_update(move |e| sink.lock().unwrap().push(e.current_status));

        tracker.complete_step(&key("s1"), None).unwrap();
        store.set_fail_writes(true);
        assert!(matches!(
            tracker.finalize(ExecutionStatus::Completed, None).await,
            Err(TrackerError::Persistence(_))
        ));
        assert_eq!(store.write_count(), 1);

        // Still failing: the snapshot is kept for the next attempt
        assert!(tracker.finalize(ExecutionStatus::Completed, None).await.is_err());

        store.set_fail_writes(false);
        tracker.finalize(ExecutionStatus::Failed, None).await.unwrap();
        assert_eq!(store.write_count(), 2);
        assert!(tracker.is_finalized());

        let stored = store
            .get_snapshot(tracker.execution_id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ExecutionStatus::Completed);
        assert!(stored.summary.is_some());
        let running = crate::query::is_execution_running(store.as_ref(), tracker.execution_id())
            .await
            .unwrap();
        assert!(!running);

        tracker.finalize(ExecutionStatus::Completed, None).await.unwrap();
        assert_eq!(store.write_count(), 2);
        // Only the first call changes status
        assert_eq!(*events.lock().unwrap(), vec![ExecutionStatus::Completed]);
        assert_eq!(tracker.status(), ExecutionStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_checkpoints() {
        let (tracker, store) = tracker_with(TrackerConfig {
            db_update_interval_ms: 1_000,
            ..Default::default()
        });
        tracker.initialize(&steps(&["s1", "s2"]));
        tracker.start().unwrap();
        tracker.start_step(&key("s1")).unwrap();

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        let writes = store.write_count();
        assert!(writes >= 3, "expected at least 3 checkpoints, got {writes}");

        let partial = store.history().pop().unwrap();
        assert_eq!(partial.status, ExecutionStatus::Running);
        assert!(partial.summary.is_none());

        tracker.complete_step(&key("s1"), None).unwrap();
        tracker.finalize(ExecutionStatus::Completed, None).await.unwrap();
        let after_finalize = store.write_count();

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(store.write_count(), after_finalize);

        let last = store.history().pop().unwrap();
        assert_eq!(last.status, ExecutionStatus::Completed);
        assert!(last.summary.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_failures_do_not_interrupt_tracking() {
        let (tracker, store) = tracker_with(TrackerConfig {
            db_update_interval_ms: 500,
            ..Default::default()
        });
        store.set_fail_writes(true);
        tracker.initialize(&steps(&["s1", "s2"]));
        tracker.start().unwrap();

        tracker.start_step(&key("s1")).unwrap();
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        tracker.complete_step(&key("s1"), None).unwrap();
        tokio::time::sleep(Duration::from_millis(1_200)).await;
        tracker.skip_step(&key("s2"), None).unwrap();

        assert_eq!(store.write_count(), 0);
        assert_eq!(tracker.progress(), 100);

        store.set_fail_writes(false);
        tracker.finalize(ExecutionStatus::Completed, None).await.unwrap();
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_stops_checkpoints() {
        let (tracker, store) = tracker_with(TrackerConfig {
            db_update_interval_ms: 1_000,
            ..Default::default()
        });
        tracker.initialize(&steps(&["s1"]));
        tracker.start().unwrap();

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        tracker.destroy();
        tracker.destroy();
        let writes = store.write_count();

        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(store.write_count(), writes);
    }

    #[test]
    fn test_destroy_before_initialize() {
        let (tracker, _) = tracker();
        tracker.destroy();
        tracker.destroy();
    }

    #[test]
    fn test_start_without_runtime_still_tracks() {
        let (tracker, store) = tracker();
        tracker.initialize(&steps(&["s1"]));
        tracker.start().unwrap();
        tracker.start_step(&key("s1")).unwrap();

        assert_eq!(tracker.status(), ExecutionStatus::Running);
        assert_eq!(store.write_count(), 0);
    }

    #[test]
    fn test_tracker_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ExecutionTracker>();
    }
}
