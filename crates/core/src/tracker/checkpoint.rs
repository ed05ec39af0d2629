use super::TrackerState;
use crate::storage::{ExecutionSnapshot, ExecutionStore};
use crate::types::ExecutionId;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Background task pushing partial snapshots on a fixed interval
pub(crate) struct CheckpointTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CheckpointTask {
    /// Spawn onto the current tokio runtime. Returns `None` outside a runtime.
    pub(crate) fn spawn(
        execution_id: ExecutionId,
        state: Arc<Mutex<TrackerState>>,
        store: Arc<dyn ExecutionStore>,
        interval: Duration,
    ) -> Option<Self> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    "No tokio runtime available; periodic checkpoints disabled for execution {}",
                    execution_id
                );
                return None;
            }
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let snapshot = {
                            let state = state.lock().unwrap_or_else(|e| e.into_inner());
                            ExecutionSnapshot::from_execution(&state.execution)
                        };

                        if let Err(e) = store.upsert_snapshot(snapshot).await {
                            tracing::warn!(
                                "Periodic checkpoint failed for execution {}: {:#}",
                                execution_id,
                                e
                            );
                        }
                    }
                }
            }

            tracing::debug!("Checkpoint task stopped for execution {}", execution_id);
        });

        Some(Self { cancel, handle })
    }

    /// Signal the task to stop without waiting for it
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the task and wait until any in-flight write has finished
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::warn!("Checkpoint task panicked: {}", e);
            }
        }
    }
}
