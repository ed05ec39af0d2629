use super::{ExecutionSnapshot, ExecutionStore};
use crate::types::ExecutionId;
use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// In-process execution store.
///
/// Keeps every write in order so callers can inspect what was persisted, and
/// can be switched into a failing mode to exercise error paths.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    snapshots: Arc<Mutex<HashMap<ExecutionId, ExecutionSnapshot>>>,
    history: Arc<Mutex<Vec<ExecutionSnapshot>>>,
    writes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `upsert_snapshot` calls
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Every snapshot written, oldest first
    pub fn history(&self) -> Vec<ExecutionSnapshot> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Make subsequent writes fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn upsert_snapshot(&self, snapshot: ExecutionSnapshot) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!(
                "Store unavailable for execution {}",
                snapshot.execution_id
            ));
        }

        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(snapshot.clone());
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(snapshot.execution_id, snapshot);
        self.writes.fetch_add(1, Ordering::SeqCst);

        Ok(())
    }

    async fn get_snapshot(&self, execution_id: ExecutionId) -> Result<Option<ExecutionSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&execution_id)
            .cloned())
    }
}
