use super::{ExecutionSnapshot, ExecutionStore};
use crate::types::ExecutionId;
use anyhow::{Context, Result};
use redb::{Database, ReadableTable, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;

const EXECUTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("executions");

/// Execution snapshot store backed by redb
#[derive(Clone)]
pub struct RedbExecutionStore {
    db: Arc<Database>,
}

impl RedbExecutionStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create store directory")?;
        }

        let db = Database::create(&path).context("Failed to create redb database")?;

        let write_txn = db.begin_write().context("Failed to begin write transaction")?;
        {
            let _executions_table = write_txn
                .open_table(EXECUTIONS_TABLE)
                .context("Failed to open executions table")?;
        }
        write_txn.commit().context("Failed to commit transaction")?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Write a snapshot, replacing any previous one for the same execution
    pub fn store_snapshot(&self, snapshot: &ExecutionSnapshot) -> Result<()> {
        let write_txn = self.db.begin_write().context("Failed to begin write")?;
        {
            let mut table = write_txn
                .open_table(EXECUTIONS_TABLE)
                .context("Failed to open table")?;

            let key = snapshot.execution_id.to_string();
            let value = serde_json::to_vec(snapshot).context("Failed to serialize snapshot")?;

            table
                .insert(key.as_str(), value.as_slice())
                .context("Failed to insert snapshot")?;
        }
        write_txn.commit().context("Failed to commit")?;
        Ok(())
    }

    /// Get a snapshot by execution ID
    pub fn load_snapshot(&self, execution_id: &ExecutionId) -> Result<Option<ExecutionSnapshot>> {
        let read_txn = self.db.begin_read().context("Failed to begin read")?;
        let table = read_txn
            .open_table(EXECUTIONS_TABLE)
            .context("Failed to open table")?;

        let key = execution_id.to_string();
        let value = table.get(key.as_str()).context("Failed to get snapshot")?;

        match value {
            Some(guard) => {
                let snapshot: ExecutionSnapshot = serde_json::from_slice(guard.value())
                    .context("Failed to deserialize snapshot")?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }
}

#[async_trait::async_trait]
impl ExecutionStore for RedbExecutionStore {
    async fn upsert_snapshot(&self, snapshot: ExecutionSnapshot) -> Result<()> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.store_snapshot(&snapshot))
            .await
            .context("Snapshot write task panicked")?
    }

    async fn get_snapshot(&self, execution_id: ExecutionId) -> Result<Option<ExecutionSnapshot>> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.load_snapshot(&execution_id))
            .await
            .context("Snapshot read task panicked")?
    }
}
