use anyhow::{Context, Result};
use forgeflow_core::storage::RedbExecutionStore;
use forgeflow_core::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_store_file")]
    pub store_file: String,
}

fn default_store_file() -> String {
    "executions.redb".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_file: default_store_file(),
        }
    }
}

impl CliConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self {
                data_dir: data_dir.clone(),
                storage: Default::default(),
                tracker: Default::default(),
            }
        };

        config.data_dir = data_dir;

        Ok(config)
    }

    /// Path of the execution snapshot database
    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.store_file)
    }

    pub fn open_store(&self) -> Result<RedbExecutionStore> {
        RedbExecutionStore::new(self.store_path()).context("Failed to open execution store")
    }
}
