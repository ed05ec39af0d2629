use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Execution tracker options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// How often a partial snapshot is pushed to the store
    #[serde(default = "default_db_update_interval_ms")]
    pub db_update_interval_ms: u64,

    /// Keep step outputs in `intermediate_results`
    #[serde(default)]
    pub store_intermediate_results: bool,

    /// Outputs whose JSON encoding is this many bytes or more are not kept
    #[serde(default = "default_max_intermediate_results_size")]
    pub max_intermediate_results_size: usize,
}

fn default_db_update_interval_ms() -> u64 {
    5_000
}

fn default_max_intermediate_results_size() -> usize {
    10 * 1024
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            db_update_interval_ms: default_db_update_interval_ms(),
            store_intermediate_results: false,
            max_intermediate_results_size: default_max_intermediate_results_size(),
        }
    }
}

impl TrackerConfig {
    pub fn db_update_interval(&self) -> Duration {
        Duration::from_millis(self.db_update_interval_ms.max(1))
    }
}
