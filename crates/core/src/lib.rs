// Workflow execution orchestration core for Forgeflow

pub mod error;
pub mod events;
pub mod metrics;
pub mod query;
pub mod storage;
pub mod tracker;
pub mod types;
pub mod workflow;

pub use error::{DagError, TrackerError};
pub use tracker::{ExecutionTracker, TrackerConfig};
pub use types::*;
