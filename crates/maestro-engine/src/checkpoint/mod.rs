//! Persisted snapshots of workflow progress.
//!
//! `CheckpointStore` is the seam for durable backends. Two stores ship here:
//! [`MemoryCheckpointStore`] for tests and single-process runs, and
//! [`FileCheckpointStore`], one JSON document per save.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use maestro_core::error::Result;
use maestro_core::types::Metadata;

pub use file::FileCheckpointStore;
pub use maestro_core::config::CheckpointPolicy;
pub use memory::MemoryCheckpointStore;

/// A single checkpoint snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub workflow_id: String,
    /// Index of the next step to run, i.e. the number of steps completed.
    pub step_index: usize,
    /// Output of the last completed step; input to `step_index`.
    pub intermediate_output: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub timestamp: DateTime<Utc>,
}

impl CheckpointState {
    pub fn new(
        workflow_id: impl Into<String>,
        step_index: usize,
        intermediate_output: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step_index,
            intermediate_output: intermediate_output.into(),
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Storage for checkpoints, keyed by workflow id.
pub trait CheckpointStore: Send + Sync + 'static {
    fn save(&self, state: CheckpointState) -> BoxFuture<'_, Result<()>>;

    /// Most recently saved state for `workflow_id`.
    fn load<'a>(&'a self, workflow_id: &'a str) -> BoxFuture<'a, Result<Option<CheckpointState>>>;

    /// Most recently saved state across all workflows.
    fn latest_checkpoint(&self) -> BoxFuture<'_, Result<Option<CheckpointState>>>;

    /// Remove every checkpoint for `workflow_id`.
    fn clear<'a>(&'a self, workflow_id: &'a str) -> BoxFuture<'a, Result<()>>;
}
