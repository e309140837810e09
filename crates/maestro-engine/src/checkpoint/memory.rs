use std::collections::HashMap;

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use maestro_core::error::Result;

use super::{CheckpointState, CheckpointStore};

/// In-process store. Saves append per workflow; nothing is dropped until `clear`.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    seq: u64,
    by_workflow: HashMap<String, Vec<(u64, CheckpointState)>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every saved state for `workflow_id`, oldest first.
    pub async fn history(&self, workflow_id: &str) -> Vec<CheckpointState> {
        self.inner
            .lock()
            .await
            .by_workflow
            .get(workflow_id)
            .map(|entries| entries.iter().map(|(_, s)| s.clone()).collect())
            .unwrap_or_default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, state: CheckpointState) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut inner = self.inner.lock().await;
            inner.seq += 1;
            let seq = inner.seq;
            inner
                .by_workflow
                .entry(state.workflow_id.clone())
                .or_default()
                .push((seq, state));
            Ok(())
        })
    }

    fn load<'a>(&'a self, workflow_id: &'a str) -> BoxFuture<'a, Result<Option<CheckpointState>>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .by_workflow
                .get(workflow_id)
                .and_then(|entries| entries.last())
                .map(|(_, s)| s.clone()))
        })
    }

    fn latest_checkpoint(&self) -> BoxFuture<'_, Result<Option<CheckpointState>>> {
        Box::pin(async move {
            let inner = self.inner.lock().await;
            Ok(inner
                .by_workflow
                .values()
                .filter_map(|entries| entries.last())
                .max_by_key(|(seq, _)| *seq)
                .map(|(_, s)| s.clone()))
        })
    }

    fn clear<'a>(&'a self, workflow_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.inner.lock().await.by_workflow.remove(workflow_id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_save_wins() {
        let store = MemoryCheckpointStore::new();
        store.save(CheckpointState::new("wf", 1, "one")).await.unwrap();
        store.save(CheckpointState::new("wf", 2, "two")).await.unwrap();

        let loaded = store.load("wf").await.unwrap().unwrap();
        assert_eq!(loaded.step_index, 2);
        assert_eq!(loaded.intermediate_output, "two");
        assert_eq!(store.history("wf").await.len(), 2);
    }

    #[tokio::test]
    async fn test_latest_across_workflows() {
        let store = MemoryCheckpointStore::new();
        store.save(CheckpointState::new("a", 1, "a1")).await.unwrap();
        store.save(CheckpointState::new("b", 1, "b1")).await.unwrap();
        store.save(CheckpointState::new("a", 2, "a2")).await.unwrap();

        let latest = store.latest_checkpoint().await.unwrap().unwrap();
        assert_eq!(latest.workflow_id, "a");
        assert_eq!(latest.step_index, 2);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = MemoryCheckpointStore::new();
        store.save(CheckpointState::new("wf", 1, "x")).await.unwrap();
        store.clear("wf").await.unwrap();
        assert!(store.load("wf").await.unwrap().is_none());
        assert!(store.latest_checkpoint().await.unwrap().is_none());
        // Clearing an unknown id is fine.
        store.clear("missing").await.unwrap();
    }
}
