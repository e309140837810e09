use std::path::{Path, PathBuf};
use std::time::SystemTime;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use maestro_core::config::MaestroConfig;
use maestro_core::error::{MaestroError, Result};

use super::{CheckpointState, CheckpointStore};

/// One JSON file per save, named `{workflow_id}_{step_index}_{unix_ts}.json`
/// with the id percent-encoded.
///
/// Files are written to a temp name and renamed into place. Lookups scan
/// the directory and read each document's `workflow_id`; "latest" is the
/// newest file by modification time.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

struct Entry {
    path: PathBuf,
    modified: SystemTime,
    state: CheckpointState,
}

impl Entry {
    fn sort_key(&self) -> (SystemTime, chrono::DateTime<chrono::Utc>, usize) {
        (self.modified, self.state.timestamp, self.state.step_index)
    }
}

impl FileCheckpointStore {
    /// The directory is created on first save.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_config(config: &MaestroConfig) -> Self {
        Self::new(config.checkpoint_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Percent-encodes the id so distinct ids never share a file name.
    fn file_name(state: &CheckpointState) -> String {
        format!(
            "{}_{}_{}.json",
            urlencoding::encode(&state.workflow_id),
            state.step_index,
            state.timestamp.timestamp()
        )
    }

    async fn scan(&self) -> Result<Vec<Entry>> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };

        let mut entries = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let modified = item.metadata().await?.modified()?;
            let content = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<CheckpointState>(&content) {
                Ok(state) => entries.push(Entry {
                    path,
                    modified,
                    state,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint"),
            }
        }
        Ok(entries)
    }

    /// Every checkpoint on disk with its path, oldest first.
    pub async fn list(&self) -> Result<Vec<(PathBuf, CheckpointState)>> {
        let mut entries = self.scan().await?;
        entries.sort_by_key(Entry::sort_key);
        Ok(entries.into_iter().map(|e| (e.path, e.state)).collect())
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, state: CheckpointState) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
                MaestroError::Checkpoint(format!(
                    "Failed to create checkpoint directory {}: {}",
                    self.dir.display(),
                    e
                ))
            })?;

            let name = Self::file_name(&state);
            let path = self.dir.join(&name);
            let tmp = self.dir.join(format!(".{}.tmp", name));
            let json = serde_json::to_string_pretty(&state)?;

            tokio::fs::write(&tmp, json).await.map_err(|e| {
                MaestroError::Checkpoint(format!("Failed to write {}: {}", tmp.display(), e))
            })?;
            tokio::fs::rename(&tmp, &path).await.map_err(|e| {
                MaestroError::Checkpoint(format!("Failed to move {} into place: {}", path.display(), e))
            })?;

            debug!(
                workflow_id = %state.workflow_id,
                step_index = state.step_index,
                path = %path.display(),
                "Checkpoint saved"
            );
            Ok(())
        })
    }

    fn load<'a>(&'a self, workflow_id: &'a str) -> BoxFuture<'a, Result<Option<CheckpointState>>> {
        Box::pin(async move {
            Ok(self
                .scan()
                .await?
                .into_iter()
                .filter(|e| e.state.workflow_id == workflow_id)
                .max_by_key(Entry::sort_key)
                .map(|e| e.state))
        })
    }

    fn latest_checkpoint(&self) -> BoxFuture<'_, Result<Option<CheckpointState>>> {
        Box::pin(async move {
            Ok(self
                .scan()
                .await?
                .into_iter()
                .max_by_key(Entry::sort_key)
                .map(|e| e.state))
        })
    }

    fn clear<'a>(&'a self, workflow_id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut removed = 0usize;
            for entry in self.scan().await? {
                if entry.state.workflow_id == workflow_id {
                    tokio::fs::remove_file(&entry.path).await?;
                    removed += 1;
                }
            }
            debug!(workflow_id = %workflow_id, removed, "Checkpoints cleared");
            Ok(())
        })
    }
}
