//! Checkpoints: durable snapshots of a run's [`TaskState`].
//!
//! Saves are monotonic per run: a snapshot for an older iteration never
//! replaces a newer one. The runtime clears a run's checkpoint once the run
//! reaches a terminal stop reason.

use crate::state::TaskState;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use taskloop_core::{Error, Result};
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Checkpoint {
    pub run_id: String,
    pub iteration: usize,
    pub state: TaskState,
    pub saved_at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, run_id: &str, iteration: usize, state: &TaskState) -> Result<()>;
    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>>;
    async fn clear(&self, run_id: &str) -> Result<()>;
}

fn supersedes(existing: Option<usize>, iteration: usize) -> bool {
    existing.map_or(true, |prev| iteration >= prev)
}

/// Process-local store.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: DashMap<String, Checkpoint>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, run_id: &str, iteration: usize, state: &TaskState) -> Result<()> {
        let mut entry = self
            .checkpoints
            .entry(run_id.to_string())
            .or_insert_with(|| Checkpoint {
                run_id: run_id.to_string(),
                iteration,
                state: state.clone(),
                saved_at: Utc::now(),
            });
        if supersedes(Some(entry.iteration), iteration) {
            entry.iteration = iteration;
            entry.state = state.clone();
            entry.saved_at = Utc::now();
        } else {
            debug!(run_id, iteration, kept = entry.iteration, "ignoring stale checkpoint");
        }
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.checkpoints.get(run_id).map(|c| c.clone()))
    }

    async fn clear(&self, run_id: &str) -> Result<()> {
        self.checkpoints.remove(run_id);
        Ok(())
    }
}

/// One JSON file per run under a directory. Writes go to a temp file first
/// and are renamed into place, so a crash never leaves a torn checkpoint.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, run_id: &str) -> Result<PathBuf> {
        if run_id.is_empty()
            || !run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::Checkpoint(format!("invalid run id: {:?}", run_id)));
        }
        Ok(self.dir.join(format!("{}.json", run_id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<Checkpoint>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| Error::Checkpoint(format!("corrupt checkpoint {}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait::async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, run_id: &str, iteration: usize, state: &TaskState) -> Result<()> {
        let path = self.path(run_id)?;
        let existing = self.read(&path).await.ok().flatten().map(|c| c.iteration);
        if !supersedes(existing, iteration) {
            debug!(run_id, iteration, "ignoring stale checkpoint");
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.dir).await?;
        let checkpoint = Checkpoint {
            run_id: run_id.to_string(),
            iteration,
            state: state.clone(),
            saved_at: Utc::now(),
        };
        let json = serde_json::to_vec_pretty(&checkpoint)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(run_id, iteration, path = %path.display(), "checkpoint written");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.path(run_id)?;
        self.read(&path).await
    }

    async fn clear(&self, run_id: &str) -> Result<()> {
        let path = self.path(run_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
