//! # Staging Area
//!
//! Durable holding area for exported-but-not-yet-loaded records. Export
//! writes one chunk per source page, then saves a checkpoint naming the
//! next source offset; a crash between the two at worst re-exports one
//! page into the same chunk slot.

use crate::config::MigrationSettings;
use crate::error::{GridloadError, Result};
use crate::models::{CanonicalRow, Checkpoint};
use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait StagingArea: Send + Sync {
    /// Write (or overwrite) chunk `index` for a job
    async fn write_chunk(&self, job_id: &str, index: usize, records: &[CanonicalRow]) -> Result<()>;

    async fn read_chunk(&self, job_id: &str, index: usize) -> Result<Vec<CanonicalRow>>;

    /// Store the checkpoint unless the stored one is further along
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;

    async fn load_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>>;

    /// Remove every chunk and the checkpoint for a job
    async fn purge(&self, job_id: &str) -> Result<()>;

    /// Whether anything is staged for the job
    async fn has_data(&self, job_id: &str) -> Result<bool>;
}

/// Filesystem staging when a staging directory is configured, memory otherwise
pub fn staging_area_for(settings: &MigrationSettings) -> Arc<dyn StagingArea> {
    match &settings.staging_directory {
        Some(root) => Arc::new(FileStagingArea::new(root.clone())),
        None => Arc::new(InMemoryStagingArea::new()),
    }
}

#[derive(Debug, Default)]
struct StagedJob {
    chunks: BTreeMap<usize, Vec<CanonicalRow>>,
    checkpoint: Option<Checkpoint>,
}

#[derive(Debug, Default)]
pub struct InMemoryStagingArea {
    jobs: Mutex<HashMap<String, StagedJob>>,
}

impl InMemoryStagingArea {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_count(&self, job_id: &str) -> usize {
        self.jobs.lock().get(job_id).map_or(0, |j| j.chunks.len())
    }
}

#[async_trait]
impl StagingArea for InMemoryStagingArea {
    async fn write_chunk(&self, job_id: &str, index: usize, records: &[CanonicalRow]) -> Result<()> {
        self.jobs
            .lock()
            .entry(job_id.to_string())
            .or_default()
            .chunks
            .insert(index, records.to_vec());
        Ok(())
    }

    async fn read_chunk(&self, job_id: &str, index: usize) -> Result<Vec<CanonicalRow>> {
        self.jobs
            .lock()
            .get(job_id)
            .and_then(|j| j.chunks.get(&index).cloned())
            .ok_or_else(|| GridloadError::Staging(format!("chunk {index} of job {job_id} is missing")))
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let staged = jobs.entry(checkpoint.job_id.clone()).or_default();
        if staged.checkpoint.as_ref().is_some_and(|stored| checkpoint.regresses(stored)) {
            debug!(job_id = %checkpoint.job_id, chunks = checkpoint.chunks_written, "Ignored stale checkpoint");
            return Ok(());
        }
        staged.checkpoint = Some(checkpoint.clone());
        Ok(())
    }

    async fn load_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self.jobs.lock().get(job_id).and_then(|j| j.checkpoint.clone()))
    }

    async fn purge(&self, job_id: &str) -> Result<()> {
        self.jobs.lock().remove(job_id);
        Ok(())
    }

    async fn has_data(&self, job_id: &str) -> Result<bool> {
        Ok(self.jobs.lock().contains_key(job_id))
    }
}

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Staging on the local filesystem
///
/// Layout: `<root>/<job dir>/chunk-000000.json` plus `checkpoint.json`.
/// Every file is written to a temporary name and renamed into place, so a
/// reader never sees a half-written chunk or checkpoint.
#[derive(Debug, Clone)]
pub struct FileStagingArea {
    root: PathBuf,
}

impl FileStagingArea {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a job; ids are sanitized so they cannot escape the root
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        let sanitized: String = job_id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        if sanitized == job_id {
            self.root.join(sanitized)
        } else {
            // Disambiguate ids that sanitize to the same name
            let digest = Sha256::digest(job_id.as_bytes());
            let suffix: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();
            self.root.join(format!("{sanitized}-{suffix}"))
        }
    }

    fn chunk_path(&self, job_id: &str, index: usize) -> PathBuf {
        self.job_dir(job_id).join(format!("chunk-{index:06}.json"))
    }

    async fn write_atomic(&self, path: &Path, bytes: Vec<u8>) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error("create staging directory", parent, e))?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| io_error("rename", path, e))
    }
}

fn io_error(action: &str, path: &Path, error: std::io::Error) -> GridloadError {
    GridloadError::Staging(format!("failed to {action} {}: {error}", path.display()))
}

#[async_trait]
impl StagingArea for FileStagingArea {
    async fn write_chunk(&self, job_id: &str, index: usize, records: &[CanonicalRow]) -> Result<()> {
        let bytes = serde_json::to_vec(records)?;
        let path = self.chunk_path(job_id, index);
        self.write_atomic(&path, bytes).await?;
        debug!(job_id, index, records = records.len(), path = %path.display(), "Staged chunk");
        Ok(())
    }

    async fn read_chunk(&self, job_id: &str, index: usize) -> Result<Vec<CanonicalRow>> {
        let path = self.chunk_path(job_id, index);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| io_error("read", &path, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        if let Some(stored) = self.load_checkpoint(&checkpoint.job_id).await? {
            if checkpoint.regresses(&stored) {
                debug!(job_id = %checkpoint.job_id, chunks = checkpoint.chunks_written, "Ignored stale checkpoint");
                return Ok(());
            }
        }
        let bytes = serde_json::to_vec_pretty(checkpoint)?;
        let path = self.job_dir(&checkpoint.job_id).join(CHECKPOINT_FILE);
        self.write_atomic(&path, bytes).await
    }

    async fn load_checkpoint(&self, job_id: &str) -> Result<Option<Checkpoint>> {
        let path = self.job_dir(job_id).join(CHECKPOINT_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", &path, e)),
        }
    }

    async fn purge(&self, job_id: &str) -> Result<()> {
        let dir = self.job_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &dir, e)),
        }
    }

    async fn has_data(&self, job_id: &str) -> Result<bool> {
        tokio::fs::try_exists(self.job_dir(job_id))
            .await
            .map_err(|e| io_error("inspect", &self.job_dir(job_id), e))
    }
}
