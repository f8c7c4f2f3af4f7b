//! One JSON document per run under a state directory.

use super::StateStore;
use crate::core::PipelineRun;
use crate::errors::StateStoreError;
use crate::utils::is_valid_run_id;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

const EXTENSION: &str = "json";

/// File-backed store writing `<dir>/<runId>.json`.
///
/// Writes go to a temporary file that is renamed into place, so a reader
/// never observes a half-written snapshot.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Creates a store rooted at `dir`. The directory is created lazily on
    /// the first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The state directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot for `run_id`.
    ///
    /// # Errors
    ///
    /// Rejects ids that are not safe as a file name.
    pub fn path_for(&self, run_id: &str) -> Result<PathBuf, StateStoreError> {
        if !is_valid_run_id(run_id) {
            return Err(StateStoreError::InvalidRunId(run_id.to_string()));
        }
        Ok(self.dir.join(format!("{run_id}.{EXTENSION}")))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save(&self, run: &PipelineRun) -> Result<(), StateStoreError> {
        let path = self.path_for(&run.run_id)?;
        let bytes = serde_json::to_vec_pretty(run)?;

        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension(format!("{EXTENSION}.tmp"));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(run_id = %run.run_id, path = %path.display(), "Saved run snapshot");
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<PipelineRun, StateStoreError> {
        let path = self.path_for(run_id)?;
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StateStoreError::NotFound(run_id.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn list(&self) -> Result<Vec<String>, StateStoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}
