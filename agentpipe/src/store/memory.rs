//! Volatile store for tests and embedding.

use super::StateStore;
use crate::core::PipelineRun;
use crate::errors::StateStoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// In-memory state store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStateStore {
    runs: Arc<Mutex<HashMap<String, PipelineRun>>>,
    saves: Arc<Mutex<usize>>,
}

impl InMemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored runs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.lock().len()
    }

    /// Returns true if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.lock().is_empty()
    }

    /// Total number of successful saves.
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn save(&self, run: &PipelineRun) -> Result<(), StateStoreError> {
        self.runs.lock().insert(run.run_id.clone(), run.clone());
        *self.saves.lock() += 1;
        Ok(())
    }

    async fn load(&self, run_id: &str) -> Result<PipelineRun, StateStoreError> {
        self.runs
            .lock()
            .get(run_id)
            .cloned()
            .ok_or_else(|| StateStoreError::NotFound(run_id.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>, StateStoreError> {
        let mut ids: Vec<String> = self.runs.lock().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
