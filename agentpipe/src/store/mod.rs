//! Durable run state.
//!
//! A [`StateStore`] keeps one snapshot of each [`PipelineRun`] keyed by run
//! id. The scheduler saves after every state change; the engine loads from
//! the store to answer status queries for runs it no longer holds in memory.

mod file;
mod memory;

pub use file::FileStateStore;
pub use memory::InMemoryStateStore;

use crate::core::PipelineRun;
use crate::errors::StateStoreError;
use async_trait::async_trait;

/// Key-value persistence of run snapshots.
///
/// The engine never deletes persisted runs; retention is the caller's
/// concern.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Writes the current snapshot of a run, replacing any previous one.
    async fn save(&self, run: &PipelineRun) -> Result<(), StateStoreError>;

    /// Reads the latest snapshot of a run.
    ///
    /// Returns [`StateStoreError::NotFound`] when the run is unknown.
    async fn load(&self, run_id: &str) -> Result<PipelineRun, StateStoreError>;

    /// Lists the ids of every persisted run, sorted.
    async fn list(&self) -> Result<Vec<String>, StateStoreError>;
}
