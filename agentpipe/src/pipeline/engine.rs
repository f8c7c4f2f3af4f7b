//! Public entry point: start, query, cancel and await runs.

use super::scheduler::Scheduler;
use super::validate;
use crate::cancellation::CancellationToken;
use crate::config::EngineConfig;
use crate::core::{ContextMap, PipelineDefinition, PipelineRun};
use crate::errors::PipelineError;
use crate::events::EventBus;
use crate::executor::Executor;
use crate::store::{FileStateStore, StateStore};
use crate::utils::generate_run_id;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info};

/// In-memory handle on a run started by this engine.
struct RunHandle {
    run: Arc<RwLock<PipelineRun>>,
    cancel: Arc<CancellationToken>,
    done: watch::Receiver<bool>,
}

/// Runs pipeline definitions against an [`Executor`].
///
/// Each started run is driven by its own scheduler task. The engine keeps a
/// handle on a run only while it executes, so status queries for live runs
/// are answered from memory. Finished runs, and runs from an earlier
/// process, are read back from the [`StateStore`].
pub struct PipelineEngine {
    config: EngineConfig,
    executor: Arc<dyn Executor>,
    store: Arc<dyn StateStore>,
    events: Arc<EventBus>,
    runs: Arc<DashMap<String, RunHandle>>,
}

impl PipelineEngine {
    /// Creates an engine persisting to a [`FileStateStore`] under
    /// `config.state_dir`.
    #[must_use]
    pub fn new(config: EngineConfig, executor: Arc<dyn Executor>) -> Self {
        let store = Arc::new(FileStateStore::new(config.state_dir.clone()));
        Self {
            config,
            executor,
            store,
            events: Arc::new(EventBus::new()),
            runs: Arc::new(DashMap::new()),
        }
    }

    /// Replaces the state store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the event bus, e.g. to share one bus between engines.
    #[must_use]
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    /// The event bus every run publishes to.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates `definition`, persists the pending run and starts its
    /// scheduler. Returns the new run id.
    ///
    /// Must be called within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Validation`] for an invalid definition, in
    /// which case no run is created and nothing is persisted, or
    /// [`PipelineError::Config`] for an invalid configuration.
    pub async fn start_pipeline(
        &self,
        definition: PipelineDefinition,
        context: ContextMap,
    ) -> Result<String, PipelineError> {
        self.config.validate()?;
        validate(&definition)?;

        let run_id = generate_run_id();
        let run = PipelineRun::new(&run_id, &definition);
        if let Err(e) = self.store.save(&run).await {
            error!(run_id = %run_id, error = %e, "Failed to persist initial run state");
        }

        let run = Arc::new(RwLock::new(run));
        let cancel = CancellationToken::shared();
        let (done_tx, done_rx) = watch::channel(false);

        self.runs.insert(
            run_id.clone(),
            RunHandle {
                run: run.clone(),
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let scheduler = Scheduler::new(
            Arc::new(definition),
            run,
            context,
            self.executor.clone(),
            self.store.clone(),
            self.events.clone(),
            cancel,
            self.config.max_concurrent_jobs,
            self.config.cancel_grace(),
        );
        let runs = self.runs.clone();
        let finished_id = run_id.clone();
        tokio::spawn(async move {
            scheduler.run().await;
            // The final snapshot is persisted by now; later queries go to the
            // store.
            runs.remove(&finished_id);
            let _ = done_tx.send(true);
        });

        info!(run_id = %run_id, "Pipeline submitted");
        Ok(run_id)
    }

    /// Returns the latest snapshot of a run, or `None` if neither this engine
    /// nor the state store knows it.
    pub async fn get_pipeline_status(&self, run_id: &str) -> Option<PipelineRun> {
        if let Some(handle) = self.runs.get(run_id) {
            return Some(handle.run.read().clone());
        }

        match self.store.load(run_id).await {
            Ok(run) => Some(run),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Failed to load run state");
                None
            }
        }
    }

    /// Requests cancellation of a running run.
    ///
    /// Returns true iff the run is executing on this engine, not yet
    /// terminal, and this call initiated the cancellation. An accepted
    /// cancellation always ends the run cancelled.
    pub fn cancel_pipeline(&self, run_id: &str) -> bool {
        self.cancel_pipeline_with_reason(run_id, "Cancelled by caller")
    }

    /// [`cancel_pipeline`](Self::cancel_pipeline) with an explicit reason.
    pub fn cancel_pipeline_with_reason(&self, run_id: &str, reason: &str) -> bool {
        let Some(handle) = self.runs.get(run_id) else {
            debug!(run_id = %run_id, "Cancel requested for unknown run");
            return false;
        };
        // Hold the read lock while cancelling so the scheduler cannot settle
        // the run between the check and the request.
        let run = handle.run.read();
        if run.is_terminal() {
            return false;
        }
        let initiated = handle.cancel.cancel(reason);
        drop(run);
        if initiated {
            info!(run_id = %run_id, reason, "Pipeline cancellation requested");
        }
        initiated
    }

    /// Waits until the run is terminal and returns its final snapshot.
    ///
    /// A run not executing on this engine is answered from the store as is.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::RunNotFound`] for an unknown run.
    pub async fn wait_for_completion(&self, run_id: &str) -> Result<PipelineRun, PipelineError> {
        let handle = self
            .runs
            .get(run_id)
            .map(|handle| (handle.run.clone(), handle.done.clone()));

        let Some((run, mut done)) = handle else {
            return match self.store.load(run_id).await {
                Ok(run) => Ok(run),
                Err(e) if e.is_not_found() => Err(PipelineError::RunNotFound(run_id.to_string())),
                Err(e) => Err(e.into()),
            };
        };

        // A dropped sender means the scheduler task ended; the snapshot is
        // as final as it will get.
        let _ = done.wait_for(|finished| *finished).await;
        let snapshot = run.read().clone();
        Ok(snapshot)
    }

    /// Ids of every run in the state store.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Store`] if the store cannot be listed.
    pub async fn list_runs(&self) -> Result<Vec<String>, PipelineError> {
        Ok(self.store.list().await?)
    }

    /// Number of runs this engine currently holds in memory.
    #[must_use]
    pub fn tracked_run_count(&self) -> usize {
        self.runs.len()
    }

    /// Ids of runs started by this engine that are not yet terminal.
    #[must_use]
    pub fn active_runs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .runs
            .iter()
            .filter(|entry| !entry.value().run.read().is_terminal())
            .map(|entry| entry.key().clone())
            .collect();
        ids.sort();
        ids
    }
}

impl std::fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("config", &self.config)
            .field("runs", &self.runs.len())
            .finish_non_exhaustive()
    }
}
