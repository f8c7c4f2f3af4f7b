//! # Agentpipe
//!
//! A DAG job orchestrator for long-running agent tasks.
//!
//! Agentpipe runs a set of named, interdependent jobs, each delegated to an
//! opaque [`Executor`](executor::Executor), with:
//!
//! - **Bounded concurrency**: at most `maxConcurrentJobs` executors in flight per run
//! - **Retry policies**: fixed or exponential back-off per job
//! - **Cascading skip**: a hard failure prunes its downstream subgraph only
//! - **Durable state**: every state change is persisted through a [`StateStore`](store::StateStore)
//! - **Lifecycle events**: `pipeline:*` and `job:*` events on an [`EventBus`](events::EventBus)
//! - **Cooperative cancellation**: an abort signal shared with every executor
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use agentpipe::prelude::*;
//!
//! let executor = FnExecutor::new(|job: JobDefinition, _ctx, _opts| async move {
//!     Ok(ExecutionSuccess::new(serde_json::json!({ "done": job.id })))
//! });
//! let engine = PipelineEngine::new(EngineConfig::default(), Arc::new(executor));
//!
//! let definition = PipelineDefinition::new("release")
//!     .job(JobDefinition::new("build", "coder", "compile the project"))
//!     .job(JobDefinition::new("test", "tester", "run the suite").with_dependency("build"));
//!
//! let run_id = engine.start_pipeline(definition, ContextMap::new()).await?;
//! let run = engine.wait_for_completion(&run_id).await?;
//! assert_eq!(run.status, RunStatus::Completed);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        ContextMap, EventKind, JobDefinition, JobRunState, JobStatus, PipelineDefinition,
        PipelineEvent, PipelineRun, RunStatus,
    };
    pub use crate::errors::{
        ContractErrorInfo, PipelineError, PipelineValidationError, StateStoreError,
        ValidationErrorKind,
    };
    pub use crate::events::{CollectingEventSink, EventBus, EventSink, LoggingEventSink};
    pub use crate::executor::{ExecutionOptions, ExecutionSuccess, Executor, FnExecutor};
    pub use crate::pipeline::{validate, Backoff, JitterStrategy, PipelineEngine, RetryPolicy};
    pub use crate::store::{FileStateStore, InMemoryStateStore, StateStore};
    pub use crate::utils::{generate_run_id, iso_timestamp, Timestamp};
    pub use std::sync::Arc;
}
