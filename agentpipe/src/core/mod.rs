//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the engine:
//! - Pipeline and job definitions (immutable input)
//! - Run and job state (the mutable aggregate)
//! - Status enums and lifecycle events

mod definition;
mod event;
mod run;
mod status;

pub use definition::{JobDefinition, PipelineDefinition};
pub use event::{EventKind, PipelineEvent};
pub use run::{JobRunState, PipelineRun};
pub use status::{JobStatus, RunStatus};

/// Key/value context visible to every job of a run.
pub type ContextMap = std::collections::HashMap<String, serde_json::Value>;
