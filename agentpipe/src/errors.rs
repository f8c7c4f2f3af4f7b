//! Error types for the agentpipe engine.
//!
//! Validation errors are raised synchronously when a definition is submitted,
//! store errors describe the durable state backend, and [`PipelineError`] ties
//! them together for the public engine surface. Executor failures are plain
//! [`anyhow::Error`] values and never appear here: they are job outcomes, not
//! engine errors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for engine operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The submitted definition failed validation.
    #[error("{0}")]
    Validation(#[from] PipelineValidationError),

    /// The state store failed.
    #[error("{0}")]
    Store(#[from] StateStoreError),

    /// No run with the given id is known to the engine or its store.
    #[error("Pipeline run not found: {0}")]
    RunNotFound(String),

    /// Invalid engine configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "PIPELINE-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info, pre-filled with the default
    /// suggestion for `code` when one exists.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        let code = code.into();
        let fix_hint = ContractSuggestions::get(&code).map(str::to_string);
        Self {
            code,
            summary: summary.into(),
            fix_hint,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// The category of a validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorKind {
    /// The definition declares no jobs.
    Empty,
    /// Two jobs share an id.
    DuplicateJobId,
    /// A `dependsOn` entry names an undeclared job.
    MissingDependency,
    /// The dependency graph contains a cycle.
    Cycle,
    /// A retry policy is out of range.
    InvalidRetryPolicy,
}

impl ValidationErrorKind {
    /// Returns the contract error code for this kind.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::Empty => "PIPELINE-EMPTY",
            Self::DuplicateJobId => "PIPELINE-DUPLICATE_ID",
            Self::MissingDependency => "PIPELINE-MISSING_DEP",
            Self::Cycle => "PIPELINE-CYCLE",
            Self::InvalidRetryPolicy => "PIPELINE-RETRY_POLICY",
        }
    }
}

/// Error raised when pipeline validation fails.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// What kind of check failed.
    pub kind: ValidationErrorKind,
    /// The error message.
    pub message: String,
    /// The jobs involved in the error.
    pub jobs: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(kind: ValidationErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind,
            error_info: ContractErrorInfo::new(kind.code(), message.clone()),
            message,
            jobs: Vec::new(),
        }
    }

    /// Sets the jobs involved.
    #[must_use]
    pub fn with_jobs(mut self, jobs: Vec<String>) -> Self {
        self.jobs = jobs;
        self
    }

    /// Replaces the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = info;
        self
    }
}

/// Error raised when a cycle is detected in the dependency graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of jobs forming the cycle; first and last entries are equal.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for PipelineValidationError {
    fn from(err: CycleDetectedError) -> Self {
        let message = err.to_string();
        Self::new(ValidationErrorKind::Cycle, message).with_jobs(err.cycle_path)
    }
}

/// Errors raised by a [`StateStore`](crate::store::StateStore) backend.
#[derive(Debug, Error)]
pub enum StateStoreError {
    /// No snapshot exists for the run.
    #[error("No persisted state for run '{0}'")]
    NotFound(String),

    /// The run id cannot be used as a storage key.
    #[error("Invalid run id '{0}'")]
    InvalidRunId(String),

    /// IO error from a file-backed store.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend is temporarily unavailable.
    #[error("State store unavailable: {0}")]
    Unavailable(String),
}

impl StateStoreError {
    /// Returns true for the not-found condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Provides default suggestions for validation error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "PIPELINE-EMPTY" => Some("Add at least one job to the pipeline definition."),
            "PIPELINE-DUPLICATE_ID" => Some("Give every job a unique id."),
            "PIPELINE-MISSING_DEP" => Some(
                "Ensure every dependsOn entry references a job declared in the same pipeline. \
                 Check for typos in job ids.",
            ),
            "PIPELINE-CYCLE" => Some(
                "Check your job dependencies for circular references. \
                 Remove one of the dependencies in the cycle to break it.",
            ),
            "PIPELINE-RETRY_POLICY" => Some("Set retry.maxAttempts to 1 or more."),
            _ => None,
        }
    }
}
