//! Typed lifecycle events published by the scheduler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a [`PipelineEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// `pipeline:started`
    #[serde(rename = "pipeline:started")]
    PipelineStarted,
    /// `pipeline:completed`
    #[serde(rename = "pipeline:completed")]
    PipelineCompleted,
    /// `pipeline:failed`
    #[serde(rename = "pipeline:failed")]
    PipelineFailed,
    /// `pipeline:cancelled`
    #[serde(rename = "pipeline:cancelled")]
    PipelineCancelled,
    /// `job:started`
    #[serde(rename = "job:started")]
    JobStarted,
    /// `job:completed`
    #[serde(rename = "job:completed")]
    JobCompleted,
    /// `job:failed`
    #[serde(rename = "job:failed")]
    JobFailed,
    /// `job:retrying`
    #[serde(rename = "job:retrying")]
    JobRetrying,
    /// `job:skipped`
    #[serde(rename = "job:skipped")]
    JobSkipped,
    /// `job:progress`
    #[serde(rename = "job:progress")]
    JobProgress,
}

impl EventKind {
    /// Returns the wire name, e.g. `job:started`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline:started",
            Self::PipelineCompleted => "pipeline:completed",
            Self::PipelineFailed => "pipeline:failed",
            Self::PipelineCancelled => "pipeline:cancelled",
            Self::JobStarted => "job:started",
            Self::JobCompleted => "job:completed",
            Self::JobFailed => "job:failed",
            Self::JobRetrying => "job:retrying",
            Self::JobSkipped => "job:skipped",
            Self::JobProgress => "job:progress",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle transition of a run or one of its jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum PipelineEvent {
    /// The run moved to `running`.
    #[serde(rename = "pipeline:started")]
    PipelineStarted {
        /// Run id.
        run_id: String,
        /// Definition name.
        definition_name: String,
    },
    /// The run completed.
    #[serde(rename = "pipeline:completed")]
    PipelineCompleted {
        /// Run id.
        run_id: String,
        /// Final progress.
        progress: u8,
    },
    /// The run failed.
    #[serde(rename = "pipeline:failed")]
    PipelineFailed {
        /// Run id.
        run_id: String,
        /// Jobs that failed without `continueOnError`.
        failed_jobs: Vec<String>,
    },
    /// The run was cancelled.
    #[serde(rename = "pipeline:cancelled")]
    PipelineCancelled {
        /// Run id.
        run_id: String,
        /// Reason given to the cancellation request.
        reason: Option<String>,
    },
    /// A job attempt was dispatched.
    #[serde(rename = "job:started")]
    JobStarted {
        /// Run id.
        run_id: String,
        /// Job id.
        job_id: String,
        /// Attempt number, starting at 1.
        attempt: u32,
    },
    /// A job completed.
    #[serde(rename = "job:completed")]
    JobCompleted {
        /// Run id.
        run_id: String,
        /// Job id.
        job_id: String,
        /// Attempts used.
        attempts: u32,
        /// Duration of the successful attempt.
        duration_ms: u64,
    },
    /// A job exhausted its attempts.
    #[serde(rename = "job:failed")]
    JobFailed {
        /// Run id.
        run_id: String,
        /// Job id.
        job_id: String,
        /// Attempts used.
        attempts: u32,
        /// Error of the last attempt.
        error: String,
    },
    /// A job attempt failed and another one is scheduled.
    #[serde(rename = "job:retrying")]
    JobRetrying {
        /// Run id.
        run_id: String,
        /// Job id.
        job_id: String,
        /// The attempt that just failed.
        attempt: u32,
        /// Back-off before the next attempt.
        delay_ms: u64,
        /// Error of the failed attempt.
        error: String,
    },
    /// A job was pruned by an upstream failure.
    #[serde(rename = "job:skipped")]
    JobSkipped {
        /// Run id.
        run_id: String,
        /// Job id.
        job_id: String,
        /// The dependency that caused the skip.
        cause: String,
    },
    /// The executor reported progress.
    #[serde(rename = "job:progress")]
    JobProgress {
        /// Run id.
        run_id: String,
        /// Job id.
        job_id: String,
        /// Reported percentage, 0 to 100.
        percent: u8,
    },
}

impl PipelineEvent {
    /// Returns the event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PipelineStarted { .. } => EventKind::PipelineStarted,
            Self::PipelineCompleted { .. } => EventKind::PipelineCompleted,
            Self::PipelineFailed { .. } => EventKind::PipelineFailed,
            Self::PipelineCancelled { .. } => EventKind::PipelineCancelled,
            Self::JobStarted { .. } => EventKind::JobStarted,
            Self::JobCompleted { .. } => EventKind::JobCompleted,
            Self::JobFailed { .. } => EventKind::JobFailed,
            Self::JobRetrying { .. } => EventKind::JobRetrying,
            Self::JobSkipped { .. } => EventKind::JobSkipped,
            Self::JobProgress { .. } => EventKind::JobProgress,
        }
    }

    /// Returns the wire name, e.g. `pipeline:started`.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    /// Returns the run this event belongs to.
    #[must_use]
    pub fn run_id(&self) -> &str {
        match self {
            Self::PipelineStarted { run_id, .. }
            | Self::PipelineCompleted { run_id, .. }
            | Self::PipelineFailed { run_id, .. }
            | Self::PipelineCancelled { run_id, .. }
            | Self::JobStarted { run_id, .. }
            | Self::JobCompleted { run_id, .. }
            | Self::JobFailed { run_id, .. }
            | Self::JobRetrying { run_id, .. }
            | Self::JobSkipped { run_id, .. }
            | Self::JobProgress { run_id, .. } => run_id,
        }
    }

    /// Returns the job this event belongs to, if any.
    #[must_use]
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::JobStarted { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobRetrying { job_id, .. }
            | Self::JobSkipped { job_id, .. }
            | Self::JobProgress { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}
