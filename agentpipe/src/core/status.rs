//! Run and job status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a pipeline run.
///
/// Transitions are monotonic: `pending -> running -> {completed, failed, cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Created but not yet started.
    #[default]
    Pending,
    /// The scheduler loop is dispatching jobs.
    Running,
    /// Every job completed or was skipped, with no hard failure.
    Completed,
    /// At least one job failed without `continueOnError`.
    Failed,
    /// Cancellation was requested before the run finished.
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if moving from `self` to `next` respects the run lifecycle.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::Pending => next != Self::Pending,
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

/// The execution status of a single job within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Not yet evaluated.
    #[default]
    Pending,
    /// Waiting on at least one unfinished dependency.
    Blocked,
    /// Every dependency is satisfied; waiting for a concurrency slot.
    Ready,
    /// The executor is running.
    Running,
    /// The last attempt failed and a retry is scheduled.
    Retrying,
    /// The executor succeeded.
    Completed,
    /// Every attempt failed.
    Failed,
    /// Pruned because an upstream job failed or was skipped.
    Skipped,
    /// Never dispatched, or stopped, because the run was cancelled.
    Cancelled,
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Blocked => write!(f, "blocked"),
            Self::Ready => write!(f, "ready"),
            Self::Running => write!(f, "running"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl JobStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }

    /// Returns true while the job holds a concurrency slot.
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Retrying)
    }

    /// Returns true if the job has not been dispatched yet.
    #[must_use]
    pub fn is_undispatched(&self) -> bool {
        matches!(self, Self::Pending | Self::Blocked | Self::Ready)
    }
}
