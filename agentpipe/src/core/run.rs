//! Mutable run state: one [`PipelineRun`] per invocation.

use super::{JobStatus, RunStatus};
use crate::core::PipelineDefinition;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// State of a single job inside a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunState {
    /// The job id.
    pub id: String,
    /// Current status.
    pub status: JobStatus,
    /// Dispatch attempts so far, including the first.
    pub attempts: u32,
    /// Executor output, once completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    /// Last error message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the first attempt started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    /// When the job reached a terminal state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Timestamp>,
    /// Duration of the successful attempt in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl JobRunState {
    /// Creates a pending job state.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            attempts: 0,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            duration_ms: None,
        }
    }

    /// Moves the job to a terminal status and stamps its completion time.
    ///
    /// Completing clears the error of any earlier failed attempt.
    pub fn finish(&mut self, status: JobStatus, error: Option<String>) {
        debug_assert!(status.is_terminal());
        self.status = status;
        if status == JobStatus::Completed {
            self.error = None;
        } else if error.is_some() {
            self.error = error;
        }
        self.completed_at = Some(now_utc());
    }
}

/// The mutable aggregate for one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRun {
    /// Unique run id.
    pub run_id: String,
    /// Name of the definition this run executes.
    pub definition_name: String,
    /// Run status.
    pub status: RunStatus,
    /// Job states keyed by job id.
    pub jobs: BTreeMap<String, JobRunState>,
    /// Percentage of jobs in a terminal state, 0 to 100.
    pub progress: u8,
    /// When the run started.
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    /// When the run reached a terminal status.
    #[serde(default)]
    pub completed_at: Option<Timestamp>,
}

impl PipelineRun {
    /// Creates a pending run with one pending job state per declared job.
    #[must_use]
    pub fn new(run_id: impl Into<String>, definition: &PipelineDefinition) -> Self {
        let jobs = definition
            .jobs
            .iter()
            .map(|job| (job.id.clone(), JobRunState::new(&job.id)))
            .collect();

        Self {
            run_id: run_id.into(),
            definition_name: definition.name.clone(),
            status: RunStatus::Pending,
            jobs,
            progress: 0,
            started_at: None,
            completed_at: None,
        }
    }

    /// Returns a job's state.
    #[must_use]
    pub fn job(&self, id: &str) -> Option<&JobRunState> {
        self.jobs.get(id)
    }

    /// Returns a job's state mutably.
    pub fn job_mut(&mut self, id: &str) -> Option<&mut JobRunState> {
        self.jobs.get_mut(id)
    }

    /// Returns a job's status.
    #[must_use]
    pub fn job_status(&self, id: &str) -> Option<JobStatus> {
        self.jobs.get(id).map(|job| job.status)
    }

    /// Returns true once the run is completed, failed or cancelled.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of jobs in a terminal state.
    #[must_use]
    pub fn terminal_job_count(&self) -> usize {
        self.jobs.values().filter(|job| job.status.is_terminal()).count()
    }

    /// Number of jobs currently holding a concurrency slot.
    #[must_use]
    pub fn active_job_count(&self) -> usize {
        self.jobs.values().filter(|job| job.status.is_active()).count()
    }

    /// Ids of jobs with the given status.
    #[must_use]
    pub fn jobs_with_status(&self, status: JobStatus) -> Vec<String> {
        self.jobs
            .values()
            .filter(|job| job.status == status)
            .map(|job| job.id.clone())
            .collect()
    }

    /// Recomputes `progress = round(100 * terminal / total)` and returns it.
    pub fn recompute_progress(&mut self) -> u8 {
        let total = self.jobs.len();
        self.progress = if total == 0 {
            100
        } else {
            let terminal = self.terminal_job_count();
            // round half up in integer arithmetic
            let pct = (200 * terminal + total) / (2 * total);
            u8::try_from(pct.min(100)).unwrap_or(100)
        };
        self.progress
    }

    /// Moves the run to `next` if the lifecycle allows it.
    ///
    /// Returns false, leaving the run untouched, for illegal transitions.
    pub fn transition(&mut self, next: RunStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        match next {
            RunStatus::Running => self.started_at = Some(now_utc()),
            s if s.is_terminal() => self.completed_at = Some(now_utc()),
            _ => {}
        }
        true
    }
}
