//! Test assertions for run snapshots.

use crate::core::{JobStatus, PipelineRun, RunStatus};

/// Asserts that the run has the expected status.
pub fn assert_run_status(run: &PipelineRun, expected: RunStatus) {
    assert_eq!(
        run.status, expected,
        "Expected run status {:?}, got {:?}. Jobs: {:?}",
        expected,
        run.status,
        run.jobs.values().map(|job| (&job.id, job.status)).collect::<Vec<_>>()
    );
}

/// Asserts that a job has the expected status.
pub fn assert_job_status(run: &PipelineRun, job_id: &str, expected: JobStatus) {
    let actual = run.job_status(job_id);
    assert_eq!(
        actual,
        Some(expected),
        "Expected job '{}' to be {:?}, got {:?} (error: {:?})",
        job_id,
        expected,
        actual,
        run.job(job_id).and_then(|job| job.error.as_ref())
    );
}

/// Asserts that a job used the expected number of attempts.
pub fn assert_job_attempts(run: &PipelineRun, job_id: &str, expected: u32) {
    let actual = run.job(job_id).map(|job| job.attempts);
    assert_eq!(
        actual,
        Some(expected),
        "Expected job '{job_id}' to have {expected} attempts, got {actual:?}"
    );
}

/// Asserts that every job of the run is terminal and progress is 100.
pub fn assert_run_settled(run: &PipelineRun) {
    assert!(run.is_terminal(), "Run is still {:?}", run.status);
    let open: Vec<_> = run
        .jobs
        .values()
        .filter(|job| !job.status.is_terminal())
        .map(|job| (&job.id, job.status))
        .collect();
    assert!(open.is_empty(), "Jobs not terminal: {open:?}");
    assert_eq!(run.progress, 100, "Expected progress 100, got {}", run.progress);
    assert!(run.completed_at.is_some(), "Terminal run has no completedAt");
}
