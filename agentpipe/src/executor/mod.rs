//! The executor boundary.
//!
//! An [`Executor`] performs the actual work of a job. The engine never
//! inspects `agent` or `task`; it hands the executor the job definition, the
//! merged context and an [`ExecutionOptions`] carrying the abort signal and a
//! progress callback. Returning `Err` is a failed attempt.

use crate::cancellation::CancellationToken;
use crate::core::{ContextMap, JobDefinition};
use async_trait::async_trait;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Successful result of one executor invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSuccess {
    /// Output stored on the job and exposed to its dependents' context.
    pub output: serde_json::Value,
    /// Duration reported by the executor, if it measured one.
    pub duration: Option<Duration>,
}

impl ExecutionSuccess {
    /// Creates a success carrying `output`.
    #[must_use]
    pub fn new(output: serde_json::Value) -> Self {
        Self {
            output,
            duration: None,
        }
    }

    /// Creates a success with a `null` output.
    #[must_use]
    pub fn empty() -> Self {
        Self::new(serde_json::Value::Null)
    }

    /// Sets the executor-measured duration.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Forwards `onProgress` calls from an executor to the scheduler loop.
///
/// Reports are informational; they never affect the run's own progress.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    job_id: String,
    sender: Option<mpsc::UnboundedSender<(String, u8)>>,
}

impl ProgressReporter {
    /// Creates a reporter for `job_id` feeding `sender`.
    #[must_use]
    pub fn new(job_id: impl Into<String>, sender: mpsc::UnboundedSender<(String, u8)>) -> Self {
        Self {
            job_id: job_id.into(),
            sender: Some(sender),
        }
    }

    /// A reporter that discards every report.
    #[must_use]
    pub fn noop() -> Self {
        Self::default()
    }

    /// Reports completion percent, clamped to 100.
    ///
    /// Reports sent after the run has finished are dropped.
    pub fn report(&self, percent: u8) {
        if let Some(sender) = &self.sender {
            let _ = sender.send((self.job_id.clone(), percent.min(100)));
        }
    }
}

/// Per-invocation options passed to [`Executor::execute`].
#[derive(Debug, Clone)]
pub struct ExecutionOptions {
    /// Dispatch attempt number, starting at 1.
    pub attempt: u32,
    /// Run-level abort signal. Executors should stop promptly once it fires.
    pub cancel_token: Arc<CancellationToken>,
    /// Progress callback.
    pub progress: ProgressReporter,
}

impl ExecutionOptions {
    /// Creates options for a given attempt.
    #[must_use]
    pub fn new(attempt: u32, cancel_token: Arc<CancellationToken>, progress: ProgressReporter) -> Self {
        Self {
            attempt,
            cancel_token,
            progress,
        }
    }

    /// Returns true once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Reports completion percent.
    pub fn report_progress(&self, percent: u8) {
        self.progress.report(percent);
    }
}

/// Performs the work of a job.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes one attempt of `job`.
    ///
    /// # Errors
    ///
    /// Any error is a failed attempt; its display string becomes the job's
    /// `error`.
    async fn execute(
        &self,
        job: &JobDefinition,
        context: &ContextMap,
        options: ExecutionOptions,
    ) -> anyhow::Result<ExecutionSuccess>;
}

/// An executor backed by an async closure.
pub struct FnExecutor<F, Fut>
where
    F: Fn(JobDefinition, ContextMap, ExecutionOptions) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ExecutionSuccess>> + Send,
{
    func: F,
    _phantom: std::marker::PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnExecutor<F, Fut>
where
    F: Fn(JobDefinition, ContextMap, ExecutionOptions) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ExecutionSuccess>> + Send,
{
    /// Creates a new closure-backed executor.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _phantom: std::marker::PhantomData,
        }
    }
}

impl<F, Fut> Debug for FnExecutor<F, Fut>
where
    F: Fn(JobDefinition, ContextMap, ExecutionOptions) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ExecutionSuccess>> + Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor").finish_non_exhaustive()
    }
}

#[async_trait]
impl<F, Fut> Executor for FnExecutor<F, Fut>
where
    F: Fn(JobDefinition, ContextMap, ExecutionOptions) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ExecutionSuccess>> + Send,
{
    async fn execute(
        &self,
        job: &JobDefinition,
        context: &ContextMap,
        options: ExecutionOptions,
    ) -> anyhow::Result<ExecutionSuccess> {
        (self.func)(job.clone(), context.clone(), options).await
    }
}
