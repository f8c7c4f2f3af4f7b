//! Mock executors for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{ContextMap, JobDefinition};
use crate::executor::{ExecutionOptions, ExecutionSuccess, Executor};

/// Scripted behaviour of a [`MockExecutor`] for one job.
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Succeed immediately with the value.
    Succeed(serde_json::Value),
    /// Fail every attempt with the message.
    Fail(String),
    /// Fail the first `n` calls, then succeed with the value.
    FailTimes(u32, serde_json::Value),
    /// Sleep, then succeed with the value. Returns early with an error if
    /// the run is cancelled meanwhile.
    Delay(Duration, serde_json::Value),
    /// Report each percentage, then succeed with the value.
    Progress(Vec<u8>, serde_json::Value),
    /// Block until the abort signal fires, then fail.
    WaitForCancel,
    /// Never return and ignore the abort signal.
    Hang,
    /// Panic with the message.
    Panic(String),
}

/// Decrements the in-flight counter even when the invocation is aborted.
struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// An executor that follows per-job scripts and records every call.
///
/// Jobs without a script succeed with `{"job": <id>}`.
#[derive(Debug, Default)]
pub struct MockExecutor {
    behaviors: Mutex<HashMap<String, MockBehavior>>,
    calls: Mutex<HashMap<String, u32>>,
    contexts: Mutex<HashMap<String, Vec<ContextMap>>>,
    start_order: Mutex<Vec<String>>,
    finish_order: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    aborts_observed: AtomicUsize,
}

impl MockExecutor {
    /// Creates a mock where every job succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a job.
    #[must_use]
    pub fn with_behavior(self, job_id: impl Into<String>, behavior: MockBehavior) -> Self {
        self.set_behavior(job_id, behavior);
        self
    }

    /// Scripts a job after construction.
    pub fn set_behavior(&self, job_id: impl Into<String>, behavior: MockBehavior) {
        self.behaviors.lock().insert(job_id.into(), behavior);
    }

    /// Number of invocations for a job.
    #[must_use]
    pub fn call_count(&self, job_id: &str) -> u32 {
        self.calls.lock().get(job_id).copied().unwrap_or(0)
    }

    /// Number of invocations across all jobs.
    #[must_use]
    pub fn total_calls(&self) -> u32 {
        self.calls.lock().values().sum()
    }

    /// Contexts passed to each invocation of a job.
    #[must_use]
    pub fn contexts_for(&self, job_id: &str) -> Vec<ContextMap> {
        self.contexts.lock().get(job_id).cloned().unwrap_or_default()
    }

    /// Job ids in invocation order, one entry per attempt.
    #[must_use]
    pub fn start_order(&self) -> Vec<String> {
        self.start_order.lock().clone()
    }

    /// Job ids in the order their successful attempt returned.
    #[must_use]
    pub fn finish_order(&self) -> Vec<String> {
        self.finish_order.lock().clone()
    }

    /// Highest number of simultaneous invocations observed.
    #[must_use]
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Number of invocations that returned because of the abort signal.
    #[must_use]
    pub fn aborts_observed(&self) -> usize {
        self.aborts_observed.load(Ordering::SeqCst)
    }

    fn record_start(&self, job: &JobDefinition, context: &ContextMap) -> u32 {
        let call = {
            let mut calls = self.calls.lock();
            let count = calls.entry(job.id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.contexts
            .lock()
            .entry(job.id.clone())
            .or_default()
            .push(context.clone());
        self.start_order.lock().push(job.id.clone());
        call
    }

    fn succeed(&self, job: &JobDefinition, output: serde_json::Value) -> anyhow::Result<ExecutionSuccess> {
        self.finish_order.lock().push(job.id.clone());
        Ok(ExecutionSuccess::new(output))
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn execute(
        &self,
        job: &JobDefinition,
        context: &ContextMap,
        options: ExecutionOptions,
    ) -> anyhow::Result<ExecutionSuccess> {
        let call = self.record_start(job, context);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(current, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let behavior = self
            .behaviors
            .lock()
            .get(&job.id)
            .cloned()
            .unwrap_or_else(|| MockBehavior::Succeed(serde_json::json!({ "job": job.id })));

        match behavior {
            MockBehavior::Succeed(output) => self.succeed(job, output),
            MockBehavior::Fail(message) => Err(anyhow::anyhow!(message)),
            MockBehavior::FailTimes(n, output) => {
                if call <= n {
                    Err(anyhow::anyhow!("scripted failure {call} of {n}"))
                } else {
                    self.succeed(job, output)
                }
            }
            MockBehavior::Delay(delay, output) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => self.succeed(job, output),
                    () = options.cancel_token.cancelled() => {
                        self.aborts_observed.fetch_add(1, Ordering::SeqCst);
                        Err(anyhow::anyhow!("aborted"))
                    }
                }
            }
            MockBehavior::Progress(steps, output) => {
                for percent in steps {
                    options.report_progress(percent);
                    tokio::task::yield_now().await;
                }
                self.succeed(job, output)
            }
            MockBehavior::WaitForCancel => {
                options.cancel_token.cancelled().await;
                self.aborts_observed.fetch_add(1, Ordering::SeqCst);
                Err(anyhow::anyhow!("aborted"))
            }
            MockBehavior::Hang => {
                std::future::pending::<()>().await;
                Err(anyhow::anyhow!("unreachable"))
            }
            MockBehavior::Panic(message) => panic!("{message}"),
        }
    }
}
