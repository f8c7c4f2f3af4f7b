//! The per-run dispatch loop.
//!
//! One [`Scheduler`] drives one run. It is the only writer of the run's
//! [`PipelineRun`]: executor tasks report back through their join handles and
//! the progress channel, and every mutation happens on the scheduler's own
//! task. The shared lock exists so status queries can read a consistent
//! snapshot; it is never held across an `.await`.

use super::graph::DependencyGraph;
use super::retry::{jittered_delay_for, should_retry};
use crate::cancellation::CancellationToken;
use crate::core::{ContextMap, JobStatus, PipelineDefinition, PipelineEvent, PipelineRun, RunStatus};
use crate::events::EventBus;
use crate::executor::{ExecutionOptions, ExecutionSuccess, Executor, ProgressReporter};
use crate::store::StateStore;
use crate::utils::now_utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinError};
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

type AttemptResult = (anyhow::Result<ExecutionSuccess>, Duration);
type InFlight = FuturesUnordered<BoxFuture<'static, (String, Result<AttemptResult, JoinError>)>>;
type RetryWaits = FuturesUnordered<BoxFuture<'static, String>>;

/// Everything a run needs, shared with the engine that created it.
pub(crate) struct Scheduler {
    definition: Arc<PipelineDefinition>,
    graph: DependencyGraph,
    run: Arc<RwLock<PipelineRun>>,
    context: ContextMap,
    executor: Arc<dyn Executor>,
    store: Arc<dyn StateStore>,
    events: Arc<EventBus>,
    cancel: Arc<CancellationToken>,
    max_concurrent_jobs: usize,
    cancel_grace: Duration,
}

/// Mutable bookkeeping of the dispatch loop.
struct LoopState {
    in_flight: InFlight,
    aborts: HashMap<String, AbortHandle>,
    retry_waits: RetryWaits,
    progress_tx: mpsc::UnboundedSender<(String, u8)>,
    cancel_deadline: Option<Instant>,
    cancel_handled: bool,
}

impl LoopState {
    /// Slots in use: running executors plus jobs waiting out a back-off.
    fn active(&self) -> usize {
        self.in_flight.len() + self.retry_waits.len()
    }
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        definition: Arc<PipelineDefinition>,
        run: Arc<RwLock<PipelineRun>>,
        context: ContextMap,
        executor: Arc<dyn Executor>,
        store: Arc<dyn StateStore>,
        events: Arc<EventBus>,
        cancel: Arc<CancellationToken>,
        max_concurrent_jobs: usize,
        cancel_grace: Duration,
    ) -> Self {
        let graph = DependencyGraph::new(&definition);
        Self {
            definition,
            graph,
            run,
            context,
            executor,
            store,
            events,
            cancel,
            max_concurrent_jobs: max_concurrent_jobs.max(1),
            cancel_grace,
        }
    }

    fn run_id(&self) -> String {
        self.run.read().run_id.clone()
    }

    /// Drives the run to a terminal status and returns the final snapshot.
    pub(crate) async fn run(self) -> PipelineRun {
        let span = info_span!(
            "pipeline_run",
            run_id = %self.run_id(),
            pipeline = %self.definition.name,
        );
        self.drive().instrument(span).await
    }

    async fn drive(self) -> PipelineRun {
        let run_id = self.run_id();
        if !self.run.write().transition(RunStatus::Running) {
            warn!(run_id = %run_id, "Run was not pending at start");
        }
        self.persist().await;
        info!(run_id = %run_id, jobs = self.definition.len(), "Pipeline started");
        self.events.emit(&PipelineEvent::PipelineStarted {
            run_id: run_id.clone(),
            definition_name: self.definition.name.clone(),
        });

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let mut state = LoopState {
            in_flight: FuturesUnordered::new(),
            aborts: HashMap::new(),
            retry_waits: FuturesUnordered::new(),
            progress_tx,
            cancel_deadline: None,
            cancel_handled: false,
        };

        loop {
            if self.cancel.is_cancelled() && !state.cancel_handled {
                self.cancel_undispatched(&mut state).await;
            }

            if !state.cancel_handled {
                self.schedule_ready(&mut state).await;
            }

            if state.active() == 0 {
                break;
            }

            let deadline = state.cancel_deadline;
            tokio::select! {
                Some((job_id, joined)) = state.in_flight.next() => {
                    state.aborts.remove(&job_id);
                    self.handle_outcome(&job_id, joined, &mut state).await;
                }
                Some(job_id) = state.retry_waits.next() => {
                    // A cancel that raced the back-off is handled at the top
                    // of the loop, which cancels the still-retrying job.
                    if !self.cancel.is_cancelled() {
                        self.dispatch(&job_id, &mut state).await;
                    }
                }
                Some((job_id, percent)) = progress_rx.recv() => {
                    self.events.emit(&PipelineEvent::JobProgress {
                        run_id: run_id.clone(),
                        job_id,
                        percent,
                    });
                }
                () = self.cancel.cancelled(), if !state.cancel_handled => {}
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    warn!(
                        run_id = %run_id,
                        jobs = state.aborts.len(),
                        "Cancellation grace period elapsed, aborting in-flight jobs"
                    );
                    for (_, handle) in state.aborts.drain() {
                        handle.abort();
                    }
                    state.cancel_deadline = None;
                }
            }
        }

        // Flush progress reports that arrived before the last completion.
        while let Ok((job_id, percent)) = progress_rx.try_recv() {
            self.events.emit(&PipelineEvent::JobProgress {
                run_id: run_id.clone(),
                job_id,
                percent,
            });
        }

        self.finalize(state.cancel_handled).await
    }

    /// Applies readiness and cascading skips, then fills free slots in
    /// declaration order.
    async fn schedule_ready(&self, state: &mut LoopState) {
        let update = {
            let mut run = self.run.write();
            let update = self.graph.refresh(&mut run);
            if !update.skipped.is_empty() {
                run.recompute_progress();
            }
            update
        };

        if !update.skipped.is_empty() {
            self.persist().await;
            let run_id = self.run_id();
            for (job_id, cause) in update.skipped {
                info!(job_id = %job_id, cause = %cause, "Job skipped");
                self.events.emit(&PipelineEvent::JobSkipped {
                    run_id: run_id.clone(),
                    job_id,
                    cause,
                });
            }
        }

        for job_id in update.ready {
            if self.cancel.is_cancelled() {
                break;
            }
            if state.active() >= self.max_concurrent_jobs {
                debug!(
                    job_id = %job_id,
                    active = state.active(),
                    limit = self.max_concurrent_jobs,
                    "No free slot, job stays ready"
                );
                break;
            }
            self.dispatch(&job_id, state).await;
        }
    }

    /// Starts one attempt of a job on its own task.
    async fn dispatch(&self, job_id: &str, state: &mut LoopState) {
        let Some(job) = self.definition.get(job_id).cloned() else {
            error!(job_id = %job_id, "Dispatch of unknown job");
            return;
        };

        let dispatched = {
            let mut run = self.run.write();
            let context = merged_context(&self.context, &run);
            run.job_mut(job_id).map(|job_state| {
                job_state.status = JobStatus::Running;
                job_state.attempts += 1;
                if job_state.started_at.is_none() {
                    job_state.started_at = Some(now_utc());
                }
                (job_state.attempts, context)
            })
        };
        let Some((attempt, context)) = dispatched else {
            error!(job_id = %job_id, "Job missing from run state");
            return;
        };

        self.persist().await;
        debug!(job_id = %job_id, attempt, "Dispatching job");
        self.events.emit(&PipelineEvent::JobStarted {
            run_id: self.run_id(),
            job_id: job_id.to_string(),
            attempt,
        });

        let executor = self.executor.clone();
        let options = ExecutionOptions::new(
            attempt,
            self.cancel.clone(),
            ProgressReporter::new(job_id, state.progress_tx.clone()),
        );
        let handle = tokio::spawn(async move {
            let started = std::time::Instant::now();
            let result = match job.timeout_ms {
                Some(ms) => {
                    match tokio::time::timeout(
                        Duration::from_millis(ms),
                        executor.execute(&job, &context, options),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(anyhow::anyhow!("timed out after {ms} ms")),
                    }
                }
                None => executor.execute(&job, &context, options).await,
            };
            (result, started.elapsed())
        });

        state.aborts.insert(job_id.to_string(), handle.abort_handle());
        let job_id = job_id.to_string();
        state
            .in_flight
            .push(Box::pin(async move { (job_id, handle.await) }));
    }

    async fn handle_outcome(
        &self,
        job_id: &str,
        joined: Result<AttemptResult, JoinError>,
        state: &mut LoopState,
    ) {
        let run_id = self.run_id();
        let outcome = match joined {
            Ok((Ok(success), elapsed)) => Ok((success.output, success.duration.unwrap_or(elapsed))),
            Ok((Err(e), _)) => Err(format!("{e:#}")),
            Err(e) if e.is_panic() => Err(format!("executor panicked: {}", panic_message(e))),
            Err(_) => Err("executor aborted".to_string()),
        };

        match outcome {
            Ok((output, duration)) => {
                let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
                let attempts = {
                    let mut run = self.run.write();
                    let attempts = run.job_mut(job_id).map_or(0, |job| {
                        job.output = Some(output);
                        job.duration_ms = Some(duration_ms);
                        job.finish(JobStatus::Completed, None);
                        job.attempts
                    });
                    run.recompute_progress();
                    attempts
                };
                self.persist().await;
                info!(job_id = %job_id, attempts, duration_ms, "Job completed");
                self.events.emit(&PipelineEvent::JobCompleted {
                    run_id,
                    job_id: job_id.to_string(),
                    attempts,
                    duration_ms,
                });
            }
            Err(message) if state.cancel_handled || self.cancel.is_cancelled() => {
                {
                    let mut run = self.run.write();
                    if let Some(job) = run.job_mut(job_id) {
                        job.finish(JobStatus::Cancelled, Some(message.clone()));
                    }
                    run.recompute_progress();
                }
                self.persist().await;
                info!(job_id = %job_id, error = %message, "Job cancelled");
            }
            Err(message) => {
                let retry = self.definition.get(job_id).and_then(|job| job.retry.as_ref());
                let attempts = self.run.read().job(job_id).map_or(0, |job| job.attempts);

                if should_retry(attempts, retry) {
                    let delay = jittered_delay_for(attempts, retry);
                    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                    {
                        let mut run = self.run.write();
                        if let Some(job) = run.job_mut(job_id) {
                            job.status = JobStatus::Retrying;
                            job.error = Some(message.clone());
                        }
                    }
                    self.persist().await;
                    warn!(job_id = %job_id, attempt = attempts, delay_ms, error = %message, "Job attempt failed, retrying");
                    self.events.emit(&PipelineEvent::JobRetrying {
                        run_id,
                        job_id: job_id.to_string(),
                        attempt: attempts,
                        delay_ms,
                        error: message,
                    });

                    let job_id = job_id.to_string();
                    state.retry_waits.push(Box::pin(async move {
                        tokio::time::sleep(delay).await;
                        job_id
                    }));
                } else {
                    {
                        let mut run = self.run.write();
                        if let Some(job) = run.job_mut(job_id) {
                            job.finish(JobStatus::Failed, Some(message.clone()));
                        }
                        run.recompute_progress();
                    }
                    self.persist().await;
                    warn!(job_id = %job_id, attempts, error = %message, "Job failed");
                    self.events.emit(&PipelineEvent::JobFailed {
                        run_id,
                        job_id: job_id.to_string(),
                        attempts,
                        error: message,
                    });
                }
            }
        }
    }

    /// Cancels every job that has not started or is waiting to retry, and
    /// starts the grace period for jobs still running.
    async fn cancel_undispatched(&self, state: &mut LoopState) {
        state.cancel_handled = true;
        state.retry_waits = FuturesUnordered::new();
        if !state.in_flight.is_empty() {
            state.cancel_deadline = Some(Instant::now() + self.cancel_grace);
        }

        let reason = self.cancel.reason();
        let cancelled = {
            let mut run = self.run.write();
            let mut cancelled = 0usize;
            for job in run.jobs.values_mut() {
                if job.status.is_undispatched() || job.status == JobStatus::Retrying {
                    job.finish(JobStatus::Cancelled, reason.clone());
                    cancelled += 1;
                }
            }
            run.recompute_progress();
            cancelled
        };

        info!(
            cancelled,
            in_flight = state.in_flight.len(),
            reason = reason.as_deref().unwrap_or(""),
            "Cancellation requested"
        );
        self.persist().await;
    }

    async fn finalize(&self, cancel_handled: bool) -> PipelineRun {
        let (status, failed_jobs, progress) = {
            let mut run = self.run.write();
            // Read under the write lock: a cancel accepted while the run was
            // still non-terminal must end the run cancelled.
            let cancelled = cancel_handled || self.cancel.is_cancelled();
            for job in run.jobs.values_mut().filter(|job| !job.status.is_terminal()) {
                if cancelled {
                    job.finish(JobStatus::Cancelled, None);
                } else {
                    warn!(job_id = %job.id, status = %job.status, "Job never became ready");
                    job.finish(JobStatus::Skipped, Some("Skipped: never became ready".to_string()));
                }
            }
            run.recompute_progress();

            let failed_jobs: Vec<String> = run
                .jobs
                .values()
                .filter(|job| job.status == JobStatus::Failed)
                .filter(|job| {
                    self.definition
                        .get(&job.id)
                        .map_or(true, |definition| !definition.continue_on_error)
                })
                .map(|job| job.id.clone())
                .collect();

            let status = if cancelled {
                RunStatus::Cancelled
            } else if failed_jobs.is_empty() {
                RunStatus::Completed
            } else {
                RunStatus::Failed
            };
            run.transition(status);
            let progress = run.progress;
            (status, failed_jobs, progress)
        };

        self.persist().await;

        let run_id = self.run_id();
        let started_at = self.run.read().started_at;
        let elapsed_ms = started_at.map_or(0, |start| crate::utils::timestamps::millis_between(start, now_utc()));
        info!(run_id = %run_id, status = %status, progress, elapsed_ms, "Pipeline finished");

        let event = match status {
            RunStatus::Completed => PipelineEvent::PipelineCompleted { run_id, progress },
            RunStatus::Failed => PipelineEvent::PipelineFailed { run_id, failed_jobs },
            _ => PipelineEvent::PipelineCancelled {
                run_id,
                reason: self.cancel.reason(),
            },
        };
        self.events.emit(&event);

        self.run.read().clone()
    }

    /// Saves the current snapshot. Failures are logged and execution
    /// continues in memory.
    async fn persist(&self) {
        let snapshot = self.run.read().clone();
        if let Err(e) = self.store.save(&snapshot).await {
            error!(run_id = %snapshot.run_id, error = %e, "Failed to persist run state");
        }
    }
}

/// Initial context plus the output of every completed job, keyed by job id.
fn merged_context(initial: &ContextMap, run: &PipelineRun) -> ContextMap {
    let mut context = initial.clone();
    for job in run.jobs.values() {
        if job.status == JobStatus::Completed {
            if let Some(output) = &job.output {
                context.insert(job.id.clone(), output.clone());
            }
        }
    }
    context
}

fn panic_message(err: JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobDefinition;
    use serde_json::json;

    #[test]
    fn test_merged_context_includes_completed_outputs_only() {
        let def = PipelineDefinition::new("p")
            .job(JobDefinition::new("a", "x", "t"))
            .job(JobDefinition::new("b", "x", "t"))
            .job(JobDefinition::new("c", "x", "t"));
        let mut run = PipelineRun::new("r", &def);
        if let Some(job) = run.job_mut("a") {
            job.output = Some(json!("A"));
            job.finish(JobStatus::Completed, None);
        }
        if let Some(job) = run.job_mut("b") {
            job.output = Some(json!("stale"));
            job.status = JobStatus::Running;
        }

        let mut initial = ContextMap::new();
        initial.insert("repo".to_string(), json!("acme"));

        let context = merged_context(&initial, &run);
        assert_eq!(context.len(), 2);
        assert_eq!(context["repo"], json!("acme"));
        assert_eq!(context["a"], json!("A"));
        assert!(!context.contains_key("b"));
    }

    #[tokio::test]
    async fn test_panic_message_extraction() {
        let err = tokio::spawn(async { panic!("kaboom") }).await.unwrap_err();
        assert_eq!(panic_message(err), "kaboom");
    }
}
