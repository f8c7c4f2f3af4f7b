//! End-to-end tests of the engine against scripted executors.

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::core::{ContextMap, EventKind, JobStatus, PipelineDefinition, PipelineEvent, PipelineRun, RunStatus};
    use crate::errors::{PipelineError, StateStoreError, ValidationErrorKind};
    use crate::events::CollectingEventSink;
    use crate::pipeline::{Backoff, PipelineEngine, RetryPolicy};
    use crate::store::{FileStateStore, InMemoryStateStore, MockStateStore, StateStore};
    use crate::testing::{
        assert_job_attempts, assert_job_status, assert_run_settled, assert_run_status, diamond,
        in_memory_engine, independent_pair, job, linear_chain, single_job, wide_fan, MockBehavior,
        MockExecutor,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    const TEST_TIMEOUT: Duration = Duration::from_secs(5);

    async fn run_to_end(engine: &PipelineEngine, definition: PipelineDefinition) -> PipelineRun {
        let run_id = assert_ok!(engine.start_pipeline(definition, ContextMap::new()).await);
        finish(engine, &run_id).await
    }

    async fn finish(engine: &PipelineEngine, run_id: &str) -> PipelineRun {
        let result = tokio::time::timeout(TEST_TIMEOUT, engine.wait_for_completion(run_id))
            .await
            .expect("run did not reach a terminal status in time");
        assert_ok!(result)
    }

    async fn wait_until<F>(engine: &PipelineEngine, run_id: &str, predicate: F) -> PipelineRun
    where
        F: Fn(&PipelineRun) -> bool,
    {
        for _ in 0..1000 {
            if let Some(run) = engine.get_pipeline_status(run_id).await {
                if predicate(&run) {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition on run {run_id} never held");
    }

    async fn wait_for_stored<F>(store: &InMemoryStateStore, run_id: &str, predicate: F) -> PipelineRun
    where
        F: Fn(&PipelineRun) -> bool,
    {
        for _ in 0..1000 {
            if let Ok(run) = store.load(run_id).await {
                if predicate(&run) {
                    return run;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("stored state of run {run_id} never matched");
    }

    fn retry_delays(sink: &CollectingEventSink) -> Vec<(u32, u64)> {
        sink.events_of_type("job:retrying")
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::JobRetrying { attempt, delay_ms, .. } => Some((attempt, delay_ms)),
                _ => None,
            })
            .collect()
    }

    fn collect(engine: &PipelineEngine) -> Arc<CollectingEventSink> {
        let sink = Arc::new(CollectingEventSink::new());
        engine.events().add_sink(sink.clone());
        sink
    }

    fn position(names: &[(&'static str, Option<String>)], name: &str, job_id: &str) -> usize {
        names
            .iter()
            .position(|(n, j)| *n == name && j.as_deref() == Some(job_id))
            .unwrap_or_else(|| panic!("no {name} event for {job_id}"))
    }

    fn names_with_jobs(sink: &CollectingEventSink) -> Vec<(&'static str, Option<String>)> {
        sink.events()
            .iter()
            .map(|e| (e.name(), e.job_id().map(str::to_string)))
            .collect()
    }

    #[tokio::test]
    async fn test_single_job_completes_with_full_progress() {
        let mock = Arc::new(MockExecutor::new());
        let (engine, store) = in_memory_engine(mock.clone(), 2);
        let sink = collect(&engine);

        let run = run_to_end(&engine, single_job()).await;

        assert_run_status(&run, RunStatus::Completed);
        assert_run_settled(&run);
        assert_job_attempts(&run, "only", 1);
        assert_eq!(run.job("only").and_then(|j| j.output.clone()), Some(json!({ "job": "only" })));
        assert!(run.job("only").and_then(|j| j.duration_ms).is_some());
        assert!(run.started_at.is_some());
        assert_eq!(
            sink.names(),
            vec!["pipeline:started", "job:started", "job:completed", "pipeline:completed"]
        );
        assert!(store.save_count() >= 4);
        assert_eq!(store.load(&run.run_id).await.unwrap(), run);
    }

    #[tokio::test]
    async fn test_cycle_rejected_without_run_or_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = dir.path().join("runs");
        let mock = Arc::new(MockExecutor::new());
        let engine = PipelineEngine::new(EngineConfig::default().with_state_dir(&state_dir), mock.clone());

        let definition = PipelineDefinition::new("cyclic")
            .job(job("a").with_dependency("c"))
            .job(job("b").with_dependency("a"))
            .job(job("c").with_dependency("b"));

        let err = assert_err!(engine.start_pipeline(definition, ContextMap::new()).await);
        match err {
            PipelineError::Validation(e) => assert_eq!(e.kind, ValidationErrorKind::Cycle),
            other => panic!("expected a validation error, got {other:?}"),
        }

        let files = std::fs::read_dir(&state_dir).map(Iterator::count).unwrap_or(0);
        assert_eq!(files, 0);
        assert!(engine.active_runs().is_empty());
        assert!(assert_ok!(engine.list_runs().await).is_empty());
        assert_eq!(mock.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_definitions_rejected() {
        let (engine, store) = in_memory_engine(Arc::new(MockExecutor::new()), 2);

        let empty = engine.start_pipeline(PipelineDefinition::new("empty"), ContextMap::new()).await;
        assert!(matches!(empty, Err(PipelineError::Validation(_))));

        let missing = PipelineDefinition::new("missing").job(job("a").with_dependency("ghost"));
        assert!(engine.start_pipeline(missing, ContextMap::new()).await.is_err());

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_independent_jobs_both_run() {
        let mock = Arc::new(MockExecutor::new());
        let (engine, _) = in_memory_engine(mock.clone(), 1);

        let run = run_to_end(&engine, independent_pair()).await;

        assert_run_status(&run, RunStatus::Completed);
        assert_job_status(&run, "A", JobStatus::Completed);
        assert_job_status(&run, "B", JobStatus::Completed);
        assert_job_attempts(&run, "A", 1);
        assert_job_attempts(&run, "B", 1);
        assert_eq!(mock.peak_concurrency(), 1);
    }

    #[tokio::test]
    async fn test_dependent_job_waits_for_dependency() {
        let mock = Arc::new(
            MockExecutor::new()
                .with_behavior("A", MockBehavior::Delay(Duration::from_millis(40), json!("built"))),
        );
        let (engine, _) = in_memory_engine(mock.clone(), 4);
        let sink = collect(&engine);

        let mut context = ContextMap::new();
        context.insert("repo".to_string(), json!("acme/app"));
        let run_id = assert_ok!(engine.start_pipeline(linear_chain(&["A", "B"]), context).await);

        let mid = wait_until(&engine, &run_id, |run| run.job_status("A") == Some(JobStatus::Running)).await;
        assert!(matches!(
            mid.job_status("B"),
            Some(JobStatus::Pending | JobStatus::Blocked)
        ));

        let run = finish(&engine, &run_id).await;
        assert_run_status(&run, RunStatus::Completed);
        assert_eq!(mock.start_order(), vec!["A".to_string(), "B".to_string()]);

        let events = names_with_jobs(&sink);
        assert!(position(&events, "job:completed", "A") < position(&events, "job:started", "B"));

        let seen = mock.contexts_for("B");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["A"], json!("built"));
        assert_eq!(seen[0]["repo"], json!("acme/app"));
        assert!(!mock.contexts_for("A")[0].contains_key("B"));
    }

    #[tokio::test]
    async fn test_continue_on_error_failure_leaves_sibling_completed() {
        let mock = Arc::new(
            MockExecutor::new().with_behavior("job1", MockBehavior::Fail("agent crashed".into())),
        );
        let (engine, _) = in_memory_engine(mock.clone(), 2);
        let sink = collect(&engine);

        let definition = PipelineDefinition::new("tolerant")
            .job(job("job1").continue_on_error())
            .job(job("job2"));
        let run = run_to_end(&engine, definition).await;

        assert_job_status(&run, "job1", JobStatus::Failed);
        assert_job_status(&run, "job2", JobStatus::Completed);
        assert_eq!(run.job("job1").and_then(|j| j.error.clone()), Some("agent crashed".to_string()));
        assert_run_status(&run, RunStatus::Completed);
        assert_eq!(run.progress, 100);
        assert_eq!(sink.events_of_type("job:failed").len(), 1);
    }

    #[tokio::test]
    async fn test_continue_on_error_dependency_still_unblocks_dependent() {
        let mock = Arc::new(MockExecutor::new().with_behavior("lint", MockBehavior::Fail("style".into())));
        let (engine, _) = in_memory_engine(mock.clone(), 2);

        let definition = PipelineDefinition::new("p")
            .job(job("lint").continue_on_error())
            .job(job("deploy").with_dependency("lint"));
        let run = run_to_end(&engine, definition).await;

        assert_job_status(&run, "lint", JobStatus::Failed);
        assert_job_status(&run, "deploy", JobStatus::Completed);
        assert_eq!(mock.call_count("deploy"), 1);
    }

    #[tokio::test]
    async fn test_retry_until_success() {
        let mock = Arc::new(MockExecutor::new().with_behavior("flaky", MockBehavior::FailTimes(2, json!("ok"))));
        let (engine, store) = in_memory_engine(mock.clone(), 2);
        let sink = collect(&engine);

        let definition = PipelineDefinition::new("retry")
            .job(job("flaky").with_retry(RetryPolicy::new(3, Backoff::Fixed, 100)));
        let run = run_to_end(&engine, definition).await;

        assert_run_status(&run, RunStatus::Completed);
        assert_job_status(&run, "flaky", JobStatus::Completed);
        assert_job_attempts(&run, "flaky", 3);
        assert_eq!(run.job("flaky").and_then(|j| j.error.clone()), None);
        assert_eq!(run.job("flaky").and_then(|j| j.output.clone()), Some(json!("ok")));
        assert_eq!(mock.call_count("flaky"), 3);

        let stored = assert_ok!(store.load(&run.run_id).await);
        assert_eq!(stored.job("flaky").and_then(|j| j.error.clone()), None);

        assert_eq!(retry_delays(&sink), vec![(1, 100), (2, 100)]);
        assert_eq!(sink.events_of_type("job:started").len(), 3);
    }

    #[tokio::test]
    async fn test_exponential_backoff_doubles_retry_delay() {
        let mock = Arc::new(MockExecutor::new().with_behavior("deploy", MockBehavior::Fail("still down".into())));
        let (engine, _) = in_memory_engine(mock.clone(), 2);
        let sink = collect(&engine);

        let definition = PipelineDefinition::new("backoff")
            .job(job("deploy").with_retry(RetryPolicy::new(3, Backoff::Exponential, 10)));
        let run = run_to_end(&engine, definition).await;

        assert_run_status(&run, RunStatus::Failed);
        assert_job_attempts(&run, "deploy", 3);
        assert_eq!(run.job("deploy").and_then(|j| j.error.clone()), Some("still down".to_string()));
        assert_eq!(retry_delays(&sink), vec![(1, 10), (2, 20)]);
    }

    #[tokio::test]
    async fn test_capped_exponential_backoff_in_retry_events() {
        let mock = Arc::new(MockExecutor::new().with_behavior("deploy", MockBehavior::Fail("still down".into())));
        let (engine, _) = in_memory_engine(mock.clone(), 2);
        let sink = collect(&engine);

        let policy = RetryPolicy::new(4, Backoff::Exponential, 10).with_max_delay_ms(25);
        let definition = PipelineDefinition::new("capped").job(job("deploy").with_retry(policy));
        run_to_end(&engine, definition).await;

        assert_eq!(retry_delays(&sink), vec![(1, 10), (2, 20), (3, 25)]);
    }

    #[tokio::test]
    async fn test_state_saved_after_each_transition() {
        let mock = Arc::new(
            MockExecutor::new()
                .with_behavior("flaky", MockBehavior::FailTimes(1, json!("ok")))
                .with_behavior("slow", MockBehavior::Delay(Duration::from_millis(300), json!("done"))),
        );
        let (engine, store) = in_memory_engine(mock.clone(), 2);

        let definition = PipelineDefinition::new("snapshots")
            .job(job("flaky").with_retry(RetryPolicy::new(2, Backoff::Fixed, 300)))
            .job(job("slow"));
        let run_id = assert_ok!(engine.start_pipeline(definition, ContextMap::new()).await);

        let mid = wait_for_stored(&store, &run_id, |run| {
            run.job_status("slow") == Some(JobStatus::Running)
                && run.job_status("flaky") == Some(JobStatus::Retrying)
        })
        .await;
        assert_run_status(&mid, RunStatus::Running);
        assert_job_attempts(&mid, "slow", 1);
        assert!(mid.job("slow").and_then(|j| j.started_at).is_some());
        assert_job_attempts(&mid, "flaky", 1);
        assert_eq!(
            mid.job("flaky").and_then(|j| j.error.clone()),
            Some("scripted failure 1 of 1".to_string())
        );
        assert_eq!(mid.progress, 0);

        let run = finish(&engine, &run_id).await;
        assert_run_status(&run, RunStatus::Completed);
        assert_job_attempts(&run, "flaky", 2);
        assert_eq!(assert_ok!(store.load(&run_id).await), run);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_fails_job_and_run() {
        let mock = Arc::new(MockExecutor::new().with_behavior("bad", MockBehavior::Fail("nope".into())));
        let (engine, _) = in_memory_engine(mock.clone(), 2);
        let sink = collect(&engine);

        let definition = PipelineDefinition::new("p")
            .job(job("bad").with_retry(RetryPolicy::new(2, Backoff::Exponential, 10)));
        let run = run_to_end(&engine, definition).await;

        assert_run_status(&run, RunStatus::Failed);
        assert_job_status(&run, "bad", JobStatus::Failed);
        assert_job_attempts(&run, "bad", 2);
        assert_eq!(mock.call_count("bad"), 2);
        assert_eq!(sink.names().last(), Some(&"pipeline:failed"));
    }

    #[tokio::test]
    async fn test_failure_cascades_skip_but_spares_unrelated_branch() {
        let mock = Arc::new(MockExecutor::new().with_behavior("a", MockBehavior::Fail("broken".into())));
        let (engine, _) = in_memory_engine(mock.clone(), 2);
        let sink = collect(&engine);

        let definition = linear_chain(&["a", "b", "c"]).job(job("x"));
        let run = run_to_end(&engine, definition).await;

        assert_run_status(&run, RunStatus::Failed);
        assert_run_settled(&run);
        assert_job_status(&run, "a", JobStatus::Failed);
        assert_job_status(&run, "b", JobStatus::Skipped);
        assert_job_status(&run, "c", JobStatus::Skipped);
        assert_job_status(&run, "x", JobStatus::Completed);
        assert_job_attempts(&run, "b", 0);
        assert_eq!(mock.call_count("b") + mock.call_count("c"), 0);

        let skipped: Vec<(String, String)> = sink
            .events_of_type("job:skipped")
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::JobSkipped { job_id, cause, .. } => Some((job_id, cause)),
                _ => None,
            })
            .collect();
        assert_eq!(
            skipped,
            vec![("b".to_string(), "a".to_string()), ("c".to_string(), "b".to_string())]
        );

        let failed = sink.events().into_iter().find(|e| e.kind() == EventKind::PipelineFailed);
        assert_eq!(
            failed,
            Some(PipelineEvent::PipelineFailed {
                run_id: run.run_id.clone(),
                failed_jobs: vec!["a".to_string()],
            })
        );
    }

    #[tokio::test]
    async fn test_partially_failed_diamond_skips_join() {
        let mock = Arc::new(MockExecutor::new().with_behavior("b", MockBehavior::Fail("x".into())));
        let (engine, _) = in_memory_engine(mock.clone(), 4);

        let run = run_to_end(&engine, diamond()).await;

        assert_job_status(&run, "a", JobStatus::Completed);
        assert_job_status(&run, "b", JobStatus::Failed);
        assert_job_status(&run, "c", JobStatus::Completed);
        assert_job_status(&run, "d", JobStatus::Skipped);
        assert_run_status(&run, RunStatus::Failed);
        assert_eq!(run.progress, 100);
    }

    #[tokio::test]
    async fn test_cancel_mid_execution_signals_abort() {
        let mock = Arc::new(MockExecutor::new().with_behavior("only", MockBehavior::WaitForCancel));
        let (engine, _) = in_memory_engine(mock.clone(), 2);
        let sink = collect(&engine);

        let run_id = assert_ok!(engine.start_pipeline(single_job(), ContextMap::new()).await);
        wait_until(&engine, &run_id, |run| run.job_status("only") == Some(JobStatus::Running)).await;

        assert!(engine.cancel_pipeline(&run_id));
        assert!(!engine.cancel_pipeline(&run_id));

        let run = finish(&engine, &run_id).await;
        assert_run_status(&run, RunStatus::Cancelled);
        assert_job_status(&run, "only", JobStatus::Cancelled);
        assert_eq!(mock.aborts_observed(), 1);
        assert_eq!(mock.call_count("only"), 1);
        assert_eq!(sink.names().last(), Some(&"pipeline:cancelled"));
        assert!(!engine.cancel_pipeline(&run_id));
    }

    #[tokio::test]
    async fn test_cancel_never_dispatches_remaining_jobs() {
        let mock = Arc::new(MockExecutor::new().with_behavior("a", MockBehavior::WaitForCancel));
        let (engine, _) = in_memory_engine(mock.clone(), 2);

        let run_id = assert_ok!(engine.start_pipeline(linear_chain(&["a", "b", "c"]), ContextMap::new()).await);
        wait_until(&engine, &run_id, |run| run.job_status("a") == Some(JobStatus::Running)).await;
        assert!(engine.cancel_pipeline_with_reason(&run_id, "deploy frozen"));

        let run = finish(&engine, &run_id).await;
        assert_run_status(&run, RunStatus::Cancelled);
        assert_run_settled(&run);
        for id in ["a", "b", "c"] {
            assert_job_status(&run, id, JobStatus::Cancelled);
        }
        assert_eq!(run.job("b").and_then(|j| j.error.clone()), Some("deploy frozen".to_string()));
        assert_eq!(mock.call_count("b"), 0);
        assert_eq!(mock.call_count("c"), 0);
    }

    #[tokio::test]
    async fn test_cancel_aborts_unresponsive_executor_after_grace() {
        let mock = Arc::new(MockExecutor::new().with_behavior("only", MockBehavior::Hang));
        let (engine, _) = in_memory_engine(mock.clone(), 2);

        let run_id = assert_ok!(engine.start_pipeline(single_job(), ContextMap::new()).await);
        wait_until(&engine, &run_id, |run| run.job_status("only") == Some(JobStatus::Running)).await;
        assert!(engine.cancel_pipeline(&run_id));

        let run = finish(&engine, &run_id).await;
        assert_run_status(&run, RunStatus::Cancelled);
        assert_job_status(&run, "only", JobStatus::Cancelled);
        assert_eq!(mock.aborts_observed(), 0);
    }

    #[tokio::test]
    async fn test_concurrency_limit_respected() {
        let mock = Arc::new(MockExecutor::new());
        for i in 0..6 {
            mock.set_behavior(format!("w{i}"), MockBehavior::Delay(Duration::from_millis(20), json!(i)));
        }
        let (engine, _) = in_memory_engine(mock.clone(), 2);

        let run = run_to_end(&engine, wide_fan(6)).await;

        assert_run_status(&run, RunStatus::Completed);
        assert_eq!(mock.peak_concurrency(), 2);
        assert_eq!(mock.total_calls(), 8);
        assert_eq!(mock.start_order().last(), Some(&"sink".to_string()));
    }

    #[tokio::test]
    async fn test_slot_contention_dispatches_in_declaration_order() {
        let mock = Arc::new(MockExecutor::new());
        let (engine, _) = in_memory_engine(mock.clone(), 1);

        let definition = PipelineDefinition::new("ordered")
            .job(job("j3"))
            .job(job("j1"))
            .job(job("j2"));
        run_to_end(&engine, definition).await;

        assert_eq!(
            mock.start_order(),
            vec!["j3".to_string(), "j1".to_string(), "j2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_progress_reports_become_events() {
        let mock = Arc::new(
            MockExecutor::new().with_behavior("only", MockBehavior::Progress(vec![10, 50, 100], json!("done"))),
        );
        let (engine, _) = in_memory_engine(mock.clone(), 2);
        let sink = collect(&engine);

        let run = run_to_end(&engine, single_job()).await;

        let percents: Vec<u8> = sink
            .events_of_type("job:progress")
            .into_iter()
            .filter_map(|e| match e {
                PipelineEvent::JobProgress { percent, .. } => Some(percent),
                _ => None,
            })
            .collect();
        assert_eq!(percents, vec![10, 50, 100]);
        assert_eq!(run.progress, 100);
    }

    #[tokio::test]
    async fn test_panicking_executor_is_a_failed_attempt() {
        let mock = Arc::new(MockExecutor::new().with_behavior("a", MockBehavior::Panic("bad state".into())));
        let (engine, _) = in_memory_engine(mock.clone(), 2);

        let definition = PipelineDefinition::new("p").job(job("a")).job(job("b"));
        let run = run_to_end(&engine, definition).await;

        assert_run_status(&run, RunStatus::Failed);
        assert_job_status(&run, "a", JobStatus::Failed);
        assert_job_status(&run, "b", JobStatus::Completed);
        let error = run.job("a").and_then(|j| j.error.clone()).unwrap_or_default();
        assert!(error.contains("panicked"), "{error}");
        assert!(error.contains("bad state"), "{error}");
    }

    #[tokio::test]
    async fn test_job_timeout_fails_attempt() {
        let mock = Arc::new(MockExecutor::new().with_behavior("slow", MockBehavior::Hang));
        let (engine, _) = in_memory_engine(mock.clone(), 2);

        let definition = PipelineDefinition::new("p").job(job("slow").with_timeout_ms(50));
        let run = run_to_end(&engine, definition).await;

        assert_job_status(&run, "slow", JobStatus::Failed);
        assert_eq!(
            run.job("slow").and_then(|j| j.error.clone()),
            Some("timed out after 50 ms".to_string())
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_does_not_halt_run() {
        let mut store = MockStateStore::new();
        store
            .expect_save()
            .returning(|_| Err(StateStoreError::Unavailable("disk full".to_string())));
        store
            .expect_load()
            .returning(|id| Err(StateStoreError::NotFound(id.to_string())));

        let mock = Arc::new(MockExecutor::new());
        let engine = PipelineEngine::new(EngineConfig::default(), mock.clone()).with_store(Arc::new(store));

        let run = run_to_end(&engine, linear_chain(&["a", "b"])).await;

        assert_run_status(&run, RunStatus::Completed);
        assert_eq!(mock.total_calls(), 2);
        // Once released from memory a finished run is only as visible as
        // the store makes it.
        assert!(engine.get_pipeline_status(&run.run_id).await.is_none());
    }

    #[tokio::test]
    async fn test_file_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::default().with_state_dir(dir.path());
        let mock = Arc::new(MockExecutor::new().with_behavior("b", MockBehavior::Fail("nope".into())));

        let first = PipelineEngine::new(config.clone(), mock.clone());
        let definition = PipelineDefinition::new("persisted")
            .job(job("a"))
            .job(job("b").continue_on_error())
            .job(job("c").with_dependency("a"));
        let run = run_to_end(&first, definition).await;
        drop(first);

        let second = PipelineEngine::new(config, Arc::new(MockExecutor::new()));
        let reloaded = second.get_pipeline_status(&run.run_id).await.expect("persisted run");
        assert_eq!(reloaded.status, run.status);
        assert_eq!(reloaded.jobs, run.jobs);
        assert_eq!(reloaded.progress, run.progress);
        assert_eq!(reloaded, run);

        assert_eq!(assert_ok!(second.list_runs().await), vec![run.run_id.clone()]);
        assert_eq!(assert_ok!(second.wait_for_completion(&run.run_id).await), run);

        let on_disk = FileStateStore::new(dir.path());
        assert_eq!(assert_ok!(on_disk.load(&run.run_id).await).status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_run_queries() {
        let (engine, _) = in_memory_engine(Arc::new(MockExecutor::new()), 2);

        assert!(engine.get_pipeline_status("missing").await.is_none());
        assert!(!engine.cancel_pipeline("missing"));
        assert!(matches!(
            engine.wait_for_completion("missing").await,
            Err(PipelineError::RunNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_broadcast_subscriber_sees_lifecycle() {
        let (engine, _) = in_memory_engine(Arc::new(MockExecutor::new()), 2);
        let mut rx = engine.events().subscribe();

        let run = run_to_end(&engine, independent_pair()).await;

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.run_id(), run.run_id);
            kinds.push(event.kind());
        }
        assert_eq!(kinds.first(), Some(&EventKind::PipelineStarted));
        assert_eq!(kinds.last(), Some(&EventKind::PipelineCompleted));
        assert_eq!(kinds.iter().filter(|k| **k == EventKind::JobCompleted).count(), 2);
    }

    #[tokio::test]
    async fn test_panicking_event_handler_does_not_abort_run() {
        let (engine, _) = in_memory_engine(Arc::new(MockExecutor::new()), 2);
        engine.events().on(EventKind::JobStarted, |_| panic!("observer bug"));

        let run = run_to_end(&engine, diamond()).await;
        assert_run_status(&run, RunStatus::Completed);
    }

    #[tokio::test]
    async fn test_finished_runs_are_released_from_memory() {
        let (engine, store) = in_memory_engine(Arc::new(MockExecutor::new()), 2);

        let mut run_ids = Vec::new();
        for _ in 0..20 {
            run_ids.push(assert_ok!(engine.start_pipeline(diamond(), ContextMap::new()).await));
        }
        assert_eq!(engine.tracked_run_count(), 20);

        for run_id in &run_ids {
            assert_run_status(&finish(&engine, run_id).await, RunStatus::Completed);
        }

        assert_eq!(engine.tracked_run_count(), 0);
        assert!(engine.active_runs().is_empty());
        assert_eq!(store.len(), 20);
        for run_id in &run_ids {
            let status = engine.get_pipeline_status(run_id).await.map(|run| run.status);
            assert_eq!(status, Some(RunStatus::Completed));
            assert!(!engine.cancel_pipeline(run_id));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_accepted_cancel_always_ends_run_cancelled() {
        let (engine, _) = in_memory_engine(Arc::new(MockExecutor::new()), 2);

        for i in 0..50u64 {
            let run_id = assert_ok!(engine.start_pipeline(single_job(), ContextMap::new()).await);
            tokio::time::sleep(Duration::from_micros(i * 20)).await;
            let accepted = engine.cancel_pipeline(&run_id);

            let run = finish(&engine, &run_id).await;
            if accepted {
                assert_run_status(&run, RunStatus::Cancelled);
            } else {
                assert_run_status(&run, RunStatus::Completed);
            }
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_isolated() {
        let mock = Arc::new(MockExecutor::new().with_behavior("B", MockBehavior::Fail("x".into())));
        let (engine, _) = in_memory_engine(mock.clone(), 2);

        let first = assert_ok!(engine.start_pipeline(single_job(), ContextMap::new()).await);
        let second = assert_ok!(engine.start_pipeline(independent_pair(), ContextMap::new()).await);
        assert_ne!(first, second);

        assert_run_status(&finish(&engine, &first).await, RunStatus::Completed);
        assert_run_status(&finish(&engine, &second).await, RunStatus::Failed);
        assert!(engine.active_runs().is_empty());
    }
}
