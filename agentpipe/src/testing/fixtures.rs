//! Definition and engine fixtures for pipeline testing.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::{JobDefinition, PipelineDefinition};
use crate::executor::Executor;
use crate::pipeline::PipelineEngine;
use crate::store::InMemoryStateStore;

/// A job with a placeholder agent and task.
#[must_use]
pub fn job(id: &str) -> JobDefinition {
    JobDefinition::new(id, "mock-agent", format!("task for {id}"))
}

/// One job, no dependencies.
#[must_use]
pub fn single_job() -> PipelineDefinition {
    PipelineDefinition::new("single").job(job("only"))
}

/// Two jobs with no dependency between them.
#[must_use]
pub fn independent_pair() -> PipelineDefinition {
    PipelineDefinition::new("pair").job(job("A")).job(job("B"))
}

/// `ids[0] -> ids[1] -> ...`, each job depending on the previous one.
#[must_use]
pub fn linear_chain(ids: &[&str]) -> PipelineDefinition {
    let mut definition = PipelineDefinition::new("chain");
    let mut previous: Option<&str> = None;
    for id in ids {
        let mut next = job(id);
        if let Some(dep) = previous {
            next = next.with_dependency(dep);
        }
        definition = definition.job(next);
        previous = Some(*id);
    }
    definition
}

/// `a -> {b, c} -> d`.
#[must_use]
pub fn diamond() -> PipelineDefinition {
    PipelineDefinition::new("diamond")
        .job(job("a"))
        .job(job("b").with_dependency("a"))
        .job(job("c").with_dependency("a"))
        .job(job("d").with_dependencies(["b", "c"]))
}

/// `root -> {w0..wN} -> sink`.
#[must_use]
pub fn wide_fan(width: usize) -> PipelineDefinition {
    let workers: Vec<String> = (0..width).map(|i| format!("w{i}")).collect();
    let mut definition = PipelineDefinition::new("wide").job(job("root"));
    for worker in &workers {
        definition = definition.job(job(worker).with_dependency("root"));
    }
    definition.job(job("sink").with_dependencies(workers))
}

/// An engine backed by an in-memory store, returned alongside the store.
#[must_use]
pub fn in_memory_engine(
    executor: Arc<dyn Executor>,
    max_concurrent_jobs: usize,
) -> (PipelineEngine, InMemoryStateStore) {
    let store = InMemoryStateStore::new();
    let config = EngineConfig::default()
        .with_max_concurrent_jobs(max_concurrent_jobs)
        .with_cancel_grace_ms(200);
    let engine = PipelineEngine::new(config, executor).with_store(Arc::new(store.clone()));
    (engine, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::validate;

    #[test]
    fn test_fixtures_are_valid() {
        for definition in [
            single_job(),
            independent_pair(),
            linear_chain(&["a", "b", "c"]),
            diamond(),
            wide_fan(16),
        ] {
            assert!(validate(&definition).is_ok(), "{} is invalid", definition.name);
        }
    }

    #[test]
    fn test_wide_fan_shape() {
        let definition = wide_fan(3);
        assert_eq!(definition.len(), 5);
        assert_eq!(definition.get("sink").map(|j| j.depends_on.len()), Some(3));
    }
}
