//! Pipeline and job definitions.
//!
//! A [`PipelineDefinition`] is the immutable input to the engine. Declaration
//! order of jobs only matters as a tie-break when several jobs are ready and
//! concurrency slots are scarce.

use crate::pipeline::RetryPolicy;
use serde::{Deserialize, Serialize};

/// Definition of a single job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    /// Unique id within the pipeline.
    pub id: String,
    /// Opaque agent identifier handed to the executor.
    pub agent: String,
    /// Opaque task payload handed to the executor.
    pub task: String,
    /// Ids of jobs that must finish before this one may start.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Retry policy; absent means a single attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    /// Whether dependents may still run after this job fails or is skipped.
    #[serde(default)]
    pub continue_on_error: bool,
    /// Per-attempt executor timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl JobDefinition {
    /// Creates a new job definition with no dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>, agent: impl Into<String>, task: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent: agent.into(),
            task: task.into(),
            depends_on: Vec::new(),
            retry: None,
            continue_on_error: false,
            timeout_ms: None,
        }
    }

    /// Adds a dependency. Duplicate ids are ignored.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.depends_on.contains(&dep) {
            self.depends_on.push(dep);
        }
        self
    }

    /// Replaces the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on.clear();
        for dep in deps {
            self = self.with_dependency(dep);
        }
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Lets dependents run even if this job fails.
    #[must_use]
    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    /// Sets the per-attempt timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Maximum number of dispatch attempts for this job.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.retry.as_ref().map_or(1, |policy| policy.max_attempts)
    }
}

/// A named set of interdependent jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    /// The pipeline name.
    pub name: String,
    /// Jobs in declaration order.
    #[serde(default)]
    pub jobs: Vec<JobDefinition>,
}

impl PipelineDefinition {
    /// Creates an empty definition.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Vec::new(),
        }
    }

    /// Appends a job.
    #[must_use]
    pub fn job(mut self, job: JobDefinition) -> Self {
        self.jobs.push(job);
        self
    }

    /// Looks up a job by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|job| job.id == id)
    }

    /// Returns the number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true if no jobs are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Backoff;

    #[test]
    fn test_job_builder() {
        let job = JobDefinition::new("build", "coder", "compile it")
            .with_dependency("fetch")
            .with_dependency("fetch")
            .with_dependency("lint")
            .continue_on_error();

        assert_eq!(job.depends_on, vec!["fetch".to_string(), "lint".to_string()]);
        assert!(job.continue_on_error);
        assert_eq!(job.max_attempts(), 1);
    }

    #[test]
    fn test_max_attempts_from_policy() {
        let job = JobDefinition::new("a", "agent", "task")
            .with_retry(RetryPolicy::new(4, Backoff::Fixed, 10));
        assert_eq!(job.max_attempts(), 4);
    }

    #[test]
    fn test_definition_deserializes_camel_case() {
        let json = r#"{
            "name": "docs",
            "jobs": [
                {"id": "job1", "agent": "writer", "task": "draft"},
                {"id": "job2", "agent": "reviewer", "task": "review",
                 "dependsOn": ["job1"], "continueOnError": true,
                 "retry": {"maxAttempts": 3, "backoff": "exponential", "delayMs": 100}}
            ]
        }"#;

        let def: PipelineDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.len(), 2);

        let job2 = def.get("job2").unwrap();
        assert_eq!(job2.depends_on, vec!["job1".to_string()]);
        assert!(job2.continue_on_error);
        let retry = job2.retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.backoff, Backoff::Exponential);
        assert_eq!(retry.delay_ms, 100);

        let job1 = def.get("job1").unwrap();
        assert!(job1.depends_on.is_empty());
        assert!(!job1.continue_on_error);
    }
}
