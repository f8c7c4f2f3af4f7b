//! Dependency graph over job ids.
//!
//! The graph answers "which jobs may run now" against the current job states
//! and applies the cascading-skip rule: a job whose dependency failed or was
//! skipped without `continueOnError` is skipped itself, and so on downstream.
//! Unrelated branches are unaffected.

use crate::core::{JobStatus, PipelineDefinition, PipelineRun};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Readiness of a single undispatched job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// Every dependency is satisfied.
    Ready,
    /// At least one dependency has not finished yet.
    Blocked,
    /// A dependency failed or was skipped without `continueOnError`.
    Skip {
        /// The dependency responsible.
        cause: String,
    },
}

/// Result of [`DependencyGraph::refresh`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessUpdate {
    /// Ready jobs in declaration order.
    pub ready: Vec<String>,
    /// Jobs newly skipped, with the dependency that caused each skip.
    pub skipped: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
struct Node {
    dependencies: Vec<String>,
    dependents: Vec<String>,
    continue_on_error: bool,
}

/// Adjacency model of a validated definition.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: HashMap<String, Node>,
    /// Declaration order.
    order: Vec<String>,
}

impl DependencyGraph {
    /// Builds the graph. The definition is expected to have passed
    /// [`validate`](super::validate); unknown dependency ids are ignored.
    #[must_use]
    pub fn new(definition: &PipelineDefinition) -> Self {
        let mut nodes: HashMap<String, Node> = definition
            .jobs
            .iter()
            .map(|job| {
                (
                    job.id.clone(),
                    Node {
                        dependencies: job.depends_on.clone(),
                        dependents: Vec::new(),
                        continue_on_error: job.continue_on_error,
                    },
                )
            })
            .collect();

        for job in &definition.jobs {
            for dep in &job.depends_on {
                if let Some(node) = nodes.get_mut(dep) {
                    node.dependents.push(job.id.clone());
                }
            }
        }

        Self {
            nodes,
            order: definition.jobs.iter().map(|job| job.id.clone()).collect(),
        }
    }

    /// Returns the number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if the graph has no jobs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Job ids in declaration order.
    #[must_use]
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Direct dependencies of a job.
    #[must_use]
    pub fn dependencies(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|node| node.dependencies.as_slice())
            .unwrap_or_default()
    }

    /// Jobs that directly depend on `id`.
    #[must_use]
    pub fn dependents(&self, id: &str) -> &[String] {
        self.nodes
            .get(id)
            .map(|node| node.dependents.as_slice())
            .unwrap_or_default()
    }

    /// Every job reachable downstream of `id`, in declaration order.
    #[must_use]
    pub fn downstream(&self, id: &str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self.dependents(id).iter().map(String::as_str).collect();
        while let Some(current) = stack.pop() {
            if seen.insert(current.to_string()) {
                stack.extend(self.dependents(current).iter().map(String::as_str));
            }
        }
        self.order.iter().filter(|id| seen.contains(*id)).cloned().collect()
    }

    /// Topological order, visiting roots in declaration order.
    #[must_use]
    pub fn topological_order(&self) -> Vec<String> {
        fn visit(
            graph: &DependencyGraph,
            node: &str,
            visited: &mut HashSet<String>,
            result: &mut Vec<String>,
        ) {
            if !visited.insert(node.to_string()) {
                return;
            }
            for dep in graph.dependencies(node) {
                visit(graph, dep, visited, result);
            }
            result.push(node.to_string());
        }

        let mut visited = HashSet::new();
        let mut result = Vec::with_capacity(self.order.len());
        for id in &self.order {
            visit(self, id, &mut visited, &mut result);
        }
        result
    }

    fn satisfies(&self, dep: &str, status: JobStatus) -> Option<bool> {
        let continue_on_error = self.nodes.get(dep).is_some_and(|node| node.continue_on_error);
        match status {
            JobStatus::Completed => Some(true),
            JobStatus::Failed | JobStatus::Skipped => Some(continue_on_error),
            JobStatus::Cancelled => Some(false),
            // not finished yet
            _ => None,
        }
    }

    /// Readiness of `id` given the current job statuses.
    #[must_use]
    pub fn readiness(&self, id: &str, statuses: &BTreeMap<String, JobStatus>) -> Readiness {
        let mut blocked = false;
        for dep in self.dependencies(id) {
            let status = statuses.get(dep).copied().unwrap_or_default();
            match self.satisfies(dep, status) {
                Some(true) => {}
                Some(false) => return Readiness::Skip { cause: dep.clone() },
                None => blocked = true,
            }
        }
        if blocked {
            Readiness::Blocked
        } else {
            Readiness::Ready
        }
    }

    /// Undispatched jobs that are currently eligible, in declaration order.
    ///
    /// Read-only; does not apply skips. Use [`refresh`](Self::refresh) to
    /// update a run.
    #[must_use]
    pub fn ready_jobs(&self, run: &PipelineRun) -> Vec<String> {
        let statuses = statuses_of(run);
        self.order
            .iter()
            .filter(|id| statuses.get(*id).is_some_and(JobStatus::is_undispatched))
            .filter(|id| self.readiness(id, &statuses) == Readiness::Ready)
            .cloned()
            .collect()
    }

    /// Re-evaluates every undispatched job of `run`, marking it `ready`,
    /// `blocked` or `skipped`. Skips propagate transitively in one call.
    pub fn refresh(&self, run: &mut PipelineRun) -> ReadinessUpdate {
        let mut statuses = statuses_of(run);
        let mut update = ReadinessUpdate::default();

        // Declaration order need not be topological, so iterate to a fixpoint.
        loop {
            let mut changed = false;
            for id in &self.order {
                let Some(current) = statuses.get(id).copied() else {
                    continue;
                };
                if !current.is_undispatched() {
                    continue;
                }
                let next = match self.readiness(id, &statuses) {
                    Readiness::Ready => JobStatus::Ready,
                    Readiness::Blocked => JobStatus::Blocked,
                    Readiness::Skip { cause } => {
                        update.skipped.push((id.clone(), cause));
                        JobStatus::Skipped
                    }
                };
                if next != current {
                    statuses.insert(id.clone(), next);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for (id, cause) in &update.skipped {
            if let Some(job) = run.job_mut(id) {
                job.finish(
                    JobStatus::Skipped,
                    Some(format!("Skipped: dependency '{cause}' did not succeed")),
                );
            }
        }
        for id in &self.order {
            let Some(status) = statuses.get(id).copied() else {
                continue;
            };
            if let Some(job) = run.job_mut(id) {
                if job.status.is_undispatched() && status.is_undispatched() {
                    job.status = status;
                }
            }
            if status == JobStatus::Ready {
                update.ready.push(id.clone());
            }
        }

        update
    }
}

fn statuses_of(run: &PipelineRun) -> BTreeMap<String, JobStatus> {
    run.jobs
        .iter()
        .map(|(id, job)| (id.clone(), job.status))
        .collect()
}
