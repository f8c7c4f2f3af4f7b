//! Structural validation of pipeline definitions.
//!
//! Checks run in a fixed order and stop at the first violation:
//! 1. at least one job
//! 2. unique job ids
//! 3. every `dependsOn` entry names a declared job
//! 4. no dependency cycle
//! 5. every retry policy allows at least one attempt

use crate::core::PipelineDefinition;
use crate::errors::{CycleDetectedError, PipelineValidationError, ValidationErrorKind};
use std::collections::{HashMap, HashSet};

/// Validates a definition before any run is created.
///
/// # Errors
///
/// Returns the first violated check as a [`PipelineValidationError`].
pub fn validate(definition: &PipelineDefinition) -> Result<(), PipelineValidationError> {
    if definition.jobs.is_empty() {
        return Err(PipelineValidationError::new(
            ValidationErrorKind::Empty,
            format!("Pipeline '{}' has no jobs", definition.name),
        ));
    }

    let mut seen = HashSet::new();
    for job in &definition.jobs {
        if !seen.insert(job.id.as_str()) {
            return Err(PipelineValidationError::new(
                ValidationErrorKind::DuplicateJobId,
                format!("Duplicate job id '{}'", job.id),
            )
            .with_jobs(vec![job.id.clone()]));
        }
    }

    for job in &definition.jobs {
        for dep in &job.depends_on {
            if !seen.contains(dep.as_str()) {
                return Err(PipelineValidationError::new(
                    ValidationErrorKind::MissingDependency,
                    format!("Job '{}' depends on unknown job '{}'", job.id, dep),
                )
                .with_jobs(vec![job.id.clone(), dep.clone()]));
            }
        }
    }

    detect_cycles(definition)?;

    for job in &definition.jobs {
        if let Some(policy) = &job.retry {
            if policy.max_attempts == 0 {
                return Err(PipelineValidationError::new(
                    ValidationErrorKind::InvalidRetryPolicy,
                    format!("Job '{}' has retry.maxAttempts = 0", job.id),
                )
                .with_jobs(vec![job.id.clone()]));
            }
        }
    }

    Ok(())
}

/// Depth-first search with a recursion stack; a back-edge to a node on the
/// current stack is a cycle. Roots are visited in declaration order so the
/// reported path is deterministic.
fn detect_cycles(definition: &PipelineDefinition) -> Result<(), CycleDetectedError> {
    let deps: HashMap<&str, &[String]> = definition
        .jobs
        .iter()
        .map(|job| (job.id.as_str(), job.depends_on.as_slice()))
        .collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for job in &definition.jobs {
        if !visited.contains(job.id.as_str()) {
            if let Some(cycle) = dfs_cycle(&job.id, &deps, &mut visited, &mut rec_stack, &mut path) {
                return Err(CycleDetectedError::new(cycle));
            }
        }
    }

    Ok(())
}

fn dfs_cycle<'a>(
    node: &'a str,
    deps: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(&node_deps) = deps.get(node) {
        for dep in node_deps {
            let dep = dep.as_str();
            if !visited.contains(dep) {
                if let Some(cycle) = dfs_cycle(dep, deps, visited, rec_stack, path) {
                    return Some(cycle);
                }
            } else if rec_stack.contains(dep) {
                let start = path.iter().position(|n| *n == dep).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|n| (*n).to_string()).collect();
                cycle.push(dep.to_string());
                return Some(cycle);
            }
        }
    }

    path.pop();
    rec_stack.remove(node);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JobDefinition;
    use crate::pipeline::{Backoff, RetryPolicy};

    fn job(id: &str) -> JobDefinition {
        JobDefinition::new(id, "agent", "task")
    }

    #[test]
    fn test_valid_definition() {
        let def = PipelineDefinition::new("p")
            .job(job("a"))
            .job(job("b").with_dependency("a"))
            .job(job("c").with_dependencies(["a", "b"]));
        assert!(validate(&def).is_ok());
    }

    #[test]
    fn test_empty_definition() {
        let err = validate(&PipelineDefinition::new("p")).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Empty);
        assert_eq!(err.error_info.code, "PIPELINE-EMPTY");
    }

    #[test]
    fn test_duplicate_ids() {
        let def = PipelineDefinition::new("p").job(job("a")).job(job("a"));
        let err = validate(&def).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::DuplicateJobId);
        assert_eq!(err.jobs, vec!["a".to_string()]);
    }

    #[test]
    fn test_missing_dependency() {
        let def = PipelineDefinition::new("p").job(job("a").with_dependency("ghost"));
        let err = validate(&def).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::MissingDependency);
        assert!(err.message.contains("ghost"));
    }

    #[test]
    fn test_forward_reference_is_allowed() {
        let def = PipelineDefinition::new("p")
            .job(job("b").with_dependency("a"))
            .job(job("a"));
        assert!(validate(&def).is_ok());
    }

    #[test]
    fn test_direct_cycle() {
        let def = PipelineDefinition::new("p")
            .job(job("a").with_dependency("b"))
            .job(job("b").with_dependency("a"));
        let err = validate(&def).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Cycle);
        assert_eq!(err.jobs.first(), err.jobs.last());
    }

    #[test]
    fn test_transitive_cycle() {
        let def = PipelineDefinition::new("p")
            .job(job("a").with_dependency("c"))
            .job(job("b").with_dependency("a"))
            .job(job("c").with_dependency("b"));
        let err = validate(&def).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Cycle);
        assert!(err.message.contains("->"));
        assert_eq!(err.jobs.len(), 4);
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let def = PipelineDefinition::new("p").job(job("a").with_dependency("a"));
        let err = validate(&def).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::Cycle);
        assert_eq!(err.jobs, vec!["a".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_diamond_is_not_a_cycle() {
        let def = PipelineDefinition::new("p")
            .job(job("a"))
            .job(job("b").with_dependency("a"))
            .job(job("c").with_dependency("a"))
            .job(job("d").with_dependencies(["b", "c"]));
        assert!(validate(&def).is_ok());
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        let def = PipelineDefinition::new("p")
            .job(job("a").with_retry(RetryPolicy::new(0, Backoff::Fixed, 10)));
        let err = validate(&def).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::InvalidRetryPolicy);
    }

    #[test]
    fn test_missing_dependency_reported_before_cycle() {
        let def = PipelineDefinition::new("p")
            .job(job("a").with_dependency("b"))
            .job(job("b").with_dependencies(["a", "ghost"]));
        let err = validate(&def).unwrap_err();
        assert_eq!(err.kind, ValidationErrorKind::MissingDependency);
    }
}
