//! Pipeline validation, scheduling and execution.
//!
//! This module provides:
//! - Definition validation
//! - The dependency graph with cascading skip
//! - Retry policies
//! - The per-run scheduler and the [`PipelineEngine`] surface

mod engine;
mod graph;
mod retry;
mod scheduler;
mod validate;

#[cfg(test)]
mod integration_tests;

pub use engine::PipelineEngine;
pub use graph::{DependencyGraph, Readiness, ReadinessUpdate};
pub use retry::{
    delay_for, jittered_delay_for, should_retry, Backoff, JitterStrategy, RetryPolicy,
};
pub use validate::validate;
