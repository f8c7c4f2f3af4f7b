//! Testing utilities for agentpipe pipelines.
//!
//! This module provides:
//! - A scripted [`MockExecutor`]
//! - Definition fixtures and an in-memory engine
//! - Assertions over run snapshots

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_job_attempts, assert_job_status, assert_run_settled, assert_run_status};
pub use fixtures::{diamond, in_memory_engine, independent_pair, job, linear_chain, single_job, wide_fan};
pub use mocks::{MockBehavior, MockExecutor};
