//! Engine configuration.

use crate::errors::PipelineError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding [`EngineConfig::max_concurrent_jobs`].
pub const ENV_MAX_CONCURRENT_JOBS: &str = "AGENTPIPE_MAX_CONCURRENT_JOBS";
/// Environment variable overriding [`EngineConfig::state_dir`].
pub const ENV_STATE_DIR: &str = "AGENTPIPE_STATE_DIR";
/// Environment variable overriding [`EngineConfig::cancel_grace_ms`].
pub const ENV_CANCEL_GRACE_MS: &str = "AGENTPIPE_CANCEL_GRACE_MS";

/// Configuration shared by every run of a [`PipelineEngine`](crate::pipeline::PipelineEngine).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Maximum executor invocations in flight per run, including jobs
    /// waiting out a retry delay.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
    /// Directory of the default file-backed state store.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// How long in-flight executors may keep running after a cancel request
    /// before they are aborted.
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_max_concurrent_jobs() -> usize {
    2
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".agentpipe/runs")
}

fn default_cancel_grace_ms() -> u64 {
    5_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            state_dir: default_state_dir(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

impl EngineConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a configuration from the defaults overridden by
    /// `AGENTPIPE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] when a variable is set but cannot
    /// be parsed, or when the result fails [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, PipelineError> {
        let mut config = Self::default();

        if let Ok(value) = env::var(ENV_MAX_CONCURRENT_JOBS) {
            config.max_concurrent_jobs = parse_var(ENV_MAX_CONCURRENT_JOBS, &value)?;
        }
        if let Ok(value) = env::var(ENV_STATE_DIR) {
            if !value.trim().is_empty() {
                config.state_dir = PathBuf::from(value);
            }
        }
        if let Ok(value) = env::var(ENV_CANCEL_GRACE_MS) {
            config.cancel_grace_ms = parse_var(ENV_CANCEL_GRACE_MS, &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the concurrency limit.
    #[must_use]
    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    /// Sets the state directory.
    #[must_use]
    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }

    /// Sets the cancellation grace period.
    #[must_use]
    pub fn with_cancel_grace_ms(mut self, ms: u64) -> Self {
        self.cancel_grace_ms = ms;
        self
    }

    /// The cancellation grace period as a [`Duration`].
    #[must_use]
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Checks the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if `max_concurrent_jobs` is zero.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.max_concurrent_jobs == 0 {
            return Err(PipelineError::Config(
                "maxConcurrentJobs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, PipelineError> {
    value
        .trim()
        .parse()
        .map_err(|_| PipelineError::Config(format!("{name} has invalid value '{value}'")))
}
