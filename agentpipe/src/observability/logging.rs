//! Structured logging setup for binaries embedding the engine.
//!
//! The engine itself only emits `tracing` events; installing a subscriber is
//! left to the host. These helpers cover the common cases.
//!
//! - `LOG_LEVEL`: ERROR, WARN, INFO, DEBUG or TRACE (default INFO)
//! - `LOG_FORMAT`: json, pretty or compact (default json)
//! - `RUST_LOG`: overrides filtering entirely

use crate::errors::PipelineError;
use std::env;
use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Structured JSON, one object per line.
    #[default]
    Json,
    /// Multi-line human-readable output.
    Pretty,
    /// Single-line terminal output.
    Compact,
}

impl LogFormat {
    /// Parses a format name, falling back to JSON.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "pretty" => Self::Pretty,
            "compact" => Self::Compact,
            _ => Self::Json,
        }
    }
}

fn parse_level(s: &str) -> Level {
    match s.to_uppercase().as_str() {
        "ERROR" => Level::ERROR,
        "WARN" => Level::WARN,
        "DEBUG" => Level::DEBUG,
        "TRACE" => Level::TRACE,
        _ => Level::INFO,
    }
}

/// Installs a global subscriber.
///
/// # Errors
///
/// Returns [`PipelineError::Internal`] if a global subscriber is already set.
pub fn init_logging(level: Level, format: LogFormat) -> Result<(), PipelineError> {
    let filter = match env::var("RUST_LOG") {
        Ok(rust_log) => EnvFilter::new(rust_log),
        Err(_) => EnvFilter::new(level.to_string()),
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry
            .with(fmt::layer().compact().with_target(false))
            .try_init(),
    };

    result.map_err(|e| PipelineError::Internal(format!("failed to install logger: {e}")))
}

/// Installs a global subscriber configured from `LOG_LEVEL` and `LOG_FORMAT`.
///
/// # Errors
///
/// See [`init_logging`].
pub fn init_default_logging() -> Result<(), PipelineError> {
    let level = parse_level(&env::var("LOG_LEVEL").unwrap_or_default());
    let format = LogFormat::parse(&env::var("LOG_FORMAT").unwrap_or_default());
    init_logging(level, format)
}
