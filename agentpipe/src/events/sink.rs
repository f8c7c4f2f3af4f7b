//! Event sink trait and implementations.

use crate::core::PipelineEvent;
use parking_lot::RwLock;
use tracing::{debug, info, Level};

/// Trait for sinks that receive every event published on an
/// [`EventBus`](super::EventBus).
///
/// Delivery is synchronous on the scheduler's task, so implementations
/// should return quickly and must not block on I/O.
pub trait EventSink: Send + Sync {
    /// Receives an event.
    fn emit(&self, event: &PipelineEvent);
}

/// An event sink that logs events using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    /// The log level to use.
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging event sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        let payload = serde_json::to_string(event).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(
                event_type = event.name(),
                run_id = event.run_id(),
                event_data = %payload,
                "Event: {}", event.name()
            );
        } else {
            info!(
                event_type = event.name(),
                run_id = event.run_id(),
                event_data = %payload,
                "Event: {}", event.name()
            );
        }
    }
}

/// A collecting event sink for testing purposes.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the names of all collected events, in order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.events.read().iter().map(PipelineEvent::name).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose name starts with `prefix`, e.g. `"job:"`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| event.name().starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Returns the events concerning one job.
    #[must_use]
    pub fn events_for_job(&self, job_id: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|event| event.job_id() == Some(job_id))
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}
