//! In-process publish/subscribe for lifecycle events.

use super::EventSink;
use crate::core::{EventKind, PipelineEvent};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// A handler registered with [`EventBus::on`] or [`EventBus::on_any`].
pub type EventHandler = Arc<dyn Fn(&PipelineEvent) + Send + Sync>;

/// Identifies a handler registration, for [`EventBus::off`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct Registration {
    id: SubscriptionId,
    kind: Option<EventKind>,
    handler: EventHandler,
}

/// Fan-out of [`PipelineEvent`]s to handlers, sinks and broadcast receivers.
///
/// Delivery is synchronous and fire-and-forget: a panicking handler or sink
/// is logged and skipped, never propagated to the publisher.
pub struct EventBus {
    handlers: RwLock<Vec<Registration>>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
    sender: broadcast::Sender<PipelineEvent>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Creates a bus with the default broadcast capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a bus whose broadcast channel keeps `capacity` events for
    /// lagging receivers.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            handlers: RwLock::new(Vec::new()),
            sinks: RwLock::new(Vec::new()),
            sender,
            next_id: AtomicU64::new(1),
        }
    }

    fn register(&self, kind: Option<EventKind>, handler: EventHandler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push(Registration { id, kind, handler });
        id
    }

    /// Registers a handler for one kind of event.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Registers a handler for every event.
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&PipelineEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    /// Removes a handler. Returns false if it was not registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|registration| registration.id != id);
        handlers.len() != before
    }

    /// Attaches a sink that receives every event.
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.sinks.write().push(sink);
    }

    /// Returns a receiver of every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Publishes an event.
    pub fn emit(&self, event: &PipelineEvent) {
        // Snapshot under the lock and call outside it, so a handler may
        // register or remove handlers without deadlocking.
        let handlers: Vec<EventHandler> = self
            .handlers
            .read()
            .iter()
            .filter(|registration| registration.kind.map_or(true, |kind| kind == event.kind()))
            .map(|registration| registration.handler.clone())
            .collect();
        let sinks: Vec<Arc<dyn EventSink>> = self.sinks.read().clone();

        for handler in handlers {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                handler(event);
            })) {
                warn!(event_type = event.name(), "Event handler panicked: {:?}", e);
            }
        }

        for sink in sinks {
            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                sink.emit(event);
            })) {
                warn!(event_type = event.name(), "Event sink panicked: {:?}", e);
            }
        }

        // No receivers is not an error.
        let _ = self.sender.send(event.clone());
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.read().len())
            .field("sinks", &self.sinks.read().len())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}
