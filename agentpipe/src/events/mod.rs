//! Lifecycle event distribution.
//!
//! Every state change of a run is published as a [`PipelineEvent`] on an
//! [`EventBus`]. Observers attach as typed handlers, as [`EventSink`]s, or
//! as broadcast receivers.
//!
//! [`PipelineEvent`]: crate::core::PipelineEvent

mod bus;
mod sink;

pub use bus::{EventBus, EventHandler, SubscriptionId};
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink};
