//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is the abort signal shared between a run's
//! scheduler and every executor invocation it dispatches.

mod token;

pub use token::{CancelCallback, CancellationToken};
