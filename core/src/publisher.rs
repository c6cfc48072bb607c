//! Publisher and subscription contracts for committed-event delivery.
//!
//! Once events are committed, the aggregate runtime hands them to an
//! [`EventPublisher`], which fans them out to registered [`EventHandler`]s
//! (projections, sagas). Delivery is at least once: after a crash and
//! restart a handler may observe an event it already processed, so handlers
//! must be idempotent with respect to replays. That contract is advertised
//! here, not enforced by the bus.
//!
//! Tracking-mode subscriber groups additionally persist their progress
//! through a [`CursorStore`], which maps a processor name to the global
//! position of the last fully processed event.

use crate::event::RecordedEvent;
use crate::stream::GlobalPosition;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Failure raised by an event handler (projection or saga).
///
/// How the failure is treated is the enclosing processor group's decision:
/// the default policy logs and continues, the propagate policy surfaces the
/// failure to the publisher's caller. Either way the triggering event stays
/// committed.
#[derive(Error, Debug)]
#[error("Event handler '{handler}' failed: {reason}")]
pub struct HandlerError {
    /// Name of the failing handler.
    pub handler: String,
    /// Human-readable failure description.
    pub reason: String,
}

impl HandlerError {
    /// Create a handler failure.
    #[must_use]
    pub fn new(handler: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from publishing a batch of committed events.
#[derive(Error, Debug)]
pub enum PublishError {
    /// A handler in a propagate-mode group failed.
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// A consumer of committed events.
///
/// Handlers declare interest through [`EventHandler::wants`]; the bus only
/// invokes [`EventHandler::handle`] for events the predicate accepts.
/// Handlers must be idempotent under redelivery.
pub trait EventHandler: Send + Sync {
    /// Stable handler name, used for logs, metrics, and error reports.
    fn name(&self) -> &str;

    /// Subscription predicate: whether this handler wants the event.
    fn wants(&self, event: &RecordedEvent) -> bool;

    /// Process one event.
    fn handle(
        &self,
        event: &RecordedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>>;
}

/// Fan-out point for committed events.
///
/// The aggregate runtime calls [`EventPublisher::publish`] once per
/// successful append, with the records in commit order. Subscribing-mode
/// groups run inside this call; tracking-mode groups are only woken by it
/// and pull from the store on their own.
pub trait EventPublisher: Send + Sync {
    /// Deliver a batch of committed events.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Handler`] when a subscribing-mode group with
    /// the propagate policy had a failing handler. Swallow-mode failures are
    /// logged, not returned.
    fn publish(
        &self,
        events: &[RecordedEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>>;
}

/// Errors from cursor persistence.
#[derive(Error, Debug)]
pub enum CursorStoreError {
    /// The backing storage failed.
    #[error("Cursor storage error: {0}")]
    Storage(String),
}

/// Durable per-processor position cursor.
///
/// A tracking processor loads its cursor at startup, resumes reading the
/// global feed from there, and saves the cursor only after every handler in
/// the group has processed an event. The window between processing and the
/// save is what makes delivery at-least-once rather than exactly-once.
pub trait CursorStore: Send + Sync {
    /// Load the saved position for a processor, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CursorStoreError::Storage`] if the backend fails.
    fn load(
        &self,
        processor: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<GlobalPosition>, CursorStoreError>> + Send + '_>>;

    /// Persist the position of the last fully processed event.
    ///
    /// # Errors
    ///
    /// Returns [`CursorStoreError::Storage`] if the backend fails.
    fn save(
        &self,
        processor: &str,
        position: GlobalPosition,
    ) -> Pin<Box<dyn Future<Output = Result<(), CursorStoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_error_display_names_the_handler() {
        let error = HandlerError::new("order-projection", "row missing");
        let display = format!("{error}");
        assert!(display.contains("order-projection"));
        assert!(display.contains("row missing"));
    }
}
