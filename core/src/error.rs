//! Command-path error taxonomy.
//!
//! Every failure a command sender can observe is a [`DispatchError`]. The
//! variants split along the caller's recovery options: fix the input and
//! resubmit (`Validation`), reload and retry (`Conflict`), check the id
//! (`NotFound`), fix the wiring (`NoHandler`), or treat as operational
//! (`Store`, `Execution`). Event-path failures never appear here except as
//! `HandlerFailure`, which only occurs when a subscriber group explicitly
//! opted into the propagate policy.

use crate::command::CommandError;
use crate::event::EventError;
use crate::event_store::EventStoreError;
use crate::stream::{AggregateId, Version};
use thiserror::Error;

/// Failure of a command dispatch, surfaced synchronously to the sender.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// A business rule rejected the command before any event was produced.
    ///
    /// Recoverable: fix the input and resubmit.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Optimistic concurrency conflict on append.
    ///
    /// Another writer advanced the stream between load and append. Reload
    /// current state and retry the command. No partial batch was persisted.
    #[error("Concurrency conflict on {aggregate_id}: expected version {expected}, found {actual}")]
    Conflict {
        /// The contended stream.
        aggregate_id: AggregateId,
        /// The version the dispatch loaded.
        expected: Version,
        /// The stream's actual version at append time.
        actual: Version,
    },

    /// The command required an existing aggregate and the stream is empty.
    #[error("Aggregate not found: {0}")]
    NotFound(AggregateId),

    /// No handler is registered for the command type.
    ///
    /// A configuration error: surfaced immediately, never retried.
    #[error("No handler registered for command type '{0}'")]
    NoHandler(String),

    /// A subscribing-mode event handler with the propagate policy failed
    /// after the events were committed.
    ///
    /// The events remain appended; the failure is reported so the caller
    /// knows a synchronous subscriber did not complete.
    #[error("Event handler failed after commit: {0}")]
    HandlerFailure(String),

    /// The event store failed for a reason other than a version conflict.
    #[error(transparent)]
    Store(EventStoreError),

    /// A payload could not be (de)serialized.
    #[error("Serialization failure: {0}")]
    Serialization(String),

    /// The dispatch task itself failed to run to completion.
    #[error("Dispatch execution failed: {0}")]
    Execution(String),
}

impl From<EventStoreError> for DispatchError {
    fn from(error: EventStoreError) -> Self {
        match error {
            EventStoreError::ConcurrencyConflict {
                aggregate_id,
                expected,
                actual,
            } => Self::Conflict {
                aggregate_id,
                expected,
                actual,
            },
            EventStoreError::Serialization(reason) => Self::Serialization(reason),
            other => Self::Store(other),
        }
    }
}

impl From<CommandError> for DispatchError {
    fn from(error: CommandError) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<EventError> for DispatchError {
    fn from(error: EventError) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl DispatchError {
    /// Whether resubmitting the same command can ever succeed.
    ///
    /// Conflicts are retriable after a reload; validation failures are
    /// retriable after fixing the input; configuration errors are not.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}
