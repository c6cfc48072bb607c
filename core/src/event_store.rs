//! Event store contract: append-only, per-stream ordered, optimistically
//! concurrent.
//!
//! The event store is the source of truth. It provides exactly three
//! operations: an atomic batch append guarded by an expected version, an
//! ordered per-stream read, and a global read used by tracking processors.
//! It deliberately does not manage subscriptions, projections, or querying
//! beyond stream and position access; those belong to the publisher side.
//!
//! # Implementations
//!
//! - `InMemoryEventStore` (in `eventum-testing`): deterministic, lock-based,
//!   used by every test in the workspace.
//! - Durable backends are external collaborators implementing this trait.
//!
//! # Dyn compatibility
//!
//! The trait returns explicit `Pin<Box<dyn Future>>` values instead of using
//! `async fn` so that it can be used as `Arc<dyn EventStore>` across the
//! runtime.

use crate::event::{NewEvent, RecordedEvent};
use crate::stream::{AggregateId, GlobalPosition, Version};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors from event store operations.
#[derive(Error, Debug)]
pub enum EventStoreError {
    /// The stream moved past the expected version before the append landed.
    ///
    /// The caller must reload the stream and either retry the command
    /// against the fresh state or give up. Nothing was persisted.
    #[error("Concurrency conflict on {aggregate_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The stream on which the conflict occurred.
        aggregate_id: AggregateId,
        /// The version the writer loaded.
        expected: Version,
        /// The stream's actual current version.
        actual: Version,
    },

    /// The backing storage failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An event payload could not be (de)serialized by the backend.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Append-only storage for per-aggregate event streams.
///
/// # Guarantees
///
/// - `append` is atomic: either every event in the batch is persisted
///   contiguously after `expected_version`, or none is.
/// - Within a stream, sequence numbers are assigned contiguously starting
///   at 0; reads return them in order with no gaps.
/// - Across streams, committed events are totally ordered by
///   [`GlobalPosition`], which `read_all` exposes for tracking cursors.
///
/// Implementations must be `Send + Sync`; the runtime shares one store
/// across all repositories and processors.
pub trait EventStore: Send + Sync {
    /// Atomically append a batch of events to one stream.
    ///
    /// `expected_version` is the version the caller loaded before deciding
    /// the events. If the stream is still at that version the batch commits
    /// and the returned records carry the assigned sequence numbers, global
    /// positions, and commit timestamp; the stream's new version is the old
    /// one advanced by the batch length.
    ///
    /// # Errors
    ///
    /// - [`EventStoreError::ConcurrencyConflict`] if the stream's current
    ///   version differs from `expected_version`; nothing is persisted.
    /// - [`EventStoreError::Storage`] if the backend fails.
    fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>;

    /// Read one stream in sequence order.
    ///
    /// An unknown stream yields an empty vector, not an error; whether
    /// absence is acceptable is the caller's decision.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Storage`] if the backend fails.
    fn read_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>;

    /// Read up to `limit` committed events after `position`, in global
    /// commit order.
    ///
    /// This is the feed tracking processors poll; they pass the position of
    /// the last event they fully processed and receive what follows.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError::Storage`] if the backend fails.
    fn read_all(
        &self,
        after: GlobalPosition,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_error_reports_both_versions() {
        let error = EventStoreError::ConcurrencyConflict {
            aggregate_id: AggregateId::new("order-o1"),
            expected: Version::new(2),
            actual: Version::new(5),
        };
        let display = format!("{error}");
        assert!(display.contains("order-o1"));
        assert!(display.contains("expected version 2"));
        assert!(display.contains("found 5"));
    }
}
