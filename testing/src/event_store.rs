//! In-memory event store.
//!
//! A single write lock makes every append atomic: concurrent appends with
//! the same expected version serialize behind it, the first one advances
//! the stream, and the rest observe the moved version and fail with a
//! concurrency conflict. This is the reference behavior durable backends
//! must reproduce.

use eventum_core::clock::{Clock, SystemClock};
use eventum_core::event::{NewEvent, RecordedEvent};
use eventum_core::event_store::{EventStore, EventStoreError};
use eventum_core::stream::{AggregateId, GlobalPosition, Version};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreState {
    // Global commit log; an event's position is its index + 1.
    log: Vec<RecordedEvent>,
    // Stream id -> indices into the log, in sequence order.
    streams: HashMap<AggregateId, Vec<usize>>,
}

/// Deterministic, lock-based [`EventStore`] for tests.
pub struct InMemoryEventStore {
    state: RwLock<StoreState>,
    clock: Arc<dyn Clock>,
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    /// Create an empty store stamping events with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping events with the given clock.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            clock,
        }
    }

    /// Current version of a stream (0 for unknown streams).
    pub async fn stream_version(&self, aggregate_id: &AggregateId) -> Version {
        let state = self.state.read().await;
        Version::new(
            state
                .streams
                .get(aggregate_id)
                .map_or(0, |indices| indices.len() as u64),
        )
    }

    /// Total number of committed events across all streams.
    pub async fn committed_count(&self) -> usize {
        self.state.read().await.log.len()
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        aggregate_id: AggregateId,
        expected_version: Version,
        events: Vec<NewEvent>,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let mut state = self.state.write().await;
            let actual = Version::new(
                state
                    .streams
                    .get(&aggregate_id)
                    .map_or(0, |indices| indices.len() as u64),
            );
            if actual != expected_version {
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate_id,
                    expected: expected_version,
                    actual,
                });
            }

            let timestamp = self.clock.now();
            let mut sequence = actual.value();
            let mut appended = Vec::with_capacity(events.len());

            for event in events {
                let position = GlobalPosition::new(state.log.len() as u64 + 1);
                let record = RecordedEvent {
                    aggregate_id: aggregate_id.clone(),
                    sequence,
                    position,
                    timestamp,
                    event_type: event.event_type,
                    data: event.data,
                    metadata: event.metadata,
                };
                appended.push(record.clone());
                let index = state.log.len();
                state.log.push(record);
                state
                    .streams
                    .entry(aggregate_id.clone())
                    .or_default()
                    .push(index);
                sequence += 1;
            }

            Ok(appended)
        })
    }

    fn read_stream(
        &self,
        aggregate_id: AggregateId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .streams
                .get(&aggregate_id)
                .map(|indices| {
                    indices
                        .iter()
                        .map(|&index| state.log[index].clone())
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn read_all(
        &self,
        after: GlobalPosition,
        limit: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, EventStoreError>> + Send + '_>>
    {
        Box::pin(async move {
            let state = self.state.read().await;
            Ok(state
                .log
                .iter()
                .skip(after.value() as usize)
                .take(limit)
                .cloned()
                .collect())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_clock;

    fn pending(event_type: &str) -> NewEvent {
        NewEvent::new(event_type.to_string(), vec![0], None)
    }

    #[tokio::test]
    async fn append_assigns_sequences_positions_and_timestamps() {
        let store = InMemoryEventStore::with_clock(Arc::new(test_clock()));
        let id = AggregateId::new("order-o1");

        let first = store
            .append(id.clone(), Version::INITIAL, vec![pending("A.v1"), pending("B.v1")])
            .await
            .unwrap_or_default();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].sequence, 0);
        assert_eq!(first[1].sequence, 1);
        assert_eq!(first[0].position, GlobalPosition::new(1));
        assert_eq!(first[1].position, GlobalPosition::new(2));
        assert_eq!(first[0].timestamp, test_clock().now());

        assert_eq!(store.stream_version(&id).await, Version::new(2));
    }

    #[tokio::test]
    async fn stale_expected_version_conflicts_and_persists_nothing() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new("order-o1");
        let _ = store
            .append(id.clone(), Version::INITIAL, vec![pending("A.v1")])
            .await;

        let result = store
            .append(id.clone(), Version::INITIAL, vec![pending("B.v1")])
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::ConcurrencyConflict { expected, actual, .. })
                if expected == Version::INITIAL && actual == Version::new(1)
        ));
        assert_eq!(store.committed_count().await, 1);
    }

    #[tokio::test]
    async fn concurrent_appends_with_same_expected_version_have_one_winner() {
        let store = Arc::new(InMemoryEventStore::new());
        let id = AggregateId::new("order-o1");

        let mut tasks = Vec::new();
        for n in 0..8 {
            let store = Arc::clone(&store);
            let id = id.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .append(id, Version::INITIAL, vec![pending(&format!("E{n}.v1"))])
                    .await
            }));
        }

        let mut winners = 0;
        let mut conflicts = 0;
        for task in tasks {
            match task.await {
                Ok(Ok(_)) => winners += 1,
                Ok(Err(EventStoreError::ConcurrencyConflict { .. })) => conflicts += 1,
                _ => {}
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(conflicts, 7);
        assert_eq!(store.stream_version(&id).await, Version::new(1));
    }

    #[tokio::test]
    async fn read_all_pages_through_the_global_feed() {
        let store = InMemoryEventStore::new();
        for n in 0..5 {
            let _ = store
                .append(
                    AggregateId::new(format!("s-{n}")),
                    Version::INITIAL,
                    vec![pending("E.v1")],
                )
                .await;
        }

        let first = store
            .read_all(GlobalPosition::ORIGIN, 3)
            .await
            .unwrap_or_default();
        assert_eq!(first.len(), 3);
        let rest = store
            .read_all(first[2].position, 10)
            .await
            .unwrap_or_default();
        assert_eq!(rest.len(), 2);
        assert!(rest[0].position > first[2].position);
    }

    #[tokio::test]
    async fn unknown_stream_reads_empty() {
        let store = InMemoryEventStore::new();
        let events = store
            .read_stream(AggregateId::new("missing"))
            .await
            .unwrap_or_default();
        assert!(events.is_empty());
    }
}
