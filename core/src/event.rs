//! Event trait and the pending/committed event representations.
//!
//! Events are immutable facts. They are produced only by successful command
//! handling, appended to exactly one aggregate stream, and never mutated or
//! deleted afterwards. Payloads are serialized with `bincode`; envelope
//! metadata (correlation ids and the like) is JSON so that out-of-process
//! collaborators can read it without the Rust types.
//!
//! Two wire shapes exist:
//!
//! - [`NewEvent`]: produced by a command handler, not yet committed. Carries
//!   only the type tag, payload, and metadata.
//! - [`RecordedEvent`]: returned by the store after a successful append.
//!   Additionally carries the owning aggregate id, the 0-based per-stream
//!   sequence number, the store-wide position, and a wall-clock timestamp.

use crate::stream::{AggregateId, GlobalPosition};
use chrono::{DateTime, Utc};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Errors from event payload (de)serialization.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize an event payload.
    #[error("Failed to serialize event: {0}")]
    Serialization(String),

    /// Failed to deserialize an event payload.
    #[error("Failed to deserialize event: {0}")]
    Deserialization(String),
}

/// A domain event that can be appended to a stream and replayed.
///
/// # Type tags
///
/// [`Event::event_type`] must return a stable identifier, conventionally
/// with a version suffix so that payload schemas can evolve:
/// `"OrderCreated.v1"`, `"OrderConfirmed.v1"`. The tag is stored alongside
/// the payload and drives handler predicates and deserialization routing.
///
/// # Examples
///
/// ```
/// use eventum_core::event::Event;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// enum OrderEvent {
///     OrderCreated { order_id: String, product: String },
///     OrderConfirmed { order_id: String },
/// }
///
/// impl Event for OrderEvent {
///     fn event_type(&self) -> &'static str {
///         match self {
///             OrderEvent::OrderCreated { .. } => "OrderCreated.v1",
///             OrderEvent::OrderConfirmed { .. } => "OrderConfirmed.v1",
///         }
///     }
/// }
/// ```
pub trait Event: Send + Sync + 'static {
    /// Stable type tag for this event, including a schema version suffix.
    fn event_type(&self) -> &'static str;

    /// Serialize the payload to bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// encoded, which with bincode only happens for unsupported shapes.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError>
    where
        Self: Serialize,
    {
        bincode::serialize(self).map_err(|e| EventError::Serialization(e.to_string()))
    }

    /// Deserialize a payload from bincode bytes.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the bytes do not decode
    /// into this type, for example after an incompatible schema change.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: DeserializeOwned + Sized,
    {
        bincode::deserialize(bytes).map_err(|e| EventError::Deserialization(e.to_string()))
    }
}

/// An event produced by a command handler, awaiting commit.
#[derive(Clone, Debug)]
pub struct NewEvent {
    /// Stable event type tag (e.g. `"OrderCreated.v1"`).
    pub event_type: String,

    /// Bincode-serialized payload.
    pub data: Vec<u8>,

    /// Optional JSON metadata, e.g. `correlation_id`, `causation_id`.
    pub metadata: Option<serde_json::Value>,
}

impl NewEvent {
    /// Create a pending event from raw parts.
    #[must_use]
    pub const fn new(
        event_type: String,
        data: Vec<u8>,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type,
            data,
            metadata,
        }
    }

    /// Serialize a typed event into its pending wire shape.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Serialization`] if the payload cannot be
    /// encoded.
    pub fn from_event<E: Event + Serialize>(
        event: &E,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, EventError> {
        Ok(Self {
            event_type: event.event_type().to_string(),
            data: event.to_bytes()?,
            metadata,
        })
    }
}

/// A committed event as returned by the event store.
///
/// Sequence numbers are 0-based and strictly increasing with no gaps within
/// one stream. The global position totally orders events across streams.
#[derive(Clone, Debug)]
pub struct RecordedEvent {
    /// The stream this event belongs to.
    pub aggregate_id: AggregateId,

    /// 0-based position within the stream.
    pub sequence: u64,

    /// Position in the store-wide commit order.
    pub position: GlobalPosition,

    /// Wall-clock time at which the append was committed.
    pub timestamp: DateTime<Utc>,

    /// Stable event type tag.
    pub event_type: String,

    /// Bincode-serialized payload.
    pub data: Vec<u8>,

    /// Optional JSON metadata carried over from the pending event.
    pub metadata: Option<serde_json::Value>,
}

impl RecordedEvent {
    /// Deserialize the payload into a typed event.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::Deserialization`] if the payload does not
    /// decode into `E`.
    pub fn payload<E: Event + DeserializeOwned>(&self) -> Result<E, EventError> {
        E::from_bytes(&self.data)
    }

    /// Look up a string field in the JSON metadata.
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get(key))
            .and_then(serde_json::Value::as_str)
    }
}

impl fmt::Display for RecordedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} @ {}#{} (pos {})",
            self.event_type, self.aggregate_id, self.sequence, self.position
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    enum TestEvent {
        Created { id: String },
        Renamed { id: String, name: String },
    }

    impl Event for TestEvent {
        fn event_type(&self) -> &'static str {
            match self {
                TestEvent::Created { .. } => "TestEvent.Created.v1",
                TestEvent::Renamed { .. } => "TestEvent.Renamed.v1",
            }
        }
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: test fails if serialization fails
    fn payload_roundtrip() {
        let event = TestEvent::Renamed {
            id: "a-1".to_string(),
            name: "widget".to_string(),
        };
        let pending =
            NewEvent::from_event(&event, None).expect("serialization should succeed");
        assert_eq!(pending.event_type, "TestEvent.Renamed.v1");

        let back = TestEvent::from_bytes(&pending.data).expect("deserialization should succeed");
        assert_eq!(back, event);
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: test fails if serialization fails
    fn recorded_event_metadata_lookup() {
        let event = TestEvent::Created {
            id: "a-1".to_string(),
        };
        let recorded = RecordedEvent {
            aggregate_id: AggregateId::new("a-1"),
            sequence: 0,
            position: GlobalPosition::new(1),
            timestamp: Utc::now(),
            event_type: event.event_type().to_string(),
            data: event.to_bytes().expect("serialization should succeed"),
            metadata: Some(serde_json::json!({ "correlation_id": "corr-1" })),
        };

        assert_eq!(recorded.metadata_str("correlation_id"), Some("corr-1"));
        assert_eq!(recorded.metadata_str("missing"), None);
        assert!(format!("{recorded}").contains("TestEvent.Created.v1"));
    }
}
