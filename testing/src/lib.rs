//! # eventum-testing
//!
//! Deterministic in-memory implementations of the eventum persistence
//! seams, plus mock handlers, for use in tests across the workspace.
//!
//! - [`InMemoryEventStore`]: atomic appends, optimistic concurrency, a
//!   global feed for tracking processors.
//! - [`InMemorySagaStore`] / [`InMemoryCursorStore`]: map-backed stores.
//! - [`FixedClock`] / [`test_clock`]: reproducible timestamps.
//! - [`RecordingHandler`], [`FailNTimesHandler`], [`CollectingPublisher`]:
//!   delivery observation and scripted failures.
//!
//! ## Example
//!
//! ```
//! use eventum_core::event_store::EventStore;
//! use eventum_core::event::NewEvent;
//! use eventum_core::stream::{AggregateId, Version};
//! use eventum_testing::InMemoryEventStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = InMemoryEventStore::new();
//! let events = vec![NewEvent::new("OrderCreated.v1".to_string(), vec![1], None)];
//! let recorded = store
//!     .append(AggregateId::new("order-o1"), Version::INITIAL, events)
//!     .await
//!     .unwrap();
//! assert_eq!(recorded[0].sequence, 0);
//! # }
//! ```

/// Deterministic clocks.
pub mod clock;

/// In-memory cursor store.
pub mod cursor_store;

/// In-memory event store.
pub mod event_store;

/// Mock handlers and publishers.
pub mod handlers;

/// In-memory saga store.
pub mod saga_store;

pub use clock::{FixedClock, test_clock};
pub use cursor_store::InMemoryCursorStore;
pub use event_store::InMemoryEventStore;
pub use handlers::{CollectingPublisher, FailNTimesHandler, RecordingHandler};
pub use saga_store::InMemorySagaStore;

/// Initialize a compact tracing subscriber for a test binary.
///
/// Reads `RUST_LOG` for filtering and is safe to call from several tests;
/// only the first call installs the subscriber.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_test_writer()
        .compact()
        .try_init();
}
