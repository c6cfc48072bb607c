//! # eventum-core
//!
//! Core traits and types for the eventum command-dispatch and
//! event-sourcing runtime.
//!
//! This crate defines the seams of the system and no I/O. The runtime
//! crate (`eventum-runtime`) provides the tokio machinery behind them; the
//! testing crate (`eventum-testing`) provides deterministic in-memory
//! implementations of every persistence seam.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   send/send_async    ┌──────────────────┐
//! │   Caller    ├─────────────────────►│  Command Bus     │
//! └─────────────┘                      └────────┬─────────┘
//!                                               │ exactly one handler
//!                                               ▼
//!                                      ┌──────────────────┐
//!                                      │ Aggregate Runtime│  replay + decide
//!                                      └────────┬─────────┘
//!                                               │ append (optimistic)
//!                                               ▼
//!                                      ┌──────────────────┐
//!                                      │   Event Store    │  source of truth
//!                                      └────────┬─────────┘
//!                                               │ committed events
//!                                               ▼
//!                                      ┌──────────────────┐
//!                                      │ Subscription Bus │  at-least-once
//!                                      └───┬──────────┬───┘
//!                                          ▼          ▼
//!                                   ┌──────────┐ ┌──────────────┐
//!                                   │Projection│ │     Saga     │
//!                                   │(external)│ │ Coordinator  │──► commands,
//!                                   └──────────┘ └──────────────┘    deadlines
//! ```
//!
//! ## Guarantees
//!
//! - Events within one aggregate stream are strictly ordered, gap-free,
//!   and immutable once appended.
//! - A command either fails before producing events or succeeds with its
//!   whole batch committed atomically; partial application is never
//!   visible.
//! - Committed events are delivered to subscribers at least once; handlers
//!   are expected to be idempotent under redelivery.
//! - Saga instances are delivered events one at a time, and their only
//!   external effects are commands and deadlines.

/// Aggregate contract: replayed state plus a pure decision function.
pub mod aggregate;

/// Clock seam for event timestamps.
pub mod clock;

/// Command trait and dispatch envelope.
pub mod command;

/// Configuration surface: delivery modes and error policies.
pub mod config;

/// Deadline scheduling contract.
pub mod deadline;

/// Command-path error taxonomy.
pub mod error;

/// Event trait and pending/committed representations.
pub mod event;

/// Event store contract.
pub mod event_store;

/// Publisher, handler, and cursor contracts.
pub mod publisher;

/// Saga contract and persistence seam.
pub mod saga;

/// Stream identity, versioning, and global positions.
pub mod stream;

pub use aggregate::Aggregate;
pub use clock::{Clock, SystemClock};
pub use command::{Command, CommandEnvelope};
pub use config::{ErrorPolicy, ProcessingMode};
pub use deadline::{
    DeadlineError, DeadlineId, DeadlineMessage, DeadlineScheduler, DeadlineSink, ScheduledDeadline,
};
pub use error::DispatchError;
pub use event::{Event, NewEvent, RecordedEvent};
pub use event_store::{EventStore, EventStoreError};
pub use publisher::{CursorStore, EventHandler, EventPublisher, HandlerError, PublishError};
pub use saga::{
    AssociationValue, Saga, SagaContext, SagaError, SagaId, SagaLifecycle, SagaRecord, SagaRouting,
    SagaStore, SagaStoreError,
};
pub use stream::{AggregateId, GlobalPosition, Version};
