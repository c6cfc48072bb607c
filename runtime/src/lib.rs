//! # eventum-runtime
//!
//! Tokio runtime for the eventum command-dispatch and event-sourcing core.
//!
//! This crate turns the `eventum-core` contracts into a running system:
//!
//! - [`AggregateRepository`]: loads an aggregate by replaying its stream,
//!   runs the command handler, appends with optimistic concurrency, and
//!   publishes the committed events. One writer per aggregate instance.
//! - [`CommandBus`]: one handler per command type, chained interceptors,
//!   synchronous `send` and fire-and-observe `send_async`.
//! - [`SubscriptionBus`] and [`TrackingProcessor`]: the two delivery modes
//!   for committed events, with pluggable error policies and
//!   incremental-backoff retry on the tracking side.
//! - [`SagaManager`]: association-indexed routing of events to saga
//!   instances, per-instance serialization, and effect application.
//! - [`TokioDeadlineScheduler`]: cancellable delayed callbacks delivered
//!   back to saga instances by id.
//!
//! ## Wiring order
//!
//! ```text
//! store, cursors, saga store        (persistence seams)
//!   -> SubscriptionBus              (publisher)
//!   -> AggregateRepository(s)       (store + bus)
//!   -> CommandBus.register_aggregate
//!   -> TokioDeadlineScheduler
//!   -> SagaManager(s)               (saga store + bus handle + scheduler)
//!        scheduler.connect(manager)
//!        manager.initialize()
//!        register manager with a processor group
//!   -> TrackingProcessor(s).spawn
//! ```
//!
//! The `order-workflow` demo crate contains this wiring end to end.

/// Processor group configuration.
pub mod config;

/// In-process deadline scheduler.
pub mod deadline;

/// Command bus and interceptors.
pub mod dispatcher;

/// Metric registration.
pub mod metrics;

/// Subscription bus and tracking processors.
pub mod processor;

/// Aggregate repository.
pub mod repository;

/// Incremental backoff.
pub mod retry;

/// Saga coordinator.
pub mod saga_manager;

pub use config::ProcessorConfig;
pub use deadline::TokioDeadlineScheduler;
pub use dispatcher::{
    CommandBus, CommandHandler, DispatchInterceptor, PendingDispatch, RegistrationError,
};
pub use processor::{ProcessorError, SubscriptionBus, TrackingProcessor};
pub use repository::AggregateRepository;
pub use retry::{RetryPolicy, retry_with_backoff};
pub use saga_manager::SagaManager;
