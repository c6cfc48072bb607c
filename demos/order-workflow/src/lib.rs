//! Order workflow demo.
//!
//! A complete domain on top of the eventum runtime: an order aggregate and
//! a payment-timeout saga with compensation.
//!
//! # Flow
//!
//! ```text
//! ┌──────────────┐  CreateOrder / ConfirmOrder
//! │    Caller    ├───────────────┐
//! └──────────────┘               ▼
//!                        ┌──────────────┐
//!                        │ Command Bus  │
//!                        └──────┬───────┘
//!                               ▼
//!                        ┌──────────────┐   OrderCreated / OrderConfirmed
//!                        │    Order     ├──────────────┐
//!                        │  aggregate   │              ▼
//!                        └──────────────┘     ┌──────────────────┐
//!                               ▲             │ PaymentTimeout   │
//!                               │ CancelOrder │      saga        │
//!                               └─────────────┤                  │
//!                                             └────────┬─────────┘
//!                                                      │ schedule / cancel
//!                                                      ▼
//!                                             ┌──────────────────┐
//!                                             │Deadline Scheduler│
//!                                             └──────────────────┘
//! ```
//!
//! The saga starts on `OrderCreated` and schedules a payment deadline. A
//! confirmation arriving in time cancels the deadline and ends the saga.
//! If the deadline fires first, the saga issues the compensating
//! `CancelOrder` command with reason `"Payment timeout"` and ends.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use eventum_core::aggregate::Aggregate;
use eventum_core::command::Command;
use eventum_core::config::ProcessingMode;
use eventum_core::deadline::{
    DeadlineError, DeadlineId, DeadlineMessage, DeadlineScheduler, DeadlineSink,
};
use eventum_core::event::{Event, RecordedEvent};
use eventum_core::event_store::{EventStore, EventStoreError};
use eventum_core::publisher::{EventHandler, EventPublisher};
use eventum_core::saga::{
    AssociationValue, Saga, SagaContext, SagaError, SagaId, SagaRouting, SagaStore, SagaStoreError,
};
use eventum_core::stream::AggregateId;
use eventum_runtime::config::ProcessorConfig;
use eventum_runtime::deadline::TokioDeadlineScheduler;
use eventum_runtime::dispatcher::{CommandBus, RegistrationError};
use eventum_runtime::processor::{ProcessorError, SubscriptionBus, TrackingProcessor};
use eventum_runtime::repository::AggregateRepository;
use eventum_runtime::saga_manager::SagaManager;
use eventum_testing::{InMemoryCursorStore, InMemoryEventStore, InMemorySagaStore};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;

//
// ===== Order aggregate =====
//

/// Commands accepted by the order aggregate.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OrderCommand {
    /// Create a new order for a product.
    CreateOrder {
        /// Order identifier, chosen by the caller.
        order_id: String,
        /// The ordered product.
        product: String,
    },
    /// Confirm a pending order (payment arrived).
    ConfirmOrder {
        /// Order identifier.
        order_id: String,
    },
    /// Cancel a pending order.
    CancelOrder {
        /// Order identifier.
        order_id: String,
        /// Why the order is cancelled.
        reason: String,
    },
}

impl Command for OrderCommand {
    const TYPES: &'static [&'static str] = &["CreateOrder", "ConfirmOrder", "CancelOrder"];

    fn command_type(&self) -> &'static str {
        match self {
            OrderCommand::CreateOrder { .. } => "CreateOrder",
            OrderCommand::ConfirmOrder { .. } => "ConfirmOrder",
            OrderCommand::CancelOrder { .. } => "CancelOrder",
        }
    }

    fn target(&self) -> AggregateId {
        match self {
            OrderCommand::CreateOrder { order_id, .. }
            | OrderCommand::ConfirmOrder { order_id }
            | OrderCommand::CancelOrder { order_id, .. } => AggregateId::new(order_id.clone()),
        }
    }

    fn creates_aggregate(&self) -> bool {
        matches!(self, OrderCommand::CreateOrder { .. })
    }
}

/// Facts recorded about an order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    /// The order was created.
    OrderCreated {
        /// Order identifier.
        order_id: String,
        /// The ordered product.
        product: String,
    },
    /// The order was confirmed.
    OrderConfirmed {
        /// Order identifier.
        order_id: String,
    },
    /// The order was cancelled.
    OrderCancelled {
        /// Order identifier.
        order_id: String,
        /// Why the order was cancelled.
        reason: String,
    },
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated { .. } => "OrderCreated.v1",
            OrderEvent::OrderConfirmed { .. } => "OrderConfirmed.v1",
            OrderEvent::OrderCancelled { .. } => "OrderCancelled.v1",
        }
    }
}

/// Business-rule violations of the order aggregate.
#[derive(Error, Debug)]
pub enum OrderError {
    /// The order does not exist yet.
    #[error("order does not exist")]
    NotCreated,
    /// The order exists and cannot be created again.
    #[error("order already exists")]
    AlreadyExists,
    /// A confirmed order cannot be confirmed again.
    #[error("already confirmed")]
    AlreadyConfirmed,
    /// A cancelled order accepts no further confirmation.
    #[error("order is cancelled")]
    Cancelled,
    /// A confirmed order cannot be cancelled.
    #[error("cannot cancel a confirmed order")]
    CannotCancelConfirmed,
}

/// Where an order is in its life.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum OrderStatus {
    /// No `OrderCreated` event yet.
    #[default]
    New,
    /// Created, awaiting confirmation.
    Pending,
    /// Confirmed.
    Confirmed,
    /// Cancelled, with the recorded reason.
    Cancelled {
        /// Why the order was cancelled.
        reason: String,
    },
}

/// The order aggregate state: a fold of its event stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Order {
    /// The ordered product, once created.
    pub product: Option<String>,
    /// Current status.
    pub status: OrderStatus,
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = OrderError;

    fn aggregate_type() -> &'static str {
        "order"
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder { order_id, product } => match self.status {
                OrderStatus::New => Ok(vec![OrderEvent::OrderCreated {
                    order_id: order_id.clone(),
                    product: product.clone(),
                }]),
                _ => Err(OrderError::AlreadyExists),
            },
            OrderCommand::ConfirmOrder { order_id } => match self.status {
                OrderStatus::New => Err(OrderError::NotCreated),
                OrderStatus::Pending => Ok(vec![OrderEvent::OrderConfirmed {
                    order_id: order_id.clone(),
                }]),
                OrderStatus::Confirmed => Err(OrderError::AlreadyConfirmed),
                OrderStatus::Cancelled { .. } => Err(OrderError::Cancelled),
            },
            OrderCommand::CancelOrder { order_id, reason } => match self.status {
                OrderStatus::New => Err(OrderError::NotCreated),
                OrderStatus::Pending => Ok(vec![OrderEvent::OrderCancelled {
                    order_id: order_id.clone(),
                    reason: reason.clone(),
                }]),
                // Cancelling twice is a no-op so compensation can be retried.
                OrderStatus::Cancelled { .. } => Ok(Vec::new()),
                OrderStatus::Confirmed => Err(OrderError::CannotCancelConfirmed),
            },
        }
    }

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated { product, .. } => {
                self.product = Some(product.clone());
                self.status = OrderStatus::Pending;
            }
            OrderEvent::OrderConfirmed { .. } => {
                self.status = OrderStatus::Confirmed;
            }
            OrderEvent::OrderCancelled { reason, .. } => {
                self.status = OrderStatus::Cancelled {
                    reason: reason.clone(),
                };
            }
        }
    }
}

//
// ===== Payment timeout saga =====
//

/// Name of the saga's payment deadline.
pub const PAYMENT_TIMEOUT_DEADLINE: &str = "payment-timeout";

/// Reason written onto orders cancelled by the saga.
pub const PAYMENT_TIMEOUT_REASON: &str = "Payment timeout";

/// Saga definition: cancel orders that are not confirmed in time.
#[derive(Clone, Debug)]
pub struct PaymentTimeoutSaga {
    /// How long an order may stay unconfirmed.
    pub payment_timeout: Duration,
}

impl Default for PaymentTimeoutSaga {
    fn default() -> Self {
        Self {
            payment_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Persisted per-order saga state.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PaymentTimeoutState {
    /// The order this instance watches.
    pub order_id: String,
    /// The pending payment deadline, until confirmed or fired.
    pub deadline: Option<DeadlineId>,
}

impl Saga for PaymentTimeoutSaga {
    type State = PaymentTimeoutState;

    fn saga_type() -> &'static str {
        "payment-timeout"
    }

    fn route(&self, event: &RecordedEvent) -> SagaRouting {
        let decoded = match event.event_type.as_str() {
            "OrderCreated.v1" | "OrderConfirmed.v1" | "OrderCancelled.v1" => {
                event.payload::<OrderEvent>()
            }
            _ => return SagaRouting::NotInterested,
        };
        match decoded {
            Ok(OrderEvent::OrderCreated { order_id, .. }) => {
                SagaRouting::Starts(AssociationValue::new("order_id", order_id))
            }
            Ok(
                OrderEvent::OrderConfirmed { order_id }
                | OrderEvent::OrderCancelled { order_id, .. },
            ) => SagaRouting::Correlated(smallvec![AssociationValue::new("order_id", order_id)]),
            Err(_) => SagaRouting::NotInterested,
        }
    }

    fn handle(
        &self,
        state: &mut Self::State,
        event: &RecordedEvent,
        ctx: &mut SagaContext,
    ) -> Result<(), SagaError> {
        match event.payload::<OrderEvent>().map_err(SagaError::new)? {
            OrderEvent::OrderCreated { order_id, .. } => {
                // Delivery is at least once: a redelivered creation must not
                // schedule a second deadline.
                if state.deadline.is_none() {
                    state.order_id = order_id;
                    state.deadline =
                        Some(ctx.schedule_deadline(PAYMENT_TIMEOUT_DEADLINE, self.payment_timeout));
                }
            }
            OrderEvent::OrderConfirmed { .. } | OrderEvent::OrderCancelled { .. } => {
                if let Some(deadline) = state.deadline.take() {
                    ctx.cancel_deadline(deadline);
                }
                ctx.end();
            }
        }
        Ok(())
    }

    fn on_deadline(
        &self,
        state: &mut Self::State,
        deadline: &DeadlineMessage,
        ctx: &mut SagaContext,
    ) -> Result<(), SagaError> {
        if deadline.name == PAYMENT_TIMEOUT_DEADLINE {
            state.deadline = None;
            ctx.dispatch(&OrderCommand::CancelOrder {
                order_id: state.order_id.clone(),
                reason: PAYMENT_TIMEOUT_REASON.to_string(),
            })
            .map_err(SagaError::new)?;
            ctx.end();
        }
        Ok(())
    }
}

//
// ===== Wiring =====
//

/// Errors while assembling the system.
#[derive(Error, Debug)]
pub enum SetupError {
    /// A command type was registered twice.
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    /// The deadline scheduler refused its sink.
    #[error(transparent)]
    Scheduler(#[from] DeadlineError),
    /// The saga store could not be read during index rebuild.
    #[error(transparent)]
    SagaStore(#[from] SagaStoreError),
}

/// The assembled order system: every eventum component wired over
/// in-memory stores.
pub struct OrderSystem {
    /// Inbound (and saga-outbound) command interface.
    pub commands: CommandBus,
    /// The event store, source of truth.
    pub event_store: Arc<InMemoryEventStore>,
    /// Persisted saga instances.
    pub saga_store: Arc<InMemorySagaStore>,
    /// The deadline scheduler.
    pub scheduler: TokioDeadlineScheduler,
    /// The payment-timeout saga coordinator.
    pub saga: Arc<SagaManager<PaymentTimeoutSaga>>,
    worker: Option<JoinHandle<Result<(), ProcessorError>>>,
    worker_shutdown: Option<watch::Sender<bool>>,
}

impl OrderSystem {
    /// Assemble and start the system.
    ///
    /// `config.mode` selects how the saga group receives events:
    /// subscribing (inline with the command) or tracking (worker behind a
    /// durable cursor).
    ///
    /// # Errors
    ///
    /// Returns [`SetupError`] if wiring fails; a fresh system with unique
    /// command types cannot fail here.
    pub async fn start(
        saga: PaymentTimeoutSaga,
        config: ProcessorConfig,
    ) -> Result<Self, SetupError> {
        let event_store = Arc::new(InMemoryEventStore::new());
        let bus = SubscriptionBus::new();
        let commands = CommandBus::new();

        let repository = Arc::new(AggregateRepository::<Order>::new(
            Arc::clone(&event_store) as Arc<dyn EventStore>,
            Arc::new(bus.clone()) as Arc<dyn EventPublisher>,
        ));
        commands.register_aggregate(repository).await?;

        let scheduler = TokioDeadlineScheduler::new();
        let saga_store = Arc::new(InMemorySagaStore::new());
        let manager = Arc::new(SagaManager::new(
            saga,
            Arc::clone(&saga_store) as Arc<dyn SagaStore>,
            commands.clone(),
            Arc::new(scheduler.clone()) as Arc<dyn DeadlineScheduler>,
            config.error_policy,
        ));
        scheduler.connect(Arc::clone(&manager) as Arc<dyn DeadlineSink>)?;
        manager.initialize().await?;

        let (worker, worker_shutdown) = match config.mode {
            ProcessingMode::Subscribing => {
                bus.register_subscribing(
                    PaymentTimeoutSaga::saga_type(),
                    config.error_policy,
                    vec![Arc::clone(&manager) as Arc<dyn EventHandler>],
                )
                .await;
                (None, None)
            }
            ProcessingMode::Tracking => {
                let cursors = Arc::new(InMemoryCursorStore::new());
                let (processor, shutdown) = TrackingProcessor::new(
                    PaymentTimeoutSaga::saga_type(),
                    Arc::clone(&event_store) as Arc<dyn EventStore>,
                    cursors,
                    config,
                    bus.wakeup(),
                );
                let worker = processor
                    .with_handler(Arc::clone(&manager) as Arc<dyn EventHandler>)
                    .spawn();
                (Some(worker), Some(shutdown))
            }
        };

        Ok(Self {
            commands,
            event_store,
            saga_store,
            scheduler,
            saga: manager,
            worker,
            worker_shutdown,
        })
    }

    /// Current state of an order, reconstructed by replaying its stream.
    ///
    /// Returns `None` for an order that was never created.
    ///
    /// # Errors
    ///
    /// Returns [`EventStoreError`] if the stream cannot be read or an
    /// event payload does not decode.
    pub async fn order(&self, order_id: &str) -> Result<Option<Order>, EventStoreError> {
        let records = self
            .event_store
            .read_stream(AggregateId::new(order_id))
            .await?;
        if records.is_empty() {
            return Ok(None);
        }
        let mut order = Order::default();
        for record in &records {
            let event: OrderEvent = record
                .payload()
                .map_err(|e| EventStoreError::Serialization(e.to_string()))?;
            order.apply(&event);
        }
        Ok(Some(order))
    }

    /// Saga instances currently watching an order.
    pub async fn sagas_watching(&self, order_id: &str) -> Vec<SagaId> {
        self.saga
            .associated_instances(&AssociationValue::new("order_id", order_id))
            .await
    }

    /// Stop the tracking worker (if any) and the deadline scheduler.
    pub async fn shutdown(mut self) {
        if let Some(shutdown) = self.worker_shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => tracing::error!(error = %error, "tracking worker stopped with error"),
                Err(error) => tracing::error!(error = %error, "tracking worker task failed"),
            }
        }
        self.scheduler.shutdown().await;
    }
}
