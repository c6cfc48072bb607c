//! Saga contract: durable, event-driven processes correlated by
//! association values.
//!
//! A saga coordinates work across multiple aggregates over time. Each
//! instance is keyed by one or more [`AssociationValue`]s; every committed
//! event whose payload carries a matching value is routed to the instance.
//! The lifecycle is `Uninitiated -> Active -> Ended`: `Uninitiated` means no
//! record exists yet, `Active` is entered by a start event, and once
//! `Ended` the instance receives nothing further and is removed.
//!
//! A saga handler has exactly two externally visible effects: dispatching
//! commands and scheduling or cancelling deadlines. It never touches the
//! event store. Effects are collected in a [`SagaContext`] while the
//! handler runs and applied by the coordinator afterwards, so a failing
//! handler leaves no partial side effects behind.

use crate::command::{Command, CommandEnvelope, CommandError};
use crate::deadline::{DeadlineId, DeadlineMessage, ScheduledDeadline};
use crate::event::RecordedEvent;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of one saga instance.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Generate a fresh instance id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SagaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A correlation key/value pair linking events to saga instances.
///
/// The coordinator maintains a many-to-many index from association values
/// to instance ids; an event routed with value `orderId=o2` reaches every
/// instance currently associated with that pair.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssociationValue {
    /// Property name, e.g. `"order_id"`.
    pub key: String,
    /// Property value, e.g. `"o2"`.
    pub value: String,
}

impl AssociationValue {
    /// Create an association value.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for AssociationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Lifecycle state of a persisted saga instance.
///
/// `Uninitiated` is implicit: it is the absence of a record.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaLifecycle {
    /// The instance is live and receives correlated events.
    Active,
    /// The instance is finished; no further events are routed to it.
    Ended,
}

/// How a saga type relates to one committed event.
///
/// Returned by [`Saga::route`]; the coordinator uses it to decide whether
/// to create an instance, deliver to existing instances, or skip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SagaRouting {
    /// The event starts a new instance when none is associated yet.
    ///
    /// The routing association is established on the new instance before
    /// its handler runs, so a started instance is always reachable. If an
    /// instance is already associated with this value, the event is
    /// delivered to it instead of creating another.
    Starts(AssociationValue),

    /// The event is delivered to every instance matching any of these
    /// associations.
    Correlated(SmallVec<[AssociationValue; 2]>),

    /// This saga type does not handle the event.
    NotInterested,
}

/// Failure raised inside a saga handler.
#[derive(Error, Debug)]
#[error("Saga handler failed: {0}")]
pub struct SagaError(String);

impl SagaError {
    /// Create a handler failure from any displayable reason.
    #[must_use]
    pub fn new(reason: impl fmt::Display) -> Self {
        Self(reason.to_string())
    }
}

/// Deferred side effect recorded by a saga handler.
#[derive(Clone, Debug)]
pub enum SagaEffect {
    /// Dispatch a command through the command bus.
    Dispatch(CommandEnvelope),
    /// Schedule a deadline owned by this instance.
    Schedule(ScheduledDeadline),
    /// Cancel a previously scheduled deadline.
    CancelDeadline(DeadlineId),
    /// Index this instance under an additional association.
    Associate(AssociationValue),
    /// Drop one of this instance's associations.
    Dissociate(AssociationValue),
    /// Transition the instance to `Ended`.
    End,
}

/// Effect collector handed to saga handlers.
///
/// Handlers mutate their state directly and record external effects here.
/// The coordinator applies the effects only after the handler returns
/// successfully; on failure they are discarded along with the state
/// mutation.
#[derive(Debug)]
pub struct SagaContext {
    saga_id: SagaId,
    effects: Vec<SagaEffect>,
}

impl SagaContext {
    /// Create a context for the given instance.
    #[must_use]
    pub const fn new(saga_id: SagaId) -> Self {
        Self {
            saga_id,
            effects: Vec::new(),
        }
    }

    /// The instance this context belongs to.
    #[must_use]
    pub const fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    /// Record a command dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Serialization`] if the command payload
    /// cannot be encoded.
    pub fn dispatch<C: Command>(&mut self, command: &C) -> Result<(), CommandError> {
        let envelope = CommandEnvelope::from_command(command, None)?;
        self.effects.push(SagaEffect::Dispatch(envelope));
        Ok(())
    }

    /// Record a pre-built command envelope dispatch.
    pub fn dispatch_envelope(&mut self, envelope: CommandEnvelope) {
        self.effects.push(SagaEffect::Dispatch(envelope));
    }

    /// Schedule a named deadline for this instance after `delay`.
    ///
    /// Returns the deadline id; store it in saga state to cancel later.
    pub fn schedule_deadline(&mut self, name: impl Into<String>, delay: Duration) -> DeadlineId {
        let deadline = ScheduledDeadline::new(self.saga_id, name, delay);
        let id = deadline.deadline_id;
        self.effects.push(SagaEffect::Schedule(deadline));
        id
    }

    /// Cancel a deadline scheduled earlier.
    pub fn cancel_deadline(&mut self, deadline_id: DeadlineId) {
        self.effects.push(SagaEffect::CancelDeadline(deadline_id));
    }

    /// Index this instance under an additional association value.
    pub fn associate(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.effects
            .push(SagaEffect::Associate(AssociationValue::new(key, value)));
    }

    /// Drop one of this instance's associations.
    pub fn dissociate(&mut self, association: AssociationValue) {
        self.effects.push(SagaEffect::Dissociate(association));
    }

    /// End this instance. No further events will be routed to it.
    pub fn end(&mut self) {
        self.effects.push(SagaEffect::End);
    }

    /// Consume the context, yielding the recorded effects in order.
    #[must_use]
    pub fn into_effects(self) -> Vec<SagaEffect> {
        self.effects
    }
}

/// An event-driven, long-running process definition.
///
/// The implementing value holds the saga's configuration (timeout lengths,
/// policy knobs); the per-instance data lives in [`Saga::State`], which
/// must serialize so instances survive restarts. Handles to live services
/// (the command bus, the scheduler) and configuration are never part of
/// the persisted state; the coordinator re-injects them on every delivery.
pub trait Saga: Send + Sync + 'static {
    /// Per-instance process state, persisted between deliveries.
    type State: Clone + Default + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Stable name of this saga type, used for storage scoping and logs.
    fn saga_type() -> &'static str;

    /// Classify an event: does it start an instance, correlate to existing
    /// instances, or not concern this saga type at all?
    fn route(&self, event: &RecordedEvent) -> SagaRouting;

    /// React to a routed event.
    ///
    /// Mutate `state` freely and record external effects on `ctx`.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError`] on failure; the coordinator then discards the
    /// state mutation and the recorded effects, reports the failure to the
    /// processor group's error policy, and leaves the instance `Active`.
    fn handle(
        &self,
        state: &mut Self::State,
        event: &RecordedEvent,
        ctx: &mut SagaContext,
    ) -> Result<(), SagaError>;

    /// React to a fired deadline.
    ///
    /// Routed by instance id, not by association; the default ignores it.
    ///
    /// # Errors
    ///
    /// Returns [`SagaError`] on failure, treated exactly like an event
    /// handler failure.
    fn on_deadline(
        &self,
        state: &mut Self::State,
        deadline: &DeadlineMessage,
        ctx: &mut SagaContext,
    ) -> Result<(), SagaError> {
        let _ = (state, deadline, ctx);
        Ok(())
    }
}

/// Persisted form of one saga instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SagaRecord {
    /// Instance identifier.
    pub saga_id: SagaId,
    /// The saga type that owns this instance.
    pub saga_type: String,
    /// Current lifecycle state.
    pub lifecycle: SagaLifecycle,
    /// Associations the instance is currently indexed under.
    pub associations: Vec<AssociationValue>,
    /// Bincode-serialized [`Saga::State`].
    pub state: Vec<u8>,
}

impl SagaRecord {
    /// Decode the persisted state into its typed form.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::Serialization`] if the bytes do not decode.
    pub fn decode_state<S: Saga>(&self) -> Result<S::State, SagaStoreError> {
        bincode::deserialize(&self.state)
            .map_err(|e| SagaStoreError::Serialization(e.to_string()))
    }

    /// Encode typed state into its persisted form.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::Serialization`] if encoding fails.
    pub fn encode_state<S: Saga>(state: &S::State) -> Result<Vec<u8>, SagaStoreError> {
        bincode::serialize(state).map_err(|e| SagaStoreError::Serialization(e.to_string()))
    }
}

/// Errors from saga persistence.
#[derive(Error, Debug)]
pub enum SagaStoreError {
    /// The backing storage failed.
    #[error("Saga storage error: {0}")]
    Storage(String),

    /// Instance state could not be (de)serialized.
    #[error("Saga state serialization error: {0}")]
    Serialization(String),
}

/// Persistence seam for saga instances.
///
/// The coordinator owns the association index in memory and rebuilds it
/// from [`SagaStore::load_active`] at startup; the store only has to keep
/// records.
pub trait SagaStore: Send + Sync {
    /// Load one instance record.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::Storage`] if the backend fails.
    fn load(
        &self,
        saga_type: &str,
        saga_id: SagaId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<SagaRecord>, SagaStoreError>> + Send + '_>>;

    /// Insert or replace an instance record.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::Storage`] if the backend fails.
    fn save(
        &self,
        record: SagaRecord,
    ) -> Pin<Box<dyn Future<Output = Result<(), SagaStoreError>> + Send + '_>>;

    /// Remove an instance record, if present.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::Storage`] if the backend fails.
    fn remove(
        &self,
        saga_type: &str,
        saga_id: SagaId,
    ) -> Pin<Box<dyn Future<Output = Result<(), SagaStoreError>> + Send + '_>>;

    /// Load every `Active` instance of a saga type, for index rebuilds.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError::Storage`] if the backend fails.
    fn load_active(
        &self,
        saga_type: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<SagaRecord>, SagaStoreError>> + Send + '_>>;
}
