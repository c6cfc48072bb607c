//! Saga coordinator: correlation, lifecycle, and effect application.
//!
//! One [`SagaManager`] serves all instances of one saga type. It is
//! registered as an ordinary [`EventHandler`] with a processor group (so
//! saga delivery rides the same at-least-once path as projections) and as
//! the [`DeadlineSink`] of the deadline scheduler.
//!
//! # Routing
//!
//! For every event, [`Saga::route`] classifies the saga type's interest.
//! A start event creates a new instance only when no instance is currently
//! associated with the routing value; otherwise it is delivered to the
//! existing ones. Correlated events are routed through the association
//! index, a many-to-many map from association value to instance ids that
//! is rebuilt from the saga store at startup.
//!
//! # Consistency
//!
//! Delivery to one instance is serialized by a per-instance lock: the
//! handler's state mutation, the index updates, and the record save happen
//! under it. Command dispatches and deadline operations recorded by the
//! handler run after the lock is released; commands go out through
//! `send_async` so a saga reacting to an event can command the very
//! aggregate that produced it without deadlocking the publish path.
//!
//! A handler failure discards the state mutation and all recorded effects,
//! leaves the instance `Active`, and reports the failure to the enclosing
//! processor group's error policy.

use crate::dispatcher::CommandBus;
use crate::repository::KeyedLocks;
use eventum_core::command::CommandEnvelope;
use eventum_core::config::ErrorPolicy;
use eventum_core::deadline::{
    DeadlineId, DeadlineMessage, DeadlineScheduler, DeadlineSink, ScheduledDeadline,
};
use eventum_core::event::RecordedEvent;
use eventum_core::publisher::{EventHandler, HandlerError};
use eventum_core::saga::{
    AssociationValue, Saga, SagaContext, SagaEffect, SagaId, SagaLifecycle, SagaRecord,
    SagaRouting, SagaStore, SagaStoreError,
};
use metrics::counter;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;

/// External actions deferred until the instance lock is released.
enum DeferredEffect {
    Dispatch(CommandEnvelope),
    Schedule(ScheduledDeadline),
    Cancel(DeadlineId),
}

/// Coordinator for all instances of saga type `S`.
pub struct SagaManager<S: Saga> {
    saga: S,
    store: Arc<dyn SagaStore>,
    commands: CommandBus,
    scheduler: Arc<dyn DeadlineScheduler>,
    deadline_error_policy: ErrorPolicy,
    index: RwLock<HashMap<AssociationValue, HashSet<SagaId>>>,
    locks: KeyedLocks<SagaId>,
}

impl<S: Saga> SagaManager<S> {
    /// Create a coordinator for the given saga definition.
    ///
    /// `saga` carries the definition's configuration; `commands` is the
    /// outbound command interface handed to saga handlers; `scheduler`
    /// receives their deadline requests. `deadline_error_policy` governs
    /// deadline-handler failures (event handler failures are governed by
    /// the processor group the manager is registered with).
    #[must_use]
    pub fn new(
        saga: S,
        store: Arc<dyn SagaStore>,
        commands: CommandBus,
        scheduler: Arc<dyn DeadlineScheduler>,
        deadline_error_policy: ErrorPolicy,
    ) -> Self {
        Self {
            saga,
            store,
            commands,
            scheduler,
            deadline_error_policy,
            index: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    /// Rebuild the association index from the saga store.
    ///
    /// Call once at startup, before events start flowing, so instances
    /// that survived a restart keep receiving their correlated events.
    ///
    /// # Errors
    ///
    /// Returns [`SagaStoreError`] if the store cannot be read.
    pub async fn initialize(&self) -> Result<(), SagaStoreError> {
        let records = self.store.load_active(S::saga_type()).await?;
        let mut index = self.index.write().await;
        index.clear();
        let mut instances = 0_usize;
        for record in records {
            for association in record.associations {
                index.entry(association).or_default().insert(record.saga_id);
            }
            instances += 1;
        }
        drop(index);
        tracing::info!(saga = S::saga_type(), instances, "association index rebuilt");
        Ok(())
    }

    /// Instance ids currently associated with `association`.
    pub async fn associated_instances(&self, association: &AssociationValue) -> Vec<SagaId> {
        self.index
            .read()
            .await
            .get(association)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    async fn on_event(&self, event: &RecordedEvent) -> Result<(), HandlerError> {
        match self.saga.route(event) {
            SagaRouting::NotInterested => Ok(()),
            SagaRouting::Starts(association) => {
                let existing = self.associated_instances(&association).await;
                if existing.is_empty() {
                    self.start_instance(association, event).await
                } else {
                    self.deliver_to(&existing, event).await
                }
            }
            SagaRouting::Correlated(associations) => {
                let mut targets: Vec<SagaId> = Vec::new();
                let mut seen: HashSet<SagaId> = HashSet::new();
                {
                    let index = self.index.read().await;
                    for association in &associations {
                        if let Some(ids) = index.get(association) {
                            for id in ids {
                                if seen.insert(*id) {
                                    targets.push(*id);
                                }
                            }
                        }
                    }
                }
                self.deliver_to(&targets, event).await
            }
        }
    }

    async fn start_instance(
        &self,
        association: AssociationValue,
        event: &RecordedEvent,
    ) -> Result<(), HandlerError> {
        let saga_id = SagaId::generate();
        let _guard = self.locks.acquire(&saga_id).await;

        let mut state = S::State::default();
        let mut ctx = SagaContext::new(saga_id);
        self.saga.handle(&mut state, event, &mut ctx)
            .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?;

        let mut record = SagaRecord {
            saga_id,
            saga_type: S::saga_type().to_string(),
            lifecycle: SagaLifecycle::Active,
            associations: vec![association.clone()],
            state: SagaRecord::encode_state::<S>(&state)
                .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?,
        };
        self.index
            .write()
            .await
            .entry(association)
            .or_default()
            .insert(saga_id);

        let deferred = self.apply_instance_effects(&mut record, ctx.into_effects()).await;
        self.persist(record).await?;
        counter!("eventum_sagas_started_total", "saga" => S::saga_type()).increment(1);
        tracing::debug!(saga = S::saga_type(), %saga_id, event = %event, "saga instance started");

        self.run_deferred(saga_id, deferred).await;
        Ok(())
    }

    async fn deliver_to(
        &self,
        targets: &[SagaId],
        event: &RecordedEvent,
    ) -> Result<(), HandlerError> {
        let mut first_failure: Option<HandlerError> = None;
        for saga_id in targets {
            if let Err(failure) = self.deliver_to_instance(*saga_id, event).await {
                // Other instances still get the event; the first failure is
                // what the processor group's policy acts on.
                if first_failure.is_none() {
                    first_failure = Some(failure);
                } else {
                    tracing::error!(
                        saga = S::saga_type(),
                        %saga_id,
                        error = %failure,
                        "further saga instance failed on the same event"
                    );
                }
            }
        }
        first_failure.map_or(Ok(()), Err)
    }

    async fn deliver_to_instance(
        &self,
        saga_id: SagaId,
        event: &RecordedEvent,
    ) -> Result<(), HandlerError> {
        let deferred;
        {
            let _guard = self.locks.acquire(&saga_id).await;
            let Some(record) = self
                .store
                .load(S::saga_type(), saga_id)
                .await
                .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?
            else {
                return Ok(());
            };
            if record.lifecycle == SagaLifecycle::Ended {
                return Ok(());
            }

            let mut state = record
                .decode_state::<S>()
                .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?;
            let mut ctx = SagaContext::new(saga_id);
            self.saga.handle(&mut state, event, &mut ctx)
                .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?;

            let mut record = SagaRecord {
                state: SagaRecord::encode_state::<S>(&state)
                    .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?,
                ..record
            };
            deferred = self.apply_instance_effects(&mut record, ctx.into_effects()).await;
            self.persist(record).await?;
        }
        self.run_deferred(saga_id, deferred).await;
        Ok(())
    }

    /// Apply association and lifecycle effects to the record and index,
    /// deferring external actions until the instance lock is released.
    async fn apply_instance_effects(
        &self,
        record: &mut SagaRecord,
        effects: Vec<SagaEffect>,
    ) -> Vec<DeferredEffect> {
        let mut deferred = Vec::new();
        for effect in effects {
            match effect {
                SagaEffect::Dispatch(envelope) => deferred.push(DeferredEffect::Dispatch(envelope)),
                SagaEffect::Schedule(deadline) => deferred.push(DeferredEffect::Schedule(deadline)),
                SagaEffect::CancelDeadline(id) => deferred.push(DeferredEffect::Cancel(id)),
                SagaEffect::Associate(association) => {
                    if !record.associations.contains(&association) {
                        record.associations.push(association.clone());
                    }
                    self.index
                        .write()
                        .await
                        .entry(association)
                        .or_default()
                        .insert(record.saga_id);
                }
                SagaEffect::Dissociate(association) => {
                    record.associations.retain(|a| a != &association);
                    self.unindex(record.saga_id, &association).await;
                }
                SagaEffect::End => {
                    record.lifecycle = SagaLifecycle::Ended;
                    for association in record.associations.clone() {
                        self.unindex(record.saga_id, &association).await;
                    }
                }
            }
        }
        deferred
    }

    async fn unindex(&self, saga_id: SagaId, association: &AssociationValue) {
        let mut index = self.index.write().await;
        if let Some(ids) = index.get_mut(association) {
            ids.remove(&saga_id);
            if ids.is_empty() {
                index.remove(association);
            }
        }
    }

    async fn persist(&self, record: SagaRecord) -> Result<(), HandlerError> {
        if record.lifecycle == SagaLifecycle::Ended {
            counter!("eventum_sagas_ended_total", "saga" => S::saga_type()).increment(1);
            tracing::debug!(saga = S::saga_type(), saga_id = %record.saga_id, "saga instance ended");
            self.store
                .remove(S::saga_type(), record.saga_id)
                .await
                .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))
        } else {
            self.store
                .save(record)
                .await
                .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))
        }
    }

    /// Run deferred external actions: command dispatches and deadline
    /// operations. Failures here are logged, not raised; the handler that
    /// requested them has already committed its state transition.
    ///
    /// Commands go out fire-and-observe so a saga can command the very
    /// aggregate whose event it is reacting to, even when the manager runs
    /// in a subscribing group inside that aggregate's publish call.
    async fn run_deferred(&self, saga_id: SagaId, deferred: Vec<DeferredEffect>) {
        for effect in deferred {
            match effect {
                DeferredEffect::Dispatch(envelope) => {
                    let pending = self.commands.send_async(envelope);
                    tokio::spawn(async move {
                        if let Err(error) = pending.join().await {
                            tracing::error!(
                                saga = S::saga_type(),
                                %saga_id,
                                error = %error,
                                "saga-issued command failed"
                            );
                        }
                    });
                }
                DeferredEffect::Schedule(deadline) => {
                    if let Err(error) = self.scheduler.schedule(deadline).await {
                        tracing::error!(
                            saga = S::saga_type(),
                            %saga_id,
                            error = %error,
                            "deadline scheduling failed"
                        );
                    }
                }
                DeferredEffect::Cancel(deadline_id) => {
                    if let Err(error) = self.scheduler.cancel(deadline_id).await {
                        tracing::error!(
                            saga = S::saga_type(),
                            %saga_id,
                            %deadline_id,
                            error = %error,
                            "deadline cancellation failed"
                        );
                    }
                }
            }
        }
    }

    async fn on_deadline(&self, message: DeadlineMessage) -> Result<(), HandlerError> {
        let saga_id = message.saga_id;
        let deferred;
        {
            let _guard = self.locks.acquire(&saga_id).await;
            // Missing or ended instances make the firing inert.
            let Some(record) = self
                .store
                .load(S::saga_type(), saga_id)
                .await
                .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?
            else {
                tracing::debug!(saga = S::saga_type(), %saga_id, name = %message.name, "deadline fired for missing instance");
                return Ok(());
            };
            if record.lifecycle == SagaLifecycle::Ended {
                return Ok(());
            }

            let mut state = record
                .decode_state::<S>()
                .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?;
            let mut ctx = SagaContext::new(saga_id);
            self.saga.on_deadline(&mut state, &message, &mut ctx)
                .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?;

            let mut record = SagaRecord {
                state: SagaRecord::encode_state::<S>(&state)
                    .map_err(|e| HandlerError::new(S::saga_type(), e.to_string()))?,
                ..record
            };
            deferred = self.apply_instance_effects(&mut record, ctx.into_effects()).await;
            self.persist(record).await?;
        }
        self.run_deferred(saga_id, deferred).await;
        Ok(())
    }
}

impl<S: Saga> EventHandler for SagaManager<S> {
    fn name(&self) -> &str {
        S::saga_type()
    }

    fn wants(&self, event: &RecordedEvent) -> bool {
        !matches!(self.saga.route(event), SagaRouting::NotInterested)
    }

    fn handle(
        &self,
        event: &RecordedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move { self.on_event(&event).await })
    }
}

impl<S: Saga> DeadlineSink for SagaManager<S> {
    fn deliver(
        &self,
        deadline: DeadlineMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        Box::pin(async move {
            match self.on_deadline(deadline).await {
                Ok(()) => Ok(()),
                Err(failure) => match self.deadline_error_policy {
                    ErrorPolicy::Swallow => {
                        tracing::error!(
                            saga = S::saga_type(),
                            error = %failure,
                            "deadline handler failed; continuing"
                        );
                        Ok(())
                    }
                    ErrorPolicy::Propagate => Err(failure),
                },
            }
        })
    }
}
