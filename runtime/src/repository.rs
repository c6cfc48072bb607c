//! Aggregate repository: the load, decide, append, publish pipeline.
//!
//! One repository instance serves all instances of one aggregate type. A
//! dispatch proceeds as:
//!
//! 1. Acquire the per-identifier lock (one writer per aggregate instance).
//! 2. Read the stream and fold it through [`Aggregate::apply`] to
//!    reconstruct current state, recording the loaded version.
//! 3. Run [`Aggregate::handle`]; a rejection surfaces as
//!    `DispatchError::Validation` with nothing appended.
//! 4. Append the produced batch with the loaded version as the expected
//!    version; a conflict fails the whole dispatch with no partial
//!    application.
//! 5. Hand the committed records to the event publisher.
//!
//! Commands against different identifiers proceed independently; the lock
//! registry only serializes writers of the same stream.

use crate::dispatcher::CommandHandler;
use eventum_core::aggregate::Aggregate;
use eventum_core::command::{Command, CommandEnvelope};
use eventum_core::error::DispatchError;
use eventum_core::event::{NewEvent, RecordedEvent};
use eventum_core::event_store::EventStore;
use eventum_core::publisher::{EventPublisher, PublishError};
use eventum_core::stream::{AggregateId, Version};
use metrics::counter;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Per-key async lock registry.
///
/// Locks are created on first use and kept for the life of the registry;
/// the key space (aggregate ids, saga ids) is assumed to be bounded by the
/// working set.
pub(crate) struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the lock for `key`, waiting behind any current holder.
    pub(crate) async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        entry.lock_owned().await
    }
}

/// Routes commands to aggregate instances of type `A` and owns their
/// write path.
pub struct AggregateRepository<A: Aggregate> {
    store: Arc<dyn EventStore>,
    publisher: Arc<dyn EventPublisher>,
    locks: KeyedLocks<AggregateId>,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A: Aggregate> AggregateRepository<A> {
    /// Create a repository over the given store and publisher.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            publisher,
            locks: KeyedLocks::new(),
            _aggregate: PhantomData,
        }
    }

    /// Execute one command against its target aggregate.
    ///
    /// Returns the committed events, which is empty when the handler
    /// decided nothing needed recording. `metadata` is propagated onto
    /// every produced event.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NotFound`] for a non-creation command whose
    ///   stream is empty.
    /// - [`DispatchError::Validation`] for a creation command on an
    ///   existing stream, or any business-rule rejection from the handler.
    /// - [`DispatchError::Conflict`] when the append lost an optimistic
    ///   concurrency race.
    /// - [`DispatchError::HandlerFailure`] when a subscribing-mode group
    ///   with the propagate policy failed after the commit.
    pub async fn execute(
        &self,
        command: &A::Command,
        metadata: Option<serde_json::Value>,
    ) -> Result<Vec<RecordedEvent>, DispatchError> {
        let target = command.target();
        let _guard = self.locks.acquire(&target).await;

        let history = self.store.read_stream(target.clone()).await?;
        if history.is_empty() && !command.creates_aggregate() {
            return Err(DispatchError::NotFound(target));
        }
        if !history.is_empty() && command.creates_aggregate() {
            return Err(DispatchError::Validation(format!(
                "{} '{target}' already exists",
                A::aggregate_type()
            )));
        }
        let loaded_version = Version::new(history.len() as u64);

        let mut state = A::default();
        for record in &history {
            let event: A::Event = record.payload()?;
            state.apply(&event);
        }

        let produced = state
            .handle(command)
            .map_err(|e| DispatchError::Validation(e.to_string()))?;
        if produced.is_empty() {
            return Ok(Vec::new());
        }
        for event in &produced {
            state.apply(event);
        }

        let mut pending = Vec::with_capacity(produced.len());
        for event in &produced {
            pending.push(NewEvent::from_event(event, metadata.clone())?);
        }

        let recorded = self
            .store
            .append(target.clone(), loaded_version, pending)
            .await?;
        counter!("eventum_events_appended_total", "aggregate" => A::aggregate_type())
            .increment(recorded.len() as u64);
        tracing::debug!(
            aggregate = A::aggregate_type(),
            id = %target,
            count = recorded.len(),
            version = %loaded_version.after_appending(recorded.len() as u64),
            "events appended"
        );

        self.publisher.publish(&recorded).await.map_err(|e| {
            let PublishError::Handler(failure) = e;
            DispatchError::HandlerFailure(failure.to_string())
        })?;

        Ok(recorded)
    }
}

impl<A: Aggregate> CommandHandler for AggregateRepository<A> {
    fn handle(
        &self,
        command: CommandEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, DispatchError>> + Send + '_>> {
        Box::pin(async move {
            let typed: A::Command = command.payload()?;
            self.execute(&typed, command.metadata).await
        })
    }
}
