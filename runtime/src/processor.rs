//! Event delivery: the subscription bus and tracking processors.
//!
//! Two delivery modes exist, selectable per subscriber group:
//!
//! - **Subscribing**: handlers run inside [`SubscriptionBus::publish`], in
//!   the same execution context as the command that committed the events.
//!   With [`ErrorPolicy::Propagate`] a handler failure surfaces to the
//!   command sender; the committed events are never un-appended.
//! - **Tracking**: a dedicated [`TrackingProcessor`] worker pulls newly
//!   committed events from the store's global feed behind a durable
//!   cursor. Failures are retried with incremental backoff and never block
//!   the publishing side. The cursor advances past an event only once
//!   every handler in the group has processed it (or the swallow policy
//!   skipped it); after a crash the processor resumes from the saved
//!   cursor, which is what makes delivery at-least-once.
//!
//! The bus wakes tracking workers through a shared [`Notify`] after each
//! publish; workers also poll on an interval as a fallback.

use crate::config::ProcessorConfig;
use crate::retry::retry_with_backoff;
use eventum_core::config::ErrorPolicy;
use eventum_core::event::RecordedEvent;
use eventum_core::event_store::{EventStore, EventStoreError};
use eventum_core::publisher::{
    CursorStore, CursorStoreError, EventHandler, EventPublisher, HandlerError, PublishError,
};
use eventum_core::stream::GlobalPosition;
use metrics::counter;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{Notify, RwLock, watch};
use tokio::task::JoinHandle;

/// Errors that stop a tracking processor.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// The cursor store failed.
    #[error("Cursor store failure in processor '{processor}': {source}")]
    Cursor {
        /// The affected processor group.
        processor: String,
        /// Underlying failure.
        #[source]
        source: CursorStoreError,
    },

    /// The event store failed.
    #[error("Event store failure in processor '{processor}': {source}")]
    Store {
        /// The affected processor group.
        processor: String,
        /// Underlying failure.
        #[source]
        source: EventStoreError,
    },

    /// A handler exhausted its retries under the propagate policy.
    ///
    /// The processor halts without advancing its cursor; the event will be
    /// redelivered when the processor is restarted.
    #[error("Processor '{processor}' halted by error policy: {source}")]
    Halted {
        /// The affected processor group.
        processor: String,
        /// The handler failure that exhausted its retries.
        #[source]
        source: HandlerError,
    },
}

struct SubscribingGroup {
    name: String,
    error_policy: ErrorPolicy,
    handlers: Vec<Arc<dyn EventHandler>>,
}

#[derive(Default)]
struct BusState {
    groups: RwLock<Vec<SubscribingGroup>>,
}

/// Fan-out point for committed events.
///
/// Subscribing-mode groups are registered here and run inline in
/// [`EventPublisher::publish`]. Tracking-mode groups do not register with
/// the bus at all; they share its [`SubscriptionBus::wakeup`] handle so a
/// publish wakes them immediately instead of waiting out the poll
/// interval.
#[derive(Clone, Default)]
pub struct SubscriptionBus {
    state: Arc<BusState>,
    wakeup: Arc<Notify>,
}

impl SubscriptionBus {
    /// Create a bus with no groups.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscribing-mode group.
    ///
    /// Handlers run per event in registration order, inside the publish
    /// call.
    pub async fn register_subscribing(
        &self,
        name: impl Into<String>,
        error_policy: ErrorPolicy,
        handlers: Vec<Arc<dyn EventHandler>>,
    ) {
        let name = name.into();
        tracing::info!(group = %name, ?error_policy, handlers = handlers.len(), "subscribing group registered");
        self.state.groups.write().await.push(SubscribingGroup {
            name,
            error_policy,
            handlers,
        });
    }

    /// The wakeup handle tracking processors wait on.
    #[must_use]
    pub fn wakeup(&self) -> Arc<Notify> {
        Arc::clone(&self.wakeup)
    }

    #[allow(clippy::cognitive_complexity)]
    async fn publish_batch(&self, events: Vec<RecordedEvent>) -> Result<(), PublishError> {
        // Events are already committed; wake the pull side first so a
        // failing subscribing handler cannot delay tracking groups.
        self.wakeup.notify_waiters();
        counter!("eventum_events_published_total").increment(events.len() as u64);

        let groups = self.state.groups.read().await;
        for group in groups.iter() {
            for event in &events {
                for handler in &group.handlers {
                    if !handler.wants(event) {
                        continue;
                    }
                    if let Err(failure) = handler.handle(event).await {
                        counter!("eventum_handler_failures_total", "group" => group.name.clone())
                            .increment(1);
                        match group.error_policy {
                            ErrorPolicy::Swallow => {
                                tracing::error!(
                                    group = %group.name,
                                    handler = %failure.handler,
                                    event = %event,
                                    error = %failure,
                                    "event handler failed; continuing"
                                );
                            }
                            ErrorPolicy::Propagate => return Err(PublishError::Handler(failure)),
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl EventPublisher for SubscriptionBus {
    fn publish(
        &self,
        events: &[RecordedEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
        let events = events.to_vec();
        Box::pin(self.publish_batch(events))
    }
}

/// A tracking-mode subscriber group: one worker, one durable cursor.
pub struct TrackingProcessor {
    name: String,
    store: Arc<dyn EventStore>,
    cursors: Arc<dyn CursorStore>,
    handlers: Vec<Arc<dyn EventHandler>>,
    config: ProcessorConfig,
    wakeup: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
}

impl TrackingProcessor {
    /// Create a tracking processor.
    ///
    /// Pass the bus's [`SubscriptionBus::wakeup`] handle so the worker is
    /// woken on publish. Returns the processor and its shutdown sender;
    /// send `true` to stop the worker after the event it is currently
    /// processing.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn EventStore>,
        cursors: Arc<dyn CursorStore>,
        config: ProcessorConfig,
        wakeup: Arc<Notify>,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        (
            Self {
                name: name.into(),
                store,
                cursors,
                handlers: Vec::new(),
                config,
                wakeup,
                shutdown: shutdown_rx,
            },
            shutdown_tx,
        )
    }

    /// Add a handler to the group.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Spawn the worker onto tokio.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<Result<(), ProcessorError>> {
        tokio::spawn(self.run())
    }

    /// Run the worker until shutdown or a halting error.
    ///
    /// # Errors
    ///
    /// - [`ProcessorError::Halted`] when a handler exhausts its retries
    ///   under [`ErrorPolicy::Propagate`]; the cursor stays put.
    /// - [`ProcessorError::Store`] / [`ProcessorError::Cursor`] on backend
    ///   failures.
    #[allow(clippy::cognitive_complexity)]
    pub async fn run(mut self) -> Result<(), ProcessorError> {
        let mut position = self
            .cursors
            .load(&self.name)
            .await
            .map_err(|source| ProcessorError::Cursor {
                processor: self.name.clone(),
                source,
            })?
            .unwrap_or(GlobalPosition::ORIGIN);

        tracing::info!(processor = %self.name, %position, "tracking processor started");

        while !*self.shutdown.borrow() {
            let batch = self
                .store
                .read_all(position, self.config.batch_size)
                .await
                .map_err(|source| ProcessorError::Store {
                    processor: self.name.clone(),
                    source,
                })?;

            if batch.is_empty() {
                tokio::select! {
                    () = self.wakeup.notified() => {}
                    () = tokio::time::sleep(self.config.poll_interval) => {}
                    _ = self.shutdown.changed() => {}
                }
                continue;
            }

            for event in batch {
                self.deliver(&event).await?;
                position = event.position.next();
                self.cursors
                    .save(&self.name, position)
                    .await
                    .map_err(|source| ProcessorError::Cursor {
                        processor: self.name.clone(),
                        source,
                    })?;
            }
        }

        tracing::info!(processor = %self.name, %position, "tracking processor stopped");
        Ok(())
    }

    async fn deliver(&self, event: &RecordedEvent) -> Result<(), ProcessorError> {
        for handler in &self.handlers {
            if !handler.wants(event) {
                continue;
            }
            let outcome = retry_with_backoff(&self.config.retry, || handler.handle(event)).await;
            if let Err(failure) = outcome {
                counter!("eventum_handler_failures_total", "group" => self.name.clone())
                    .increment(1);
                match self.config.error_policy {
                    ErrorPolicy::Swallow => {
                        tracing::error!(
                            processor = %self.name,
                            handler = %failure.handler,
                            event = %event,
                            error = %failure,
                            "handler failed after retries; skipping event"
                        );
                    }
                    ErrorPolicy::Propagate => {
                        return Err(ProcessorError::Halted {
                            processor: self.name.clone(),
                            source: failure,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::RetryPolicy;
    use eventum_core::event::NewEvent;
    use eventum_core::stream::{AggregateId, Version};
    use eventum_testing::{FailNTimesHandler, InMemoryCursorStore, InMemoryEventStore, RecordingHandler};
    use std::time::Duration;

    fn pending(event_type: &str) -> NewEvent {
        NewEvent::new(event_type.to_string(), vec![1], None)
    }

    async fn seed(store: &InMemoryEventStore, id: &str, count: usize) {
        let events = (0..count).map(|_| pending("Seeded.v1")).collect();
        store
            .append(AggregateId::new(id), Version::INITIAL, events)
            .await
            .unwrap_or_default();
    }

    fn fast_config() -> ProcessorConfig {
        ProcessorConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_retry(RetryPolicy::default().with_initial_delay(Duration::from_millis(1)))
    }

    #[tokio::test]
    async fn subscribing_group_swallow_policy_continues() {
        let bus = SubscriptionBus::new();
        let failing = Arc::new(FailNTimesHandler::new("flaky", usize::MAX));
        let recording = Arc::new(RecordingHandler::new("record"));
        bus.register_subscribing(
            "group-a",
            ErrorPolicy::Swallow,
            vec![failing, Arc::clone(&recording) as Arc<dyn EventHandler>],
        )
        .await;

        let store = InMemoryEventStore::new();
        let events = store
            .append(AggregateId::new("s-1"), Version::INITIAL, vec![pending("E.v1")])
            .await
            .unwrap_or_default();

        assert!(bus.publish(&events).await.is_ok());
        assert_eq!(recording.seen().await.len(), 1);
    }

    #[tokio::test]
    async fn subscribing_group_propagate_policy_fails_publish() {
        let bus = SubscriptionBus::new();
        let failing = Arc::new(FailNTimesHandler::new("flaky", usize::MAX));
        bus.register_subscribing("group-a", ErrorPolicy::Propagate, vec![failing])
            .await;

        let store = InMemoryEventStore::new();
        let events = store
            .append(AggregateId::new("s-1"), Version::INITIAL, vec![pending("E.v1")])
            .await
            .unwrap_or_default();

        assert!(bus.publish(&events).await.is_err());
    }

    #[tokio::test]
    async fn tracking_processor_drains_feed_and_advances_cursor() {
        let store = Arc::new(InMemoryEventStore::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        seed(&store, "s-1", 3).await;

        let recording = Arc::new(RecordingHandler::new("record"));
        let (processor, shutdown) = TrackingProcessor::new(
            "tracker",
            Arc::clone(&store) as Arc<dyn EventStore>,
            Arc::clone(&cursors) as Arc<dyn CursorStore>,
            fast_config(),
            Arc::new(Notify::new()),
        );
        let worker = processor
            .with_handler(Arc::clone(&recording) as Arc<dyn EventHandler>)
            .spawn();

        for _ in 0..200 {
            if recording.seen().await.len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(recording.seen().await.len(), 3);

        shutdown.send(true).unwrap_or_default();
        let outcome = worker.await;
        assert!(matches!(outcome, Ok(Ok(()))));

        let saved = cursors.load("tracker").await.unwrap_or_default();
        assert_eq!(saved, Some(GlobalPosition::new(3)));
    }

    #[tokio::test]
    async fn tracking_processor_retries_transient_failures() {
        let store = Arc::new(InMemoryEventStore::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        seed(&store, "s-1", 1).await;

        let flaky = Arc::new(FailNTimesHandler::new("flaky", 2));
        let (processor, shutdown) = TrackingProcessor::new(
            "tracker",
            Arc::clone(&store) as Arc<dyn EventStore>,
            Arc::clone(&cursors) as Arc<dyn CursorStore>,
            fast_config(),
            Arc::new(Notify::new()),
        );
        let worker = processor
            .with_handler(Arc::clone(&flaky) as Arc<dyn EventHandler>)
            .spawn();

        for _ in 0..200 {
            if flaky.successes() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(flaky.successes(), 1);
        assert_eq!(flaky.attempts(), 3);

        shutdown.send(true).unwrap_or_default();
        let _ = worker.await;
    }

    #[tokio::test]
    async fn tracking_processor_halts_on_propagate_when_retries_exhaust() {
        let store = Arc::new(InMemoryEventStore::new());
        let cursors = Arc::new(InMemoryCursorStore::new());
        seed(&store, "s-1", 1).await;

        let failing = Arc::new(FailNTimesHandler::new("broken", usize::MAX));
        let config = fast_config()
            .with_error_policy(ErrorPolicy::Propagate)
            .with_retry(RetryPolicy::none());
        let (processor, _shutdown) = TrackingProcessor::new(
            "tracker",
            Arc::clone(&store) as Arc<dyn EventStore>,
            Arc::clone(&cursors) as Arc<dyn CursorStore>,
            config,
            Arc::new(Notify::new()),
        );
        let worker = processor.with_handler(failing).spawn();

        let outcome = worker.await;
        assert!(matches!(outcome, Ok(Err(ProcessorError::Halted { .. }))));
        // Cursor never advanced past the poisoned event.
        assert_eq!(cursors.load("tracker").await.unwrap_or_default(), None);
    }
}
