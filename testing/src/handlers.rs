//! Mock event handlers and publishers.

use eventum_core::event::RecordedEvent;
use eventum_core::publisher::{EventHandler, EventPublisher, HandlerError, PublishError};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Handler that records every event it receives.
pub struct RecordingHandler {
    name: String,
    event_type: Option<String>,
    seen: Mutex<Vec<RecordedEvent>>,
}

impl RecordingHandler {
    /// Create a handler that wants every event.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            event_type: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Restrict the handler to one event type.
    #[must_use]
    pub fn for_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Snapshot of the events received so far, in delivery order.
    pub async fn seen(&self) -> Vec<RecordedEvent> {
        self.seen.lock().await.clone()
    }
}

impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn wants(&self, event: &RecordedEvent) -> bool {
        self.event_type
            .as_ref()
            .is_none_or(|wanted| *wanted == event.event_type)
    }

    fn handle(
        &self,
        event: &RecordedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        let event = event.clone();
        Box::pin(async move {
            self.seen.lock().await.push(event);
            Ok(())
        })
    }
}

/// Handler that fails its first `n` invocations, then succeeds.
///
/// Pass `usize::MAX` for a handler that always fails.
pub struct FailNTimesHandler {
    name: String,
    fail_first: usize,
    attempts: AtomicUsize,
    successes: AtomicUsize,
}

impl FailNTimesHandler {
    /// Create a handler failing its first `fail_first` invocations.
    #[must_use]
    pub fn new(name: impl Into<String>, fail_first: usize) -> Self {
        Self {
            name: name.into(),
            fail_first,
            attempts: AtomicUsize::new(0),
            successes: AtomicUsize::new(0),
        }
    }

    /// Total invocations so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Invocations that succeeded.
    #[must_use]
    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }
}

impl EventHandler for FailNTimesHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn wants(&self, _event: &RecordedEvent) -> bool {
        true
    }

    fn handle(
        &self,
        _event: &RecordedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = if attempt < self.fail_first {
            Err(HandlerError::new(
                self.name.clone(),
                format!("scripted failure on attempt {attempt}"),
            ))
        } else {
            self.successes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        };
        Box::pin(async move { outcome })
    }
}

/// Publisher that collects everything it is asked to publish.
#[derive(Default)]
pub struct CollectingPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl CollectingPublisher {
    /// Create an empty collecting publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far, in publish order.
    pub async fn published(&self) -> Vec<RecordedEvent> {
        self.events.lock().await.clone()
    }
}

impl EventPublisher for CollectingPublisher {
    fn publish(
        &self,
        events: &[RecordedEvent],
    ) -> Pin<Box<dyn Future<Output = Result<(), PublishError>> + Send + '_>> {
        let events = events.to_vec();
        Box::pin(async move {
            self.events.lock().await.extend(events);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventum_core::stream::{AggregateId, GlobalPosition};

    fn event(event_type: &str) -> RecordedEvent {
        RecordedEvent {
            aggregate_id: AggregateId::new("a-1"),
            sequence: 0,
            position: GlobalPosition::new(1),
            timestamp: chrono::Utc::now(),
            event_type: event_type.to_string(),
            data: Vec::new(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn recording_handler_filters_by_event_type() {
        let handler = RecordingHandler::new("record").for_event_type("Wanted.v1");
        assert!(handler.wants(&event("Wanted.v1")));
        assert!(!handler.wants(&event("Other.v1")));

        handler.handle(&event("Wanted.v1")).await.unwrap_or(());
        assert_eq!(handler.seen().await.len(), 1);
    }

    #[tokio::test]
    async fn fail_n_times_recovers() {
        let handler = FailNTimesHandler::new("flaky", 2);
        assert!(handler.handle(&event("E.v1")).await.is_err());
        assert!(handler.handle(&event("E.v1")).await.is_err());
        assert!(handler.handle(&event("E.v1")).await.is_ok());
        assert_eq!(handler.attempts(), 3);
        assert_eq!(handler.successes(), 1);
    }
}
