//! Command bus: routing, interceptors, and the sync/async send paths.
//!
//! Exactly one handler is registered per command type; registering a second
//! one is refused, and dispatching an unregistered type fails with
//! [`DispatchError::NoHandler`]. Interceptors run in registration order
//! before the handler sees the command and may veto it while no side
//! effects have happened yet.
//!
//! [`CommandBus::send`] awaits the full dispatch, including the append and
//! any subscribing-mode event handlers. [`CommandBus::send_async`] spawns
//! the same dispatch onto tokio and returns a [`PendingDispatch`] that
//! resolves to the identical success/failure taxonomy.

use crate::repository::AggregateRepository;
use eventum_core::aggregate::Aggregate;
use eventum_core::command::{Command, CommandEnvelope};
use eventum_core::error::DispatchError;
use eventum_core::event::RecordedEvent;
use metrics::{counter, histogram};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// A registered receiver of command envelopes.
///
/// [`AggregateRepository`] implements this for aggregate-bound commands;
/// free-standing handlers can implement it directly.
pub trait CommandHandler: Send + Sync {
    /// Process one command, returning the events it committed.
    fn handle(
        &self,
        command: CommandEnvelope,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, DispatchError>> + Send + '_>>;
}

/// A dispatch interceptor, run before the command reaches its handler.
///
/// Interceptors see every command in registration order. Returning an
/// error vetoes the dispatch; since no handler has run yet, a veto has no
/// side effects to undo.
pub trait DispatchInterceptor: Send + Sync {
    /// Name used in veto logs.
    fn name(&self) -> &str;

    /// Inspect the command; return an error to veto it.
    ///
    /// # Errors
    ///
    /// Any [`DispatchError`] vetoes the dispatch and is surfaced to the
    /// sender unchanged.
    fn intercept(&self, command: &CommandEnvelope) -> Result<(), DispatchError>;
}

/// Errors from handler registration.
#[derive(Error, Debug)]
pub enum RegistrationError {
    /// A handler is already registered for this command type.
    #[error("A handler is already registered for command type '{0}'")]
    Duplicate(String),
}

#[derive(Default)]
struct BusInner {
    handlers: RwLock<HashMap<String, Arc<dyn CommandHandler>>>,
    interceptors: RwLock<Vec<Arc<dyn DispatchInterceptor>>>,
}

/// Synchronous and asynchronous command dispatch.
///
/// The bus is cheaply cloneable; clones share the same registry, which is
/// how sagas get their outbound command interface.
#[derive(Clone, Default)]
pub struct CommandBus {
    inner: Arc<BusInner>,
}

impl CommandBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under each of the given command types.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Duplicate`] if any of the types already
    /// has a handler; in that case nothing is registered.
    pub async fn register(
        &self,
        command_types: &[&str],
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), RegistrationError> {
        let mut handlers = self.inner.handlers.write().await;
        for command_type in command_types {
            if handlers.contains_key(*command_type) {
                return Err(RegistrationError::Duplicate((*command_type).to_string()));
            }
        }
        for command_type in command_types {
            handlers.insert((*command_type).to_string(), Arc::clone(&handler));
        }
        Ok(())
    }

    /// Register an aggregate repository under every command type its
    /// aggregate declares.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::Duplicate`] if one of the aggregate's
    /// command types is already taken.
    pub async fn register_aggregate<A: Aggregate>(
        &self,
        repository: Arc<AggregateRepository<A>>,
    ) -> Result<(), RegistrationError> {
        self.register(A::Command::TYPES, repository).await
    }

    /// Append an interceptor to the chain. Interceptors run in the order
    /// they were registered.
    pub async fn register_interceptor(&self, interceptor: Arc<dyn DispatchInterceptor>) {
        self.inner.interceptors.write().await.push(interceptor);
    }

    /// Dispatch a command and wait for the outcome.
    ///
    /// # Errors
    ///
    /// Surfaces the full command-path taxonomy: interceptor vetoes,
    /// [`DispatchError::NoHandler`], validation failures, conflicts, and
    /// propagated subscribing-handler failures.
    pub async fn send(
        &self,
        command: CommandEnvelope,
    ) -> Result<Vec<RecordedEvent>, DispatchError> {
        let started = Instant::now();
        let command_type = command.command_type.clone();
        let result = self.dispatch(command).await;
        histogram!("eventum_command_duration_seconds").record(started.elapsed().as_secs_f64());
        if result.is_err() {
            counter!("eventum_command_failures_total", "command" => command_type).increment(1);
        }
        result
    }

    /// Serialize and dispatch a typed command, waiting for the outcome.
    ///
    /// # Errors
    ///
    /// As [`CommandBus::send`], plus [`DispatchError::Serialization`] if
    /// the payload cannot be encoded.
    pub async fn send_command<C: Command>(
        &self,
        command: &C,
    ) -> Result<Vec<RecordedEvent>, DispatchError> {
        let envelope = CommandEnvelope::from_command(command, None)?;
        self.send(envelope).await
    }

    /// Like [`CommandBus::send_command`], with metadata propagated onto the
    /// produced events.
    ///
    /// # Errors
    ///
    /// As [`CommandBus::send_command`].
    pub async fn send_command_with_metadata<C: Command>(
        &self,
        command: &C,
        metadata: serde_json::Value,
    ) -> Result<Vec<RecordedEvent>, DispatchError> {
        let envelope = CommandEnvelope::from_command(command, Some(metadata))?;
        self.send(envelope).await
    }

    /// Dispatch a command without waiting: fire and observe.
    ///
    /// The returned [`PendingDispatch`] resolves to the same result `send`
    /// would have produced.
    #[must_use]
    pub fn send_async(&self, command: CommandEnvelope) -> PendingDispatch {
        let bus = self.clone();
        PendingDispatch {
            handle: tokio::spawn(async move { bus.send(command).await }),
        }
    }

    async fn dispatch(
        &self,
        command: CommandEnvelope,
    ) -> Result<Vec<RecordedEvent>, DispatchError> {
        let interceptors: Vec<Arc<dyn DispatchInterceptor>> =
            self.inner.interceptors.read().await.clone();
        for interceptor in &interceptors {
            if let Err(veto) = interceptor.intercept(&command) {
                tracing::debug!(
                    interceptor = interceptor.name(),
                    command = %command,
                    error = %veto,
                    "command vetoed"
                );
                return Err(veto);
            }
        }

        let handler = {
            let handlers = self.inner.handlers.read().await;
            handlers.get(&command.command_type).cloned()
        };
        let Some(handler) = handler else {
            return Err(DispatchError::NoHandler(command.command_type));
        };

        counter!("eventum_commands_dispatched_total", "command" => command.command_type.clone())
            .increment(1);
        handler.handle(command).await
    }
}

/// Handle to a dispatch running in the background.
pub struct PendingDispatch {
    handle: JoinHandle<Result<Vec<RecordedEvent>, DispatchError>>,
}

impl PendingDispatch {
    /// Wait for the dispatch to finish and return its outcome.
    ///
    /// # Errors
    ///
    /// The dispatch's own [`DispatchError`], or
    /// [`DispatchError::Execution`] if the task was cancelled or panicked.
    pub async fn join(self) -> Result<Vec<RecordedEvent>, DispatchError> {
        self.handle
            .await
            .map_err(|e| DispatchError::Execution(e.to_string()))?
    }

    /// Abandon the dispatch. Effects already performed are not undone.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventum_core::stream::AggregateId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubHandler {
        calls: AtomicUsize,
    }

    impl StubHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl CommandHandler for StubHandler {
        fn handle(
            &self,
            _command: CommandEnvelope,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<RecordedEvent>, DispatchError>> + Send + '_>>
        {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(Vec::new()) })
        }
    }

    struct RejectEverything;

    impl DispatchInterceptor for RejectEverything {
        fn name(&self) -> &str {
            "reject-everything"
        }

        fn intercept(&self, command: &CommandEnvelope) -> Result<(), DispatchError> {
            Err(DispatchError::Validation(format!(
                "rejected {}",
                command.command_type
            )))
        }
    }

    fn envelope(command_type: &str) -> CommandEnvelope {
        CommandEnvelope {
            command_type: command_type.to_string(),
            target: AggregateId::new("a-1"),
            data: Vec::new(),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn unregistered_type_fails_with_no_handler() {
        let bus = CommandBus::new();
        let result = bus.send(envelope("Unknown")).await;
        assert!(matches!(result, Err(DispatchError::NoHandler(t)) if t == "Unknown"));
    }

    #[tokio::test]
    async fn duplicate_registration_is_refused() {
        let bus = CommandBus::new();
        let first = StubHandler::new();
        let second = StubHandler::new();

        assert!(bus.register(&["Ping"], first).await.is_ok());
        let result = bus.register(&["Ping"], second).await;
        assert!(matches!(result, Err(RegistrationError::Duplicate(t)) if t == "Ping"));
    }

    #[tokio::test]
    async fn interceptor_vetoes_before_handler_runs() {
        let bus = CommandBus::new();
        let handler = StubHandler::new();
        let counted = Arc::clone(&handler);
        bus.register(&["Ping"], handler).await.unwrap_or(());
        bus.register_interceptor(Arc::new(RejectEverything)).await;

        let result = bus.send(envelope("Ping")).await;
        assert!(matches!(result, Err(DispatchError::Validation(_))));
        assert_eq!(counted.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn send_async_resolves_to_the_same_taxonomy() {
        let bus = CommandBus::new();
        let pending = bus.send_async(envelope("Unknown"));
        let result = pending.join().await;
        assert!(matches!(result, Err(DispatchError::NoHandler(_))));
    }

    #[tokio::test]
    async fn registered_handler_receives_the_command() {
        let bus = CommandBus::new();
        let handler = StubHandler::new();
        let counted = Arc::clone(&handler);
        bus.register(&["Ping"], handler).await.unwrap_or(());

        let result = bus.send(envelope("Ping")).await;
        assert!(result.is_ok());
        assert_eq!(counted.calls.load(Ordering::SeqCst), 1);
    }
}
