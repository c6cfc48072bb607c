//! In-process deadline scheduler backed by tokio timers.
//!
//! Each scheduled deadline is a sleeping task plus an entry in a pending
//! map. The map is the race arbiter: both the firing task and `cancel`
//! try to remove the entry, and only the side that succeeds proceeds. The
//! loser observes an empty slot and degrades to a no-op, which gives the
//! required at-most-one-of-{firing, cancellation} behavior without any
//! further coordination.
//!
//! Fired deadlines are handed to the connected [`DeadlineSink`] (the saga
//! coordinator), which routes by instance id and treats missing or ended
//! instances as inert.

use eventum_core::deadline::{
    DeadlineError, DeadlineId, DeadlineMessage, DeadlineScheduler, DeadlineSink, ScheduledDeadline,
};
use metrics::counter;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

struct SchedulerInner {
    sink: OnceLock<Arc<dyn DeadlineSink>>,
    // id -> timer task; None while the entry is being installed.
    pending: Mutex<HashMap<DeadlineId, Option<JoinHandle<()>>>>,
    closed: AtomicBool,
}

/// Tokio-timer implementation of [`DeadlineScheduler`].
///
/// Deadlines live in process memory; they do not survive a restart. A
/// durable scheduler is a different implementation of the same trait, and
/// selecting one is part of the embedding application's configuration.
#[derive(Clone)]
pub struct TokioDeadlineScheduler {
    inner: Arc<SchedulerInner>,
}

impl Default for TokioDeadlineScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioDeadlineScheduler {
    /// Create a scheduler with no sink connected.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                sink: OnceLock::new(),
                pending: Mutex::new(HashMap::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Connect the delivery sink. Must happen before the first deadline is
    /// due; deadlines that fire without a sink are dropped with an error
    /// log.
    ///
    /// # Errors
    ///
    /// Returns [`DeadlineError::Backend`] if a sink is already connected.
    pub fn connect(&self, sink: Arc<dyn DeadlineSink>) -> Result<(), DeadlineError> {
        self.inner
            .sink
            .set(sink)
            .map_err(|_| DeadlineError::Backend("deadline sink already connected".to_string()))
    }

    /// Number of deadlines currently scheduled and not yet fired or
    /// cancelled.
    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }

    /// Stop accepting requests and abort every pending timer.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut pending = self.inner.pending.lock().await;
        for (_, task) in pending.drain() {
            if let Some(task) = task {
                task.abort();
            }
        }
        tracing::info!("deadline scheduler shut down");
    }
}

impl DeadlineScheduler for TokioDeadlineScheduler {
    fn schedule(
        &self,
        deadline: ScheduledDeadline,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadlineError>> + Send + '_>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            if inner.closed.load(Ordering::SeqCst) {
                return Err(DeadlineError::SchedulerClosed);
            }
            let deadline_id = deadline.deadline_id;
            let saga_id = deadline.saga_id;
            let delay = deadline.delay;

            // Install the entry before the timer starts so a zero-delay
            // firing still finds something to remove.
            let mut pending = inner.pending.lock().await;
            pending.insert(deadline_id, None);

            let task_inner = Arc::clone(&inner);
            let task = tokio::spawn(async move {
                tokio::time::sleep(deadline.delay).await;
                let won = task_inner
                    .pending
                    .lock()
                    .await
                    .remove(&deadline_id)
                    .is_some();
                if !won {
                    return;
                }
                counter!("eventum_deadlines_fired_total").increment(1);
                let Some(sink) = task_inner.sink.get() else {
                    tracing::error!(%deadline_id, name = %deadline.name, "deadline fired with no sink connected");
                    return;
                };
                let message = DeadlineMessage {
                    deadline_id,
                    saga_id: deadline.saga_id,
                    name: deadline.name.clone(),
                };
                if let Err(error) = sink.deliver(message).await {
                    tracing::error!(
                        %deadline_id,
                        name = %deadline.name,
                        error = %error,
                        "deadline handler failed"
                    );
                }
            });
            pending.insert(deadline_id, Some(task));
            drop(pending);

            tracing::debug!(%deadline_id, %saga_id, delay_ms = delay.as_millis() as u64, "deadline scheduled");
            Ok(())
        })
    }

    fn cancel(
        &self,
        deadline_id: DeadlineId,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadlineError>> + Send + '_>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            match inner.pending.lock().await.remove(&deadline_id) {
                Some(task) => {
                    if let Some(task) = task {
                        task.abort();
                    }
                    counter!("eventum_deadlines_cancelled_total").increment(1);
                    tracing::debug!(%deadline_id, "deadline cancelled");
                }
                // Already fired or never known: a safe no-op.
                None => {
                    tracing::debug!(%deadline_id, "cancel found no pending deadline");
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventum_core::publisher::HandlerError;
    use eventum_core::saga::SagaId;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct CountingSink {
        fired: AtomicUsize,
    }

    impl CountingSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                fired: AtomicUsize::new(0),
            })
        }

        fn count(&self) -> usize {
            self.fired.load(Ordering::SeqCst)
        }
    }

    impl DeadlineSink for CountingSink {
        fn deliver(
            &self,
            _deadline: DeadlineMessage,
        ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>> {
            self.fired.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    fn scheduler_with_sink() -> (TokioDeadlineScheduler, Arc<CountingSink>) {
        let scheduler = TokioDeadlineScheduler::new();
        let sink = CountingSink::new();
        scheduler
            .connect(Arc::clone(&sink) as Arc<dyn DeadlineSink>)
            .unwrap_or(());
        (scheduler, sink)
    }

    #[tokio::test]
    async fn elapsed_deadline_fires_exactly_once() {
        let (scheduler, sink) = scheduler_with_sink();
        let deadline = ScheduledDeadline::new(
            SagaId::generate(),
            "payment-timeout",
            Duration::from_millis(10),
        );
        scheduler.schedule(deadline).await.unwrap_or(());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.count(), 1);
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test]
    async fn cancelled_deadline_never_fires() {
        let (scheduler, sink) = scheduler_with_sink();
        let deadline =
            ScheduledDeadline::new(SagaId::generate(), "payment-timeout", Duration::from_secs(60));
        let deadline_id = deadline.deadline_id;
        scheduler.schedule(deadline).await.unwrap_or(());
        assert_eq!(scheduler.pending_count().await, 1);

        scheduler.cancel(deadline_id).await.unwrap_or(());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.count(), 0);
        assert_eq!(scheduler.pending_count().await, 0);
    }

    #[tokio::test]
    async fn cancel_after_firing_is_a_no_op() {
        let (scheduler, sink) = scheduler_with_sink();
        let deadline =
            ScheduledDeadline::new(SagaId::generate(), "payment-timeout", Duration::ZERO);
        let deadline_id = deadline.deadline_id;
        scheduler.schedule(deadline).await.unwrap_or(());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sink.count(), 1);
        assert!(scheduler.cancel(deadline_id).await.is_ok());
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn shutdown_refuses_new_deadlines() {
        let (scheduler, sink) = scheduler_with_sink();
        let deadline =
            ScheduledDeadline::new(SagaId::generate(), "payment-timeout", Duration::from_secs(60));
        scheduler.schedule(deadline).await.unwrap_or(());
        scheduler.shutdown().await;
        assert_eq!(scheduler.pending_count().await, 0);

        let late =
            ScheduledDeadline::new(SagaId::generate(), "payment-timeout", Duration::from_secs(1));
        let result = scheduler.schedule(late).await;
        assert!(matches!(result, Err(DeadlineError::SchedulerClosed)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sink.count(), 0);
    }
}
