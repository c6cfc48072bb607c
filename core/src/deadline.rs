//! Deadline scheduling contract.
//!
//! A deadline is a named, cancellable delayed callback owned by exactly one
//! saga instance. Scheduling hands the scheduler a [`ScheduledDeadline`];
//! firing delivers a [`DeadlineMessage`] to the registered [`DeadlineSink`],
//! which routes it to the owning instance by id rather than by association
//! (the instance may have changed its associations since scheduling).
//!
//! # Race discipline
//!
//! Each deadline fires at most once. When a cancel races with the firing,
//! exactly one side wins and the other must degrade to a no-op; neither
//! double invocation nor a cancelled-yet-fired deadline is permitted.
//! Firings for instances that have ended or no longer exist are inert.

use crate::publisher::HandlerError;
use crate::saga::SagaId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Identifier of one scheduled deadline.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeadlineId(Uuid);

impl DeadlineId {
    /// Generate a fresh deadline id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for DeadlineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to fire a named callback for a saga instance after a delay.
#[derive(Clone, Debug)]
pub struct ScheduledDeadline {
    /// Identifier under which the deadline can be cancelled.
    pub deadline_id: DeadlineId,
    /// The saga instance that owns the deadline.
    pub saga_id: SagaId,
    /// Deadline name, matched by the saga's deadline handler.
    pub name: String,
    /// How long to wait before firing.
    pub delay: Duration,
}

impl ScheduledDeadline {
    /// Build a deadline request with a freshly generated id.
    #[must_use]
    pub fn new(saga_id: SagaId, name: impl Into<String>, delay: Duration) -> Self {
        Self {
            deadline_id: DeadlineId::generate(),
            saga_id,
            name: name.into(),
            delay,
        }
    }
}

/// The message delivered when a deadline fires.
#[derive(Clone, Debug)]
pub struct DeadlineMessage {
    /// The fired deadline.
    pub deadline_id: DeadlineId,
    /// The owning saga instance.
    pub saga_id: SagaId,
    /// The deadline's name.
    pub name: String,
}

/// Errors from scheduler operations.
#[derive(Error, Debug)]
pub enum DeadlineError {
    /// The scheduler has shut down and accepts no further requests.
    #[error("Deadline scheduler is shut down")]
    SchedulerClosed,

    /// A durable scheduler backend failed.
    #[error("Deadline backend error: {0}")]
    Backend(String),
}

/// Scheduler seam: schedule and cancel delayed saga callbacks.
///
/// The provided implementation (`TokioDeadlineScheduler` in
/// `eventum-runtime`) keeps deadlines in process memory; durable backends
/// plug in behind this trait, which is what the configuration surface's
/// backing-store selection points at.
pub trait DeadlineScheduler: Send + Sync {
    /// Register a deadline. At most one firing will ever occur for it.
    ///
    /// # Errors
    ///
    /// Returns [`DeadlineError::SchedulerClosed`] after shutdown, or
    /// [`DeadlineError::Backend`] if a durable backend fails.
    fn schedule(
        &self,
        deadline: ScheduledDeadline,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadlineError>> + Send + '_>>;

    /// Cancel a deadline. A no-op if it already fired or never existed.
    ///
    /// # Errors
    ///
    /// Returns [`DeadlineError::Backend`] if a durable backend fails; the
    /// race with a concurrent firing is not an error.
    fn cancel(
        &self,
        deadline_id: DeadlineId,
    ) -> Pin<Box<dyn Future<Output = Result<(), DeadlineError>> + Send + '_>>;
}

/// Receiver of fired deadlines, implemented by the saga coordinator.
pub trait DeadlineSink: Send + Sync {
    /// Deliver one fired deadline to its owning instance.
    ///
    /// Must be a no-op (returning `Ok`) when the instance is `Ended` or no
    /// longer exists.
    fn deliver(
        &self,
        deadline: DeadlineMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + '_>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_deadlines_get_distinct_ids() {
        let saga_id = SagaId::generate();
        let a = ScheduledDeadline::new(saga_id, "payment-timeout", Duration::from_secs(1));
        let b = ScheduledDeadline::new(saga_id, "payment-timeout", Duration::from_secs(1));
        assert_ne!(a.deadline_id, b.deadline_id);
        assert_eq!(a.name, b.name);
    }
}
