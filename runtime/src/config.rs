//! Processor group configuration.

use crate::retry::RetryPolicy;
use eventum_core::config::{ErrorPolicy, ProcessingMode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration of one subscriber group.
///
/// An outer configuration layer typically deserializes one of these per
/// group name. Defaults: tracking delivery, swallow-and-log errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Delivery mode for the group.
    pub mode: ProcessingMode,
    /// What to do when a handler fails (after retries, in tracking mode).
    pub error_policy: ErrorPolicy,
    /// Maximum events pulled from the store per batch (tracking mode).
    pub batch_size: usize,
    /// Idle poll interval when no wakeup arrives (tracking mode).
    pub poll_interval: Duration,
    /// Backoff applied to failing handlers (tracking mode).
    pub retry: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            mode: ProcessingMode::default(),
            error_policy: ErrorPolicy::default(),
            batch_size: 64,
            poll_interval: Duration::from_millis(250),
            retry: RetryPolicy::default(),
        }
    }
}

impl ProcessorConfig {
    /// Set the delivery mode.
    #[must_use]
    pub const fn with_mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the error policy.
    #[must_use]
    pub const fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_tracking_and_swallow() {
        let config = ProcessorConfig::default();
        assert_eq!(config.mode, ProcessingMode::Tracking);
        assert_eq!(config.error_policy, ErrorPolicy::Swallow);
        assert!(config.batch_size > 0);
    }
}
