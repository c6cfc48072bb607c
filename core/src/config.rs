//! Configuration surface consumed by the runtime.
//!
//! These enums are what an outer configuration layer selects per subscriber
//! group; the runtime consumes them and owns everything else about
//! processing.

use serde::{Deserialize, Serialize};

/// Delivery mode of a subscriber group.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProcessingMode {
    /// A dedicated worker pulls committed events from the store behind a
    /// durable cursor. Failures retry with backoff and never block the
    /// publishing side.
    #[default]
    Tracking,

    /// Handlers run synchronously inside the publish call, in the same
    /// execution context as the originating command.
    Subscribing,
}

/// What a processor group does with a failing handler.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Log the failure and keep going. The default.
    #[default]
    Swallow,

    /// Surface the failure. In a subscribing group the originating command
    /// sender sees it; in a tracking group the processor halts without
    /// advancing its cursor.
    Propagate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::expect_used)] // Panics: test fails if serde fails
    fn kebab_case_wire_format() {
        let mode: ProcessingMode =
            serde_json::from_str("\"subscribing\"").expect("canonical spelling should parse");
        assert_eq!(mode, ProcessingMode::Subscribing);
        let policy: ErrorPolicy =
            serde_json::from_str("\"propagate\"").expect("canonical spelling should parse");
        assert_eq!(policy, ErrorPolicy::Propagate);
    }

    #[test]
    fn defaults_are_tracking_and_swallow() {
        assert_eq!(ProcessingMode::default(), ProcessingMode::Tracking);
        assert_eq!(ErrorPolicy::default(), ErrorPolicy::Swallow);
    }
}
