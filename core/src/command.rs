//! Command trait and the dispatch envelope.
//!
//! A command is a request to change the state of exactly one aggregate. It
//! is validated by that aggregate's handler and either accepted, producing
//! events, or rejected with a typed failure. Commands travel through the
//! dispatcher as a [`CommandEnvelope`]: a type tag, the target aggregate id,
//! a bincode payload, and optional JSON metadata.

use crate::stream::AggregateId;
use serde::{Serialize, de::DeserializeOwned};
use std::fmt;
use thiserror::Error;

/// Errors from command payload (de)serialization.
#[derive(Error, Debug)]
pub enum CommandError {
    /// Failed to serialize a command payload.
    #[error("Failed to serialize command: {0}")]
    Serialization(String),

    /// Failed to deserialize a command payload.
    #[error("Failed to deserialize command: {0}")]
    Deserialization(String),
}

/// A request to change the state of one aggregate.
///
/// Implementors are typically an enum of all commands an aggregate accepts.
/// Each variant maps to a distinct [`Command::command_type`] tag; the
/// dispatcher enforces that exactly one handler is registered per tag.
///
/// # Examples
///
/// ```
/// use eventum_core::command::Command;
/// use eventum_core::stream::AggregateId;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Clone, Debug, Serialize, Deserialize)]
/// enum OrderCommand {
///     CreateOrder { order_id: String, product: String },
///     ConfirmOrder { order_id: String },
/// }
///
/// impl Command for OrderCommand {
///     const TYPES: &'static [&'static str] = &["CreateOrder", "ConfirmOrder"];
///
///     fn command_type(&self) -> &'static str {
///         match self {
///             OrderCommand::CreateOrder { .. } => "CreateOrder",
///             OrderCommand::ConfirmOrder { .. } => "ConfirmOrder",
///         }
///     }
///
///     fn target(&self) -> AggregateId {
///         match self {
///             OrderCommand::CreateOrder { order_id, .. }
///             | OrderCommand::ConfirmOrder { order_id } => AggregateId::new(order_id.clone()),
///         }
///     }
///
///     fn creates_aggregate(&self) -> bool {
///         matches!(self, OrderCommand::CreateOrder { .. })
///     }
/// }
/// ```
pub trait Command: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Every command type tag this implementor can produce.
    ///
    /// The dispatcher registers a handler under each of these tags and
    /// rejects duplicate registrations.
    const TYPES: &'static [&'static str];

    /// The type tag of this particular command value.
    fn command_type(&self) -> &'static str;

    /// The aggregate this command targets.
    fn target(&self) -> AggregateId;

    /// Whether this command brings a new aggregate instance into existence.
    ///
    /// Creation commands start from a fresh default state instead of
    /// requiring an existing stream.
    fn creates_aggregate(&self) -> bool {
        false
    }
}

/// The wire shape a command travels in between sender and handler.
#[derive(Clone, Debug)]
pub struct CommandEnvelope {
    /// Stable command type tag, the dispatch routing key.
    pub command_type: String,

    /// The aggregate the command targets.
    pub target: AggregateId,

    /// Bincode-serialized command payload.
    pub data: Vec<u8>,

    /// Optional JSON metadata, e.g. `correlation_id`. Propagated onto the
    /// metadata of every event the command produces.
    pub metadata: Option<serde_json::Value>,
}

impl CommandEnvelope {
    /// Wrap a typed command for dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Serialization`] if the payload cannot be
    /// encoded.
    pub fn from_command<C: Command>(
        command: &C,
        metadata: Option<serde_json::Value>,
    ) -> Result<Self, CommandError> {
        let data = bincode::serialize(command)
            .map_err(|e| CommandError::Serialization(e.to_string()))?;
        Ok(Self {
            command_type: command.command_type().to_string(),
            target: command.target(),
            data,
            metadata,
        })
    }

    /// Decode the payload back into a typed command.
    ///
    /// # Errors
    ///
    /// Returns [`CommandError::Deserialization`] if the payload does not
    /// decode into `C`.
    pub fn payload<C: Command>(&self) -> Result<C, CommandError> {
        bincode::deserialize(&self.data).map_err(|e| CommandError::Deserialization(e.to_string()))
    }
}

impl fmt::Display for CommandEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.command_type, self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    enum TestCommand {
        Open { id: String },
        Close { id: String },
    }

    impl Command for TestCommand {
        const TYPES: &'static [&'static str] = &["Open", "Close"];

        fn command_type(&self) -> &'static str {
            match self {
                TestCommand::Open { .. } => "Open",
                TestCommand::Close { .. } => "Close",
            }
        }

        fn target(&self) -> AggregateId {
            match self {
                TestCommand::Open { id } | TestCommand::Close { id } => {
                    AggregateId::new(id.clone())
                }
            }
        }

        fn creates_aggregate(&self) -> bool {
            matches!(self, TestCommand::Open { .. })
        }
    }

    #[test]
    #[allow(clippy::expect_used)] // Panics: test fails if serialization fails
    fn envelope_roundtrip() {
        let command = TestCommand::Open {
            id: "acct-1".to_string(),
        };
        let envelope = CommandEnvelope::from_command(&command, None)
            .expect("serialization should succeed");

        assert_eq!(envelope.command_type, "Open");
        assert_eq!(envelope.target, AggregateId::new("acct-1"));

        let back: TestCommand = envelope.payload().expect("deserialization should succeed");
        assert_eq!(back, command);
    }

    #[test]
    fn creation_flag_defaults_to_false() {
        let close = TestCommand::Close {
            id: "acct-1".to_string(),
        };
        assert!(!close.creates_aggregate());
        let open = TestCommand::Open {
            id: "acct-1".to_string(),
        };
        assert!(open.creates_aggregate());
    }
}
