//! Aggregate contract: a consistency boundary reconstructed by replay.
//!
//! An aggregate is a deterministic state machine. Its current state is the
//! fold of its event stream through [`Aggregate::apply`]; its decisions are
//! made by the pure [`Aggregate::handle`], which either rejects the command
//! or returns the events to append. Because `handle` returns a `Result`
//! over the whole batch, producing events and failing are mutually
//! exclusive outcomes by construction: a business-rule violation can only
//! happen before any event exists.

use crate::command::Command;
use crate::event::Event;
use serde::{Serialize, de::DeserializeOwned};

/// An event-sourced consistency boundary.
///
/// The implementing type is the aggregate's state. `Default` is the state
/// of an aggregate that does not exist yet; creation commands start there.
///
/// # Determinism
///
/// `apply` must be a pure fold: replaying the same events in the same order
/// must always reproduce the same state, with no I/O and no reads of
/// ambient time or randomness. `handle` must base its decision only on
/// `self` and the command. The runtime relies on this to reconstruct state
/// on every dispatch.
///
/// # Examples
///
/// See the `order-workflow` demo crate for a complete implementation.
pub trait Aggregate: Default + Send + Sync + 'static {
    /// The commands this aggregate accepts.
    type Command: Command;

    /// The events this aggregate emits and replays.
    type Event: Event + Serialize + DeserializeOwned;

    /// The business-rule violation type produced by rejected commands.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Stable name of this aggregate type, used in logs and metrics.
    fn aggregate_type() -> &'static str;

    /// Decide on a command against current state.
    ///
    /// Returns the events to append, in order. An empty vector is a valid
    /// outcome and appends nothing.
    ///
    /// # Errors
    ///
    /// Returns `Self::Error` when a business rule rejects the command. The
    /// runtime surfaces this to the sender as a validation failure and
    /// guarantees nothing was appended.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Fold one event into state.
    ///
    /// Must not fail: events are established facts, and a state transition
    /// function that cannot process its own history is a bug.
    fn apply(&mut self, event: &Self::Event);

    /// Reconstruct state by folding a sequence of events over `Default`.
    #[must_use]
    fn replay<'a, I>(events: I) -> Self
    where
        I: IntoIterator<Item = &'a Self::Event>,
    {
        let mut state = Self::default();
        for event in events {
            state.apply(event);
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::AggregateId;
    use serde::Deserialize;
    use thiserror::Error;

    #[derive(Clone, Debug, Serialize, Deserialize)]
    enum CounterCommand {
        Add { id: String, amount: u64 },
    }

    impl Command for CounterCommand {
        const TYPES: &'static [&'static str] = &["Add"];

        fn command_type(&self) -> &'static str {
            "Add"
        }

        fn target(&self) -> AggregateId {
            match self {
                CounterCommand::Add { id, .. } => AggregateId::new(id.clone()),
            }
        }
    }

    #[derive(Clone, Debug, Serialize, Deserialize)]
    enum CounterEvent {
        Added { amount: u64 },
    }

    impl Event for CounterEvent {
        fn event_type(&self) -> &'static str {
            "Added.v1"
        }
    }

    #[derive(Error, Debug)]
    enum CounterError {
        #[error("amount must be positive")]
        ZeroAmount,
    }

    #[derive(Default)]
    struct Counter {
        total: u64,
    }

    impl Aggregate for Counter {
        type Command = CounterCommand;
        type Event = CounterEvent;
        type Error = CounterError;

        fn aggregate_type() -> &'static str {
            "counter"
        }

        fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
            match command {
                CounterCommand::Add { amount, .. } => {
                    if *amount == 0 {
                        return Err(CounterError::ZeroAmount);
                    }
                    Ok(vec![CounterEvent::Added { amount: *amount }])
                }
            }
        }

        fn apply(&mut self, event: &Self::Event) {
            match event {
                CounterEvent::Added { amount } => self.total += amount,
            }
        }
    }

    #[test]
    fn replay_folds_in_order() {
        let events = vec![
            CounterEvent::Added { amount: 1 },
            CounterEvent::Added { amount: 2 },
            CounterEvent::Added { amount: 3 },
        ];
        let state = Counter::replay(&events);
        assert_eq!(state.total, 6);
    }

    #[test]
    fn rejection_produces_no_events() {
        let state = Counter::default();
        let result = state.handle(&CounterCommand::Add {
            id: "c-1".to_string(),
            amount: 0,
        });
        assert!(result.is_err());
    }
}
