//! Stream identification, versioning, and global positioning types.
//!
//! Every aggregate instance owns exactly one event stream, identified by an
//! [`AggregateId`]. A stream's [`Version`] counts the events appended to it
//! and is the unit of optimistic concurrency control. [`GlobalPosition`]
//! orders events across all streams and is what tracking processors use as
//! their durable cursor.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when parsing an [`AggregateId`] from untrusted input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid aggregate id: {0}")]
pub struct ParseAggregateIdError(String);

/// Identifier of an aggregate instance and of its event stream.
///
/// The identifier is a stable, opaque string chosen by the caller, for
/// example `"order-o1"` or a UUID rendered as text. It is the routing key
/// for command dispatch and the partition key for event ordering: events
/// within one `AggregateId` are strictly ordered, events across different
/// ids are not.
///
/// # Validation
///
/// - [`FromStr`] rejects empty input and is meant for external data.
/// - [`AggregateId::new`] and the `From` impls accept any string and are
///   meant for application-controlled values.
///
/// # Examples
///
/// ```
/// use eventum_core::stream::AggregateId;
///
/// let id = AggregateId::new("order-o1");
/// assert_eq!(id.as_str(), "order-o1");
///
/// let parsed: AggregateId = "order-o2".parse().unwrap();
/// assert_eq!(parsed, AggregateId::new("order-o2"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AggregateId(String);

impl AggregateId {
    /// Create an `AggregateId` from a trusted string.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// View the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the identifier, returning the inner `String`.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for AggregateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AggregateId {
    type Err = ParseAggregateIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseAggregateIdError(
                "aggregate id cannot be empty".to_string(),
            ));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<String> for AggregateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AggregateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for AggregateId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Number of events appended to a stream, used for optimistic concurrency.
///
/// A stream that has never been written to is at [`Version::INITIAL`] (zero).
/// Appending a batch of `n` events moves the stream from version `v` to
/// `v + n`, and the events themselves receive the 0-based sequence numbers
/// `v .. v + n`. A writer passes the version it loaded as the expected
/// version; if the stream has moved on in the meantime, the append is
/// rejected with a concurrency conflict and the writer must reload.
///
/// # Examples
///
/// ```
/// use eventum_core::stream::Version;
///
/// let fresh = Version::INITIAL;
/// assert!(fresh.is_initial());
/// assert_eq!(fresh.after_appending(2), Version::new(2));
/// ```
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of a stream with no events.
    pub const INITIAL: Self = Self(0);

    /// Create a `Version` with the given event count.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw event count.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Whether this stream has never been written to.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }

    /// The version after appending `count` further events.
    ///
    /// Overflow is not a practical concern: `u64::MAX` events cannot be
    /// stored in any real stream.
    #[must_use]
    pub const fn after_appending(self, count: u64) -> Self {
        Self(self.0 + count)
    }

    /// The 0-based sequence number the next appended event will receive.
    #[must_use]
    pub const fn next_sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Version> for u64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Position of an event in the store-wide commit order.
///
/// Unlike [`Version`], which is scoped to one stream, the global position
/// totally orders every committed event in the store. Tracking processors
/// persist the position of the last event they fully processed and resume
/// from there after a restart. Position `0` means "before the first event".
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct GlobalPosition(u64);

impl GlobalPosition {
    /// The position before any committed event.
    pub const ORIGIN: Self = Self(0);

    /// Create a position from a raw offset.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The raw offset.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The position immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for GlobalPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GlobalPosition {
    fn from(value: u64) -> Self {
        Self(value)
    }
}
