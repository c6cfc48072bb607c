//! Clock seam for recorded-event timestamps.

use chrono::{DateTime, Utc};

/// Source of wall-clock time.
///
/// The event store stamps committed events through this trait so that
/// tests can substitute a fixed clock (`eventum-testing` provides one).
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
