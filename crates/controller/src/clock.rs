//! Time sources for the watering controller.
//!
//! The scheduler needs two clocks: local wall-clock time to match the
//! configured `hour:minute`, and a monotonic clock to time the session.
//! Either may be unavailable, in which case the controller fails closed.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use time::{OffsetDateTime, UtcOffset};

/// Boards without an RTC come up near the epoch until NTP has synced.
/// Anything before this year is treated as "no wall clock yet".
const MIN_PLAUSIBLE_YEAR: i32 = 2024;

pub trait Clock {
    /// Local wall-clock time, or `None` when it cannot be trusted.
    fn wall(&self) -> Option<OffsetDateTime>;

    /// Time elapsed since a fixed origin, or `None` when unavailable.
    fn monotonic(&self) -> Option<Duration>;
}

pub struct SystemClock {
    origin: Instant,
    offset: UtcOffset,
}

impl SystemClock {
    pub fn new(offset: UtcOffset) -> Self {
        Self {
            origin: Instant::now(),
            offset,
        }
    }
}

impl Clock for SystemClock {
    fn wall(&self) -> Option<OffsetDateTime> {
        let now = OffsetDateTime::now_utc().to_offset(self.offset);
        (now.year() >= MIN_PLAUSIBLE_YEAR).then_some(now)
    }

    fn monotonic(&self) -> Option<Duration> {
        Some(self.origin.elapsed())
    }
}

/// Work out the local UTC offset. Must run before the async runtime starts
/// any threads: `time` refuses to read the system zone from a
/// multi-threaded process.
pub fn resolve_offset(configured_hours: Option<i8>) -> Result<UtcOffset> {
    if let Some(hours) = configured_hours {
        return UtcOffset::from_hms(hours, 0, 0)
            .with_context(|| format!("invalid utc_offset_hours: {hours}"));
    }

    match UtcOffset::current_local_offset() {
        Ok(offset) => Ok(offset),
        Err(e) => {
            tracing::warn!("cannot determine local utc offset ({e}); schedule runs on UTC");
            Ok(UtcOffset::UTC)
        }
    }
}

// ---------------------------------------------------------------------------
// Manual clock (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) use manual::ManualClock;

#[cfg(test)]
mod manual {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Hand-driven clock. Clones share the same time, so a test keeps one
    /// handle while the controller owns another.
    #[derive(Clone)]
    pub(crate) struct ManualClock {
        wall: Rc<Cell<Option<OffsetDateTime>>>,
        mono: Rc<Cell<Option<Duration>>>,
    }

    impl ManualClock {
        pub(crate) fn at(wall: OffsetDateTime) -> Self {
            Self {
                wall: Rc::new(Cell::new(Some(wall))),
                mono: Rc::new(Cell::new(Some(Duration::ZERO))),
            }
        }

        /// Move both clocks forward together.
        pub(crate) fn advance(&self, by: Duration) {
            if let Some(w) = self.wall.get() {
                self.wall.set(Some(w + by));
            }
            if let Some(m) = self.mono.get() {
                self.mono.set(Some(m + by));
            }
        }

        pub(crate) fn advance_wall_only(&self, by: Duration) {
            if let Some(w) = self.wall.get() {
                self.wall.set(Some(w + by));
            }
        }

        pub(crate) fn set_wall(&self, wall: Option<OffsetDateTime>) {
            self.wall.set(wall);
        }

        pub(crate) fn set_monotonic(&self, mono: Option<Duration>) {
            self.mono.set(mono);
        }
    }

    impl Clock for ManualClock {
        fn wall(&self) -> Option<OffsetDateTime> {
            self.wall.get()
        }

        fn monotonic(&self) -> Option<Duration> {
            self.mono.get()
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
