//! Wall-clock and time-zone source.
//!
//! Garbage retention decisions compare pack timestamps against wall-clock
//! time and calendar-day boundaries in the operator's time zone. Both are
//! consulted through this trait so tests can pin time exactly.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{FixedOffset, Local, Offset, Utc};

/// Source of wall-clock time and the system time zone.
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// The time zone used for calendar-day arithmetic.
    ///
    /// This is the operator's zone, not UTC; daily retention windows are
    /// expected to line up with the operator's calendar.
    fn time_zone(&self) -> FixedOffset;
}

/// Clock reading the real system time and local zone.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn time_zone(&self) -> FixedOffset {
        *Local::now().offset()
    }
}

/// Deterministic clock for tests.
///
/// Starts at a fixed instant and only moves when told to.
#[derive(Debug)]
pub struct FixedClock {
    now_millis: AtomicI64,
    zone: FixedOffset,
}

impl FixedClock {
    /// Creates a clock pinned at `now_millis` in the UTC zone.
    #[must_use]
    pub fn new(now_millis: i64) -> Self {
        Self {
            now_millis: AtomicI64::new(now_millis),
            zone: Utc.fix(),
        }
    }

    /// Creates a clock pinned at `now_millis` in the given zone.
    #[must_use]
    pub fn with_zone(now_millis: i64, zone: FixedOffset) -> Self {
        Self {
            now_millis: AtomicI64::new(now_millis),
            zone,
        }
    }

    /// Moves the clock forward by `delta_millis`.
    pub fn advance(&self, delta_millis: i64) {
        self.now_millis.fetch_add(delta_millis, Ordering::SeqCst);
    }

    /// Pins the clock at an absolute instant.
    pub fn set(&self, now_millis: i64) {
        self.now_millis.store(now_millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.now_millis.load(Ordering::SeqCst)
    }

    fn time_zone(&self) -> FixedOffset {
        self.zone
    }
}
