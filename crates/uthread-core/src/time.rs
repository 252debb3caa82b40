//! Clocks and deadline arithmetic.
//!
//! Timed waits take an absolute deadline against a caller-chosen clock and
//! the kernel takes relative millisecond timeouts, so every timed path funnels
//! through [`deadline_to_ms`]: past deadlines collapse to zero and far-future
//! ones saturate at the 32-bit maximum instead of overflowing.

use std::sync::OnceLock;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use crate::errno;

/// Largest relative timeout, in milliseconds, that fits the kernel interface.
pub const TIMEOUT_MS_MAX: i64 = i32::MAX as i64;

/// Nanoseconds per second; the upper bound (exclusive) for a valid `nsec`.
pub const NSEC_PER_SEC: i64 = 1_000_000_000;

/// An absolute point in time on one of the supported clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

impl TimeSpec {
    /// Returns true if the nanosecond field is in `[0, 1e9)`.
    #[must_use]
    pub const fn valid(&self) -> bool {
        self.nsec >= 0 && self.nsec < NSEC_PER_SEC
    }

    /// The deadline `millis` milliseconds after this instant.
    #[must_use]
    pub fn plus_millis(&self, millis: i64) -> TimeSpec {
        let mut sec = self.sec + millis / 1000;
        let mut nsec = self.nsec + (millis % 1000) * 1_000_000;
        if nsec >= NSEC_PER_SEC {
            sec += 1;
            nsec -= NSEC_PER_SEC;
        }
        TimeSpec { sec, nsec }
    }
}

/// Clocks a timed wait may be measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockId {
    Realtime,
    Monotonic,
}

impl ClockId {
    /// Validates a raw clock id; anything but REALTIME/MONOTONIC is rejected.
    pub fn from_raw(raw: i32) -> Result<ClockId, i32> {
        match raw {
            0 => Ok(ClockId::Realtime),
            1 => Ok(ClockId::Monotonic),
            _ => Err(errno::EINVAL),
        }
    }
}

fn monotonic_anchor() -> Instant {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    *ANCHOR.get_or_init(Instant::now)
}

/// Reads the current time on `clock`.
pub fn now(clock: ClockId) -> TimeSpec {
    match clock {
        ClockId::Realtime => {
            let since_epoch = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            TimeSpec {
                sec: since_epoch.as_secs() as i64,
                nsec: i64::from(since_epoch.subsec_nanos()),
            }
        }
        ClockId::Monotonic => {
            let elapsed = monotonic_anchor().elapsed();
            TimeSpec {
                sec: elapsed.as_secs() as i64,
                nsec: i64::from(elapsed.subsec_nanos()),
            }
        }
    }
}

/// Milliseconds remaining until `deadline` on `clock`.
///
/// A deadline already in the past yields 0; the result saturates at
/// [`TIMEOUT_MS_MAX`].
pub fn deadline_to_ms(deadline: &TimeSpec, clock: ClockId) -> i64 {
    let current = now(clock);
    let remaining = (deadline.sec - current.sec).saturating_mul(1000)
        + (deadline.nsec - current.nsec) / 1_000_000;
    remaining.clamp(0, TIMEOUT_MS_MAX)
}

/// Returns true if `deadline` has already passed on `clock`.
pub fn deadline_expired(deadline: &TimeSpec, clock: ClockId) -> bool {
    let current = now(clock);
    current.sec > deadline.sec || (current.sec == deadline.sec && current.nsec >= deadline.nsec)
}
