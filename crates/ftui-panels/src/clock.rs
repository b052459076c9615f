#![forbid(unsafe_code)]

//! Tick-driven session clock.
//!
//! The runtime never reads the wall clock directly. The host advances the
//! [`SessionClock`] once per frame with the elapsed delta, and every
//! timestamp recorded by the lifecycle and navigation layers is a [`Stamp`]
//! issued by that clock.
//!
//! Stamps order first by session time and then by issue sequence, so two
//! stamps taken within the same tick still have a strict order (the later
//! one wins ties).

use web_time::Duration;

/// A point in session time plus a monotonic issue sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Stamp {
    /// Session time elapsed when the stamp was issued.
    pub at: Duration,
    /// Monotonic issue counter; breaks ties within a tick.
    pub seq: u64,
}

impl Stamp {
    /// Session time elapsed since this stamp, given the current time.
    #[must_use]
    pub fn elapsed_since(self, now: Duration) -> Duration {
        now.saturating_sub(self.at)
    }
}

/// Session clock advanced by host ticks.
#[derive(Debug, Clone, Default)]
pub struct SessionClock {
    elapsed: Duration,
    seq: u64,
}

impl SessionClock {
    /// Create a clock at session time zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance session time by `delta`.
    pub fn advance(&mut self, delta: Duration) {
        self.elapsed = self.elapsed.saturating_add(delta);
    }

    /// Current session time.
    #[inline]
    #[must_use]
    pub fn now(&self) -> Duration {
        self.elapsed
    }

    /// Issue a fresh stamp at the current session time.
    pub fn stamp(&mut self) -> Stamp {
        self.seq += 1;
        Stamp {
            at: self.elapsed,
            seq: self.seq,
        }
    }
}
