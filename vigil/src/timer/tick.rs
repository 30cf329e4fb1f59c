//! Tick-space coordinates for the timing wheel.
//!
//! The wheel works on a discrete tick lattice derived from physical time:
//! `tick = (instant - origin) / tick_duration`. Instants round down when
//! asking "what tick is it now" and deadlines round up, so a timer never
//! fires before its deadline.

use core::ops::Add;
use std::time::Duration;

use minstant::Instant;

/// A point on the discrete tick lattice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct TickInstant(u64);

impl TickInstant {
    /// Creates a new tick instant from a raw tick count.
    #[cfg(test)]
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying tick count.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// A span in tick space (number of ticks).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TickSpan(u64);

impl TickSpan {
    /// Creates a new tick span from a raw tick count.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }
}

impl Add<TickSpan> for TickInstant {
    type Output = Self;

    #[inline]
    fn add(self, rhs: TickSpan) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

/// Maps monotonic instants onto the tick lattice.
#[derive(Debug, Clone, Copy)]
pub struct TickClock {
    origin: Instant,
    tick_ns: u64,
}

impl TickClock {
    /// Creates a clock whose tick zero is `origin`.
    ///
    /// # Panics
    ///
    /// Panics if `tick` is shorter than one nanosecond.
    #[must_use]
    pub fn new(origin: Instant, tick: Duration) -> Self {
        let tick_ns = u64::try_from(tick.as_nanos()).unwrap_or(u64::MAX);
        assert!(tick_ns > 0, "tick duration must be > 0");
        Self { origin, tick_ns }
    }

    /// Length of one tick.
    #[must_use]
    pub fn tick(&self) -> Duration {
        Duration::from_nanos(self.tick_ns)
    }

    /// The tick containing `at` (rounded down).
    #[must_use]
    pub fn tick_at(&self, at: Instant) -> TickInstant {
        TickInstant(self.nanos_since_origin(at) / self.tick_ns)
    }

    /// The first tick at or after `at` (rounded up).
    #[must_use]
    pub fn deadline_tick(&self, at: Instant) -> TickInstant {
        TickInstant(self.nanos_since_origin(at).div_ceil(self.tick_ns))
    }

    fn nanos_since_origin(&self, at: Instant) -> u64 {
        let elapsed = at.saturating_duration_since(self.origin);
        u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX)
    }
}
