// SPDX-License-Identifier: GPL-3.0-only

//! Presentation timestamps for encoded samples

use std::time::Instant;

/// Source of "now" in microseconds
pub trait ClockSource: Send {
    fn now_us(&mut self) -> i64;
}

/// Monotonic clock counting from its creation
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ClockSource for MonotonicClock {
    fn now_us(&mut self) -> i64 {
        self.epoch.elapsed().as_micros() as i64
    }
}

/// Strictly increasing presentation timestamps
///
/// Each stamp is the clock reading, bumped to one past the previous stamp
/// when the clock has not moved forward.
pub struct PtsGenerator<C = MonotonicClock> {
    clock: C,
    previous: Option<i64>,
}

impl PtsGenerator<MonotonicClock> {
    pub fn new() -> Self {
        Self::with_clock(MonotonicClock::new())
    }
}

impl Default for PtsGenerator<MonotonicClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ClockSource> PtsGenerator<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            previous: None,
        }
    }

    /// Stamp for the next sample
    pub fn next_pts(&mut self) -> i64 {
        let now = self.clock.now_us();
        let pts = match self.previous {
            Some(prev) if now <= prev => prev + 1,
            _ => now,
        };
        self.previous = Some(pts);
        pts
    }

    /// Last stamp handed out
    pub fn previous(&self) -> Option<i64> {
        self.previous
    }
}
