// SPDX-License-Identifier: GPL-3.0-only

//! Sliding-window frame rate estimation

use crate::constants;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Counts frame arrivals inside a trailing time window
///
/// Timestamps are milliseconds on any monotonic scale and must be recorded
/// in non-decreasing order; pruning relies on it. Not synchronized, see
/// [`FpsMonitor`] for the shared version.
#[derive(Debug, Clone)]
pub struct FpsCounter {
    window_ms: u64,
    arrivals: VecDeque<u64>,
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(constants::fps::WINDOW)
    }
}

impl FpsCounter {
    pub fn new(window: Duration) -> Self {
        Self {
            window_ms: (window.as_millis() as u64).max(1),
            arrivals: VecDeque::new(),
        }
    }

    /// Record an arrival and drop entries older than `timestamp_ms - window`
    pub fn record_arrival(&mut self, timestamp_ms: u64) {
        self.arrivals.push_back(timestamp_ms);
        let cutoff = timestamp_ms.saturating_sub(self.window_ms);
        while self.arrivals.front().is_some_and(|&t| t < cutoff) {
            self.arrivals.pop_front();
        }
    }

    /// Whole frames per second over the window ending at `now_ms`
    pub fn current_rate(&self, now_ms: u64) -> u32 {
        let cutoff = now_ms.saturating_sub(self.window_ms);
        let in_window = self
            .arrivals
            .iter()
            .rev()
            .take_while(|&&t| t >= cutoff)
            .count() as u64;
        (in_window * 1000 / self.window_ms) as u32
    }

    /// Entries currently retained
    pub fn len(&self) -> usize {
        self.arrivals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arrivals.is_empty()
    }

    pub fn clear(&mut self) {
        self.arrivals.clear();
    }
}

/// Mutex-guarded [`FpsCounter`] on a monotonic clock
///
/// Cloned into the callback thread (writer); any other thread may read.
#[derive(Debug, Clone)]
pub struct FpsMonitor {
    counter: Arc<Mutex<FpsCounter>>,
    epoch: Instant,
}

impl FpsMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            counter: Arc::new(Mutex::new(FpsCounter::new(window))),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Record an arrival at the current instant
    pub fn record_now(&self) {
        let now = self.now_ms();
        self.counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_arrival(now);
    }

    /// Current frames per second
    pub fn current_fps(&self) -> u32 {
        let now = self.now_ms();
        self.counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .current_rate(now)
    }

    pub fn reset(&self) {
        self.counter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for FpsMonitor {
    fn default() -> Self {
        Self::new(constants::fps::WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_ten_fps() {
        let mut counter = FpsCounter::default();
        for t in (0..=3000).step_by(100) {
            counter.record_arrival(t);
        }
        assert_eq!(counter.current_rate(3000), 10);
    }

    #[test]
    fn test_silent_gap_reports_zero() {
        let mut counter = FpsCounter::default();
        for t in (0..=3000).step_by(100) {
            counter.record_arrival(t);
        }
        assert_eq!(counter.current_rate(6001), 0);
    }

    #[test]
    fn test_prunes_on_insert() {
        let mut counter = FpsCounter::new(Duration::from_millis(1000));
        counter.record_arrival(0);
        counter.record_arrival(500);
        counter.record_arrival(1600);
        assert_eq!(counter.len(), 1);
    }

    #[test]
    fn test_monitor_shared_across_threads() {
        let monitor = FpsMonitor::default();
        let writer = monitor.clone();
        std::thread::spawn(move || {
            for _ in 0..30 {
                writer.record_now();
            }
        })
        .join()
        .unwrap();
        // 30 arrivals inside a 3 s window
        assert_eq!(monitor.current_fps(), 10);
        monitor.reset();
        assert_eq!(monitor.current_fps(), 0);
    }
}
