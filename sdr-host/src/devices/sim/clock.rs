//! Shared device clock
//!
//! Counts ticks since the device was made. All chains of one device read the
//! same clock, so packets from different channels line up.

use crate::core::types::TimeSpec;
use std::time::{Duration, Instant};

/// Monotonic tick counter
#[derive(Debug)]
pub struct SimClock {
    epoch: Instant,
    tick_rate: f64,
}

impl SimClock {
    /// Start counting at tick zero
    pub fn new(tick_rate: f64) -> Self {
        Self {
            epoch: Instant::now(),
            tick_rate,
        }
    }

    /// Ticks per second
    pub fn tick_rate(&self) -> f64 {
        self.tick_rate
    }

    /// Current tick
    pub fn now_ticks(&self) -> u64 {
        (self.epoch.elapsed().as_secs_f64() * self.tick_rate) as u64
    }

    /// Current device time
    pub fn time_now(&self) -> TimeSpec {
        TimeSpec::from_ticks(self.now_ticks() as i64, self.tick_rate)
    }

    /// Time left until `tick`; zero once it has passed
    pub fn until(&self, tick: u64) -> Duration {
        let target = Duration::from_secs_f64(tick as f64 / self.tick_rate);
        target.saturating_sub(self.epoch.elapsed())
    }

    /// Duration of `ticks` ticks
    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        Duration::from_secs_f64(ticks as f64 / self.tick_rate)
    }
}
