//! Wall-clock aligned tick cadence.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::config::Config;

/// One scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    /// Tick number since the epoch: `floor(now / tick length)`
    pub index: i64,
    pub start: DateTime<Utc>,
    /// Start a new archive slot instead of replacing the tail
    pub force_append: bool,
    /// Clear every archive once this tick's snapshot is published
    pub reset: bool,
}

/// Splits each query interval into equal ticks aligned to the wall clock.
#[derive(Debug, Clone, Copy)]
pub struct Cadence {
    tick_ms: i64,
    samples_per_interval: i64,
    reset_intervals: i64,
}

impl Cadence {
    pub fn new(tick: Duration, samples_per_interval: u32, reset_intervals: u32) -> Self {
        Self {
            tick_ms: (tick.as_millis() as i64).max(1),
            samples_per_interval: i64::from(samples_per_interval.max(1)),
            reset_intervals: i64::from(reset_intervals),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(
            cfg.tick_duration(),
            cfg.samples_per_interval,
            cfg.archive_reset_intervals,
        )
    }

    /// The tick containing `now`.
    pub fn tick_at(&self, now: DateTime<Utc>) -> Tick {
        let index = now.timestamp_millis().div_euclid(self.tick_ms);
        let reset_every = self.samples_per_interval * self.reset_intervals;
        Tick {
            index,
            start: truncate_to_tick(now, self.tick_ms),
            force_append: index % self.samples_per_interval == 0,
            reset: reset_every > 0 && index % reset_every == 0,
        }
    }

    /// Time left until the next tick boundary.
    pub fn until_next(&self, now: DateTime<Utc>) -> Duration {
        let ms = now.timestamp_millis();
        let next = (ms.div_euclid(self.tick_ms) + 1) * self.tick_ms;
        Duration::from_millis((next - ms) as u64)
    }
}

/// Truncate a timestamp to the start of its tick.
pub fn truncate_to_tick(dt: DateTime<Utc>, tick_ms: i64) -> DateTime<Utc> {
    let ms = dt.timestamp_millis();
    DateTime::from_timestamp_millis(ms - ms.rem_euclid(tick_ms)).unwrap_or(dt)
}
