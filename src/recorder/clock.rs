//! Recording time base
//!
//! [`SampleClock`] accumulates millisecond tick differences into seconds and
//! a fractional part, so the recording time is independent of the scheduler's
//! tick resolution and of the 32-bit counter wrapping.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Free-running millisecond counter that wraps at 2^32
pub trait TickSource: Send + Sync {
    fn millis(&self) -> u32;
}

/// Milliseconds since construction, from the monotonic OS clock
#[derive(Debug, Clone, Copy)]
pub struct SystemTicks {
    start: Instant,
}

impl SystemTicks {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemTicks {
    fn default() -> Self {
        Self::new()
    }
}

impl TickSource for SystemTicks {
    fn millis(&self) -> u32 {
        // Truncation is the wrap
        self.start.elapsed().as_millis() as u32
    }
}

/// Settable counter for tests and simulations; clones share the value
#[derive(Debug, Clone, Default)]
pub struct ManualTicks {
    now: Arc<AtomicU32>,
}

impl ManualTicks {
    pub fn new(start: u32) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(start)),
        }
    }

    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::Relaxed);
    }

    pub fn advance(&self, ms: u32) {
        let now = self.now.load(Ordering::Relaxed);
        self.now.store(now.wrapping_add(ms), Ordering::Relaxed);
    }
}

impl TickSource for ManualTicks {
    fn millis(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

/// Elapsed recording time and the periodic sample schedule
#[derive(Debug, Clone, Default)]
pub struct SampleClock {
    last_ms: u32,
    seconds: u64,
    fraction_ms: u32,
    sample_index: u64,
    next_time: f64,
    slack: f64,
}

/// Relative tolerance for comparisons against `sample_index * period`
const SCHEDULE_EPSILON: f64 = 1e-9;

impl SampleClock {
    /// Restart at time zero; the first sample is due immediately
    pub fn reset(&mut self, now_ms: u32) {
        *self = Self {
            last_ms: now_ms,
            ..Self::default()
        };
    }

    /// Fold the ticks elapsed since the last call into the time value
    pub fn advance(&mut self, now_ms: u32) -> f64 {
        let diff = now_ms.wrapping_sub(self.last_ms);
        self.last_ms = now_ms;

        let total = self.fraction_ms as u64 + diff as u64;
        self.seconds += total / 1000;
        self.fraction_ms = (total % 1000) as u32;
        self.current_time()
    }

    /// Seconds since reset
    pub fn current_time(&self) -> f64 {
        self.seconds as f64 + self.fraction_ms as f64 / 1000.0
    }

    /// Whether the current time has reached the next scheduled sample
    pub fn is_due(&self) -> bool {
        self.current_time() + self.slack >= self.next_time
    }

    /// Move the schedule one sample forward and return the new instant
    pub fn schedule_next(&mut self, period: f64) -> f64 {
        self.sample_index += 1;
        self.next_time = self.sample_index as f64 * period;
        self.slack = period * SCHEDULE_EPSILON;
        self.next_time
    }

    /// Whether the next scheduled sample lies beyond `limit`
    ///
    /// An instant that only exceeds `limit` by rounding (3 * 0.1 against 0.3)
    /// still counts as inside.
    pub fn is_past(&self, limit: f64) -> bool {
        self.next_time > limit + self.slack
    }

    pub fn next_time(&self) -> f64 {
        self.next_time
    }
}
