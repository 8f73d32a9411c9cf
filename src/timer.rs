//! Wrap-safe elapsed-time accumulator driving periodic agent events.
//!
//! The only time source the dispatch loop samples is the second-of-minute
//! value (0–59), so elapsed time cannot be taken as a difference of two
//! absolute timestamps. The accumulator instead tracks the last observed
//! second and an overflow flag, adding the delta on every observation and
//! special-casing second 59 so a minute wrap is never counted twice.
//!
//! Callers must observe at sub-minute frequency; the dispatch loop polls
//! continuously, so the approximation holds in practice.

use chrono::{Local, Timelike};

/// Accumulates observed seconds toward a firing threshold.
#[derive(Debug, Clone)]
pub struct TimeoutAccumulator {
    start_second: u32,
    overflowed: bool,
    accumulated: u32,
    threshold: u32,
    default_threshold: u32,
}

impl TimeoutAccumulator {
    /// Create an accumulator with the given threshold, anchored at
    /// `start_second` (the current second-of-minute).
    #[must_use]
    pub fn new(threshold: u32, start_second: u32) -> Self {
        Self {
            start_second,
            overflowed: false,
            accumulated: 1,
            threshold,
            default_threshold: threshold,
        }
    }

    /// Create an accumulator anchored at the current wall-clock second.
    #[must_use]
    pub fn started_now(threshold: u32) -> Self {
        Self::new(threshold, Local::now().second())
    }

    /// Feed one observation of the current second-of-minute and report
    /// whether the threshold has been reached.
    ///
    /// A zero threshold never fires. The caller is expected to invoke
    /// [`TimeoutAccumulator::reset`] once the fired event has been handled.
    pub fn observe(&mut self, current_second: u32) -> bool {
        if self.threshold == 0 {
            return false;
        }

        if current_second > self.start_second && !self.overflowed {
            self.accumulated += current_second - self.start_second;
            if current_second == 59 {
                // Wrap is imminent; anchor past second 0 so the same
                // wraparound is not added again on the next observation.
                self.overflowed = true;
                self.start_second = 1;
            } else {
                self.start_second = current_second;
            }
        }

        if current_second == 59 {
            self.overflowed = true;
            self.start_second = 1;
        } else {
            self.overflowed = false;
        }

        self.accumulated >= self.threshold
    }

    /// Sample the wall clock and feed it through [`TimeoutAccumulator::observe`].
    pub fn tick(&mut self) -> bool {
        self.observe(Local::now().second())
    }

    /// Re-anchor after a fired event: the counter returns to one, the
    /// overflow flag clears, and the threshold returns to its default.
    pub fn reset(&mut self, current_second: u32) {
        self.start_second = current_second;
        self.overflowed = false;
        self.accumulated = 1;
        self.threshold = self.default_threshold;
    }

    /// Re-anchor at the current wall-clock second.
    pub fn reset_now(&mut self) {
        self.reset(Local::now().second());
    }

    /// Seconds accumulated so far.
    #[must_use]
    pub fn accumulated(&self) -> u32 {
        self.accumulated
    }

    /// The currently active firing threshold.
    #[must_use]
    pub fn threshold(&self) -> u32 {
        self.threshold
    }
}
