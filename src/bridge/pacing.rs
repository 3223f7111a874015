//! Frame cadence derived from the configured frame rate

use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{BridgeError, Result};

/// Nominal timing for a frame rate. Pure function of the rate.
///
/// Rates so slow that the interval does not fit in a `Duration` saturate to
/// `Duration::MAX`; such a clock never comes due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingClock {
    frame_rate: f32,
    interval: Duration,
}

impl PacingClock {
    pub fn new(frame_rate: f32) -> Result<Self> {
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(BridgeError::invalid_format(
                0,
                0,
                frame_rate,
                "frame rate must be positive and finite",
            ));
        }
        Ok(Self {
            frame_rate,
            interval: saturating_secs(1.0 / frame_rate as f64),
        })
    }

    pub fn frame_rate(&self) -> f32 {
        self.frame_rate
    }

    /// Time between successive frames
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Offset of frame `n` from the start of a schedule.
    ///
    /// Computed from the rate directly so rounding in `interval` does not
    /// accumulate.
    pub fn offset_of(&self, n: u64) -> Duration {
        saturating_secs(n as f64 / self.frame_rate as f64)
    }

    /// Index of the frame slot containing `elapsed`
    pub fn frame_index_at(&self, elapsed: Duration) -> u64 {
        (elapsed.as_secs_f64() * self.frame_rate as f64).floor() as u64
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Pull-side schedule: yields one deadline per frame.
///
/// If the puller falls behind by more than `max_lag_intervals` the schedule is
/// re-anchored at the current instant rather than replaying missed ticks in a
/// burst.
#[derive(Debug)]
pub struct FramePacer {
    clock: PacingClock,
    anchor: Instant,
    ticks: u64,
    max_lag_intervals: u32,
    resyncs: u64,
}

impl FramePacer {
    pub fn new(clock: PacingClock, max_lag_intervals: u32) -> Self {
        Self {
            clock,
            anchor: Instant::now(),
            ticks: 0,
            max_lag_intervals: max_lag_intervals.max(1),
            resyncs: 0,
        }
    }

    pub fn clock(&self) -> PacingClock {
        self.clock
    }

    /// Deadline for the next frame, `None` if it lies beyond what `Instant`
    /// can represent
    pub fn next_deadline(&self) -> Option<Instant> {
        self.anchor.checked_add(self.clock.offset_of(self.ticks))
    }

    /// Lag tolerated before re-anchoring, `None` when unbounded
    fn lag_limit(&self) -> Option<Duration> {
        self.clock.interval().checked_mul(self.max_lag_intervals)
    }

    /// Consume the next tick given the current time.
    ///
    /// Returns how long to sleep before delivering (zero if already due) and
    /// the lag behind the deadline. A tick that is never due yields
    /// `Duration::MAX` and is not consumed.
    pub fn advance(&mut self, now: Instant) -> (Duration, Duration) {
        let Some(deadline) = self.next_deadline() else {
            return (Duration::MAX, Duration::ZERO);
        };
        let lag = now.saturating_duration_since(deadline);

        if self.lag_limit().is_some_and(|limit| lag > limit) {
            self.resyncs += 1;
            debug!(
                lag_us = lag.as_micros() as u64,
                resyncs = self.resyncs,
                "Pull schedule lagging, re-anchoring"
            );
            self.anchor = now;
            self.ticks = 1;
            return (Duration::ZERO, lag);
        }

        self.ticks += 1;
        (deadline.saturating_duration_since(now), lag)
    }

    /// Sleep until the next tick is due. Returns the lag behind the deadline.
    pub fn wait(&mut self) -> Duration {
        let (sleep, lag) = self.advance(Instant::now());
        if !sleep.is_zero() {
            std::thread::sleep(sleep);
        }
        lag
    }

    /// Restart the schedule at the current instant
    pub fn reset(&mut self) {
        self.anchor = Instant::now();
        self.ticks = 0;
    }

    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }
}

/// Optional producer-side helper that keeps a push loop at the session rate.
///
/// `push` never blocks, so producers that generate frames faster than the
/// rate can call [`ProducerPacer::wait`] between pushes instead.
#[derive(Debug)]
pub struct ProducerPacer {
    pacer: FramePacer,
}

impl ProducerPacer {
    pub fn new(clock: PacingClock) -> Self {
        Self {
            pacer: FramePacer::new(clock, 1),
        }
    }

    pub fn wait(&mut self) {
        self.pacer.wait();
    }
}
