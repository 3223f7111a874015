//! Paced pull driver for the consumer side of a device session

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crossbeam::utils::CachePadded;
use tracing::{debug, trace};

use crate::bridge::{DeviceSession, Frame, FramePacer};
use crate::error::{BridgeError, Result};
use crate::{AdapterConfig, EmptyFramePolicy};

/// Result of one pull
#[derive(Debug, Clone)]
pub enum PullOutcome {
    /// A frame not delivered before
    Fresh(Frame),
    /// Nothing new since the last pull, the previous frame again
    Repeat(Frame),
    /// No frame produced yet, all-zero placeholder
    Blank(Frame),
    /// No frame produced yet and the policy says wait
    Stall,
    /// Session destroyed or dropped
    Closed,
}

impl PullOutcome {
    pub fn frame(&self) -> Option<&Frame> {
        match self {
            PullOutcome::Fresh(frame) | PullOutcome::Repeat(frame) | PullOutcome::Blank(frame) => {
                Some(frame)
            }
            PullOutcome::Stall | PullOutcome::Closed => None,
        }
    }

    pub fn into_frame(self) -> Option<Frame> {
        match self {
            PullOutcome::Fresh(frame) | PullOutcome::Repeat(frame) | PullOutcome::Blank(frame) => {
                Some(frame)
            }
            PullOutcome::Stall | PullOutcome::Closed => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, PullOutcome::Closed)
    }
}

/// Drives pulls from a session on behalf of one consumer.
///
/// Holds only a weak reference: the producer owns the session, and each pull
/// upgrades for the duration of the call.
pub struct PullAdapter {
    session: Weak<DeviceSession>,
    session_id: u64,
    pacer: FramePacer,
    policy: EmptyFramePolicy,
    last_sequence: u64,
    attached: bool,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    fresh: AtomicU64,
    repeated: AtomicU64,
    blank: AtomicU64,
    stalled: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterStats {
    pub fresh: u64,
    pub repeated: u64,
    pub blank: u64,
    pub stalled: u64,
}

impl PullAdapter {
    pub fn new(session: &Arc<DeviceSession>, config: &AdapterConfig) -> Self {
        Self {
            session: Arc::downgrade(session),
            session_id: session.id(),
            pacer: FramePacer::new(session.clock(), config.max_lag_intervals),
            policy: config.empty_frame_policy,
            last_sequence: 0,
            attached: false,
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Adapter using the global configuration
    pub fn from_global_config(session: &Arc<DeviceSession>) -> Self {
        Self::new(session, &crate::CONFIG.load().adapter)
    }

    /// Start servicing the consumer. Restarts the pull schedule.
    pub fn attach(&mut self) -> Result<()> {
        let session = self.session.upgrade().ok_or(BridgeError::InvalidHandle)?;
        session.on_consumer_attach()?;
        self.attached = true;
        self.pacer.reset();
        Ok(())
    }

    pub fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        if let Some(session) = self.session.upgrade() {
            session.on_consumer_detach();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Fetch what should be delivered now, without waiting
    pub fn pull(&mut self) -> PullOutcome {
        let Some(session) = self.session.upgrade() else {
            return self.closed();
        };
        let Ok(frame) = session.on_pull_request(self.policy) else {
            return self.closed();
        };

        match frame {
            None => {
                self.stats.stalled.fetch_add(1, Ordering::Relaxed);
                PullOutcome::Stall
            }
            Some(frame) if frame.sequence() == 0 => {
                self.stats.blank.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("softcam_blank_frames_total").increment(1);
                PullOutcome::Blank(frame)
            }
            Some(frame) if frame.sequence() == self.last_sequence => {
                self.stats.repeated.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("softcam_frames_repeated_total").increment(1);
                PullOutcome::Repeat(frame)
            }
            Some(frame) => {
                let skipped = frame.sequence().saturating_sub(self.last_sequence + 1);
                trace!(sequence = frame.sequence(), skipped, "Fresh frame");
                self.last_sequence = frame.sequence();
                self.stats.fresh.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("softcam_frames_delivered_total").increment(1);
                PullOutcome::Fresh(frame)
            }
        }
    }

    /// Wait for the next tick of the session's frame clock, then pull
    pub fn next_frame(&mut self) -> PullOutcome {
        let lag = self.pacer.wait();
        metrics::histogram!("softcam_pull_lag_us").record(lag.as_micros() as f64);
        self.pull()
    }

    pub fn stats(&self) -> AdapterStats {
        AdapterStats {
            fresh: self.stats.fresh.load(Ordering::Relaxed),
            repeated: self.stats.repeated.load(Ordering::Relaxed),
            blank: self.stats.blank.load(Ordering::Relaxed),
            stalled: self.stats.stalled.load(Ordering::Relaxed),
        }
    }

    fn closed(&mut self) -> PullOutcome {
        if self.attached {
            debug!(id = self.session_id, "Session closed under attached consumer");
            self.attached = false;
        }
        PullOutcome::Closed
    }
}

impl Drop for PullAdapter {
    fn drop(&mut self) {
        self.detach();
    }
}
