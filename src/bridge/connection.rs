//! Consumer attach/detach tracking with a waitable condition

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::warn;

/// Effect of an attach or detach report
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The connected state flipped
    Changed,
    /// Already in the reported state
    Unchanged,
    /// The monitor is closed
    Rejected,
}

/// How long `wait_for_connection` may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTimeout {
    /// Check once and return
    Poll,
    After(Duration),
    Infinite,
}

impl WaitTimeout {
    /// Seconds as passed across the producer surface.
    ///
    /// Zero, negative and NaN poll; `+inf` and durations too large to
    /// represent block indefinitely.
    pub fn from_secs_f32(secs: f32) -> Self {
        if secs == f32::INFINITY {
            return WaitTimeout::Infinite;
        }
        if !(secs > 0.0) {
            return WaitTimeout::Poll;
        }
        match Duration::try_from_secs_f32(secs) {
            Ok(duration) => WaitTimeout::After(duration),
            Err(_) => WaitTimeout::Infinite,
        }
    }
}

impl From<Duration> for WaitTimeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            WaitTimeout::Poll
        } else {
            WaitTimeout::After(duration)
        }
    }
}

#[derive(Debug, Default)]
struct State {
    connected: bool,
    closed: bool,
    /// Bumped on every attach
    epoch: u64,
    last_detach: Option<Instant>,
}

/// Tracks whether a consumer is attached to the device output.
///
/// A detach followed quickly by a re-attach (format renegotiation) shows up
/// as a short disconnected window. Callers of [`wait_for_connection`] should
/// retry on `false` rather than treat it as final.
///
/// [`wait_for_connection`]: ConnectionMonitor::wait_for_connection
#[derive(Debug, Default)]
pub struct ConnectionMonitor {
    state: Mutex<State>,
    changed: Condvar,
    /// Lock-free mirror of `state.connected`
    connected: AtomicBool,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a consumer as attached and wake all waiters.
    ///
    /// Ignored once the monitor is closed.
    pub fn report_attached(&self) -> Transition {
        let mut state = self.state.lock();
        if state.closed {
            warn!("Attach reported on a closed session, ignoring");
            return Transition::Rejected;
        }
        if state.connected {
            return Transition::Unchanged;
        }
        state.connected = true;
        state.epoch += 1;
        self.connected.store(true, Ordering::Release);
        self.changed.notify_all();
        Transition::Changed
    }

    /// Mark the consumer as gone and wake all waiters
    pub fn report_detached(&self) -> Transition {
        let mut state = self.state.lock();
        if !state.connected {
            return Transition::Unchanged;
        }
        state.connected = false;
        state.last_detach = Some(Instant::now());
        self.connected.store(false, Ordering::Release);
        self.changed.notify_all();
        Transition::Changed
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connected now, or detached less than `grace` ago
    pub fn is_connected_within(&self, grace: Duration) -> bool {
        if self.is_connected() {
            return true;
        }
        let state = self.state.lock();
        !state.closed
            && state
                .last_detach
                .is_some_and(|detached| detached.elapsed() < grace)
    }

    /// Number of attaches seen so far
    pub fn epoch(&self) -> u64 {
        self.state.lock().epoch
    }

    /// Permanently disconnect and release every waiter
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        if state.connected {
            state.connected = false;
            state.last_detach = Some(Instant::now());
            self.connected.store(false, Ordering::Release);
        }
        self.changed.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Block until a consumer is attached, the timeout passes or the monitor
    /// is closed. Returns true iff connected at return.
    pub fn wait_for_connection(&self, timeout: WaitTimeout) -> bool {
        let mut state = self.state.lock();
        let deadline = match timeout {
            WaitTimeout::Poll => return state.connected && !state.closed,
            // Deadlines past the end of Instant's range wait forever
            WaitTimeout::After(duration) => Instant::now().checked_add(duration),
            WaitTimeout::Infinite => None,
        };

        while !state.connected && !state.closed {
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.changed.wait(&mut state),
            }
        }

        state.connected && !state.closed
    }
}
