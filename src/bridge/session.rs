//! Device session: one emulated camera's format, frame slot and connection state

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, trace};

use super::connection::{ConnectionMonitor, Transition, WaitTimeout};
use super::frame::{Frame, FrameMetadata, PixelFormat};
use super::pacing::PacingClock;
use super::slot::{FrameSlot, SlotStats};
use crate::error::{BridgeError, Result};
use crate::{EmptyFramePolicy, SessionConfig};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

const STATE_IDLE: u8 = 0;
const STATE_DESTROYED: u8 = 1;

/// Session lifecycle. `Idle -> Destroyed` is the only transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Destroyed,
}

/// Format fixed at creation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionFormat {
    pub width: u32,
    pub height: u32,
    pub frame_rate: f32,
    pub pixel_format: PixelFormat,
}

impl SessionFormat {
    /// Bytes per row
    pub fn stride(&self) -> u32 {
        self.width * self.pixel_format.bytes_per_pixel() as u32
    }

    pub fn frame_size(&self) -> usize {
        self.stride() as usize * self.height as usize
    }
}

/// The object both the producer and the pull side hold for one device.
///
/// Shared as `Arc<DeviceSession>`: the producer surface keeps one strong
/// reference per live handle and every in-flight call holds its own, so
/// memory stays valid until the last call returns even if `destroy` runs
/// concurrently.
pub struct DeviceSession {
    id: u64,
    format: SessionFormat,
    clock: PacingClock,
    slot: FrameSlot,
    monitor: ConnectionMonitor,
    state: AtomicU8,
    /// Last assigned sequence. Held across sequence assignment and publish so
    /// concurrent producers publish in order.
    producer: Mutex<u64>,
    blank: Bytes,
    created_at: Instant,
    detach_grace: Duration,
}

impl DeviceSession {
    /// Create a session with the configured default pixel format
    pub fn create(width: i32, height: i32, frame_rate: f32) -> Result<Arc<Self>> {
        let config = crate::CONFIG.load();
        Self::create_with_config(width, height, frame_rate, &config.session)
    }

    pub fn create_with_format(
        width: i32,
        height: i32,
        frame_rate: f32,
        pixel_format: PixelFormat,
    ) -> Result<Arc<Self>> {
        let config = crate::CONFIG.load();
        let session = SessionConfig {
            pixel_format,
            ..config.session.clone()
        };
        Self::create_with_config(width, height, frame_rate, &session)
    }

    #[instrument(skip(config), fields(format = ?config.pixel_format))]
    pub fn create_with_config(
        width: i32,
        height: i32,
        frame_rate: f32,
        config: &SessionConfig,
    ) -> Result<Arc<Self>> {
        let invalid = |reason| BridgeError::invalid_format(width, height, frame_rate, reason);

        if width <= 0 || height <= 0 {
            return Err(invalid("width and height must be positive"));
        }
        if !frame_rate.is_finite() || frame_rate <= 0.0 {
            return Err(invalid("frame rate must be positive and finite"));
        }
        let (width, height) = (width as u32, height as u32);
        if config.max_width.is_some_and(|max| width > max)
            || config.max_height.is_some_and(|max| height > max)
        {
            return Err(invalid("dimensions exceed configured maximum"));
        }
        if config.max_frame_rate.is_some_and(|max| frame_rate > max) {
            return Err(invalid("frame rate exceeds configured maximum"));
        }
        let frame_size = config
            .pixel_format
            .frame_size(width, height)
            .filter(|size| u32::try_from(*size).is_ok())
            .ok_or_else(|| invalid("frame size overflows"))?;

        let clock = PacingClock::new(frame_rate)?;
        let format = SessionFormat {
            width,
            height,
            frame_rate,
            pixel_format: config.pixel_format,
        };

        let session = Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            format,
            clock,
            slot: FrameSlot::new(frame_size),
            monitor: ConnectionMonitor::new(),
            state: AtomicU8::new(STATE_IDLE),
            producer: Mutex::new(0),
            blank: Bytes::from(vec![0u8; frame_size]),
            created_at: Instant::now(),
            detach_grace: Duration::from_millis(config.detach_grace_ms),
        });

        metrics::gauge!("softcam_sessions_active").increment(1.0);
        info!(
            id = session.id,
            width,
            height,
            frame_rate,
            frame_size,
            "Camera session created"
        );
        Ok(session)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn format(&self) -> SessionFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    pub fn frame_rate(&self) -> f32 {
        self.format.frame_rate
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format.pixel_format
    }

    pub fn frame_size(&self) -> usize {
        self.slot.frame_size()
    }

    pub fn clock(&self) -> PacingClock {
        self.clock
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.load(Ordering::Acquire) {
            STATE_IDLE => LifecycleState::Idle,
            _ => LifecycleState::Destroyed,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == LifecycleState::Destroyed
    }

    /// Copy `pixels` into the slot as the newest frame. Never waits for a
    /// consumer. Returns the frame's sequence number.
    pub fn push(&self, pixels: &[u8]) -> Result<u64> {
        self.check_push(pixels.len())?;
        self.publish(Bytes::copy_from_slice(pixels))
    }

    /// Like [`push`](Self::push) but takes ownership of the buffer without copying
    pub fn push_bytes(&self, pixels: Bytes) -> Result<u64> {
        self.check_push(pixels.len())?;
        self.publish(pixels)
    }

    fn check_push(&self, len: usize) -> Result<()> {
        if self.is_destroyed() {
            return Err(BridgeError::InvalidHandle);
        }
        if len != self.frame_size() {
            return Err(BridgeError::SizeMismatch {
                expected: self.frame_size(),
                actual: len,
            });
        }
        Ok(())
    }

    fn publish(&self, data: Bytes) -> Result<u64> {
        let mut last_sequence = self.producer.lock();
        // Re-checked under the lock: destroy takes it after flipping state,
        // so no push lands once destroy has returned.
        if self.is_destroyed() {
            return Err(BridgeError::InvalidHandle);
        }

        let sequence = *last_sequence + 1;
        let timestamp = Instant::now();
        let frame = Frame {
            data,
            meta: Arc::new(FrameMetadata {
                sequence,
                width: self.format.width,
                height: self.format.height,
                stride: self.format.stride(),
                format: self.format.pixel_format,
                pts: timestamp.duration_since(self.created_at),
            }),
            timestamp,
        };
        let dropped = self.slot.store(frame);
        *last_sequence = sequence;
        drop(last_sequence);

        metrics::counter!("softcam_frames_pushed_total").increment(1);
        if dropped {
            metrics::counter!("softcam_frames_dropped_total").increment(1);
        }
        trace!(id = self.id, sequence, dropped, "Frame pushed");
        Ok(sequence)
    }

    /// Latest frame, `None` until the first push
    pub fn load(&self) -> Option<Frame> {
        self.slot.load()
    }

    /// Sequence of the latest frame, 0 before the first push
    pub fn sequence(&self) -> u64 {
        self.slot.sequence()
    }

    /// All-zero frame in the session format, sequence 0
    pub fn blank_frame(&self) -> Frame {
        Frame {
            data: self.blank.clone(),
            meta: Arc::new(FrameMetadata {
                sequence: 0,
                width: self.format.width,
                height: self.format.height,
                stride: self.format.stride(),
                format: self.format.pixel_format,
                pts: self.created_at.elapsed(),
            }),
            timestamp: Instant::now(),
        }
    }

    /// Block until a consumer attaches, `timeout` elapses or the session is
    /// destroyed. Returns true iff connected at return.
    ///
    /// Only one thread per session should wait at a time; concurrent waits
    /// are not coordinated here.
    pub fn wait_for_connection(&self, timeout: impl Into<WaitTimeout>) -> bool {
        let timeout = timeout.into();
        let connected = self.monitor.wait_for_connection(timeout);
        if !connected {
            debug!(
                id = self.id,
                ?timeout,
                destroyed = self.is_destroyed(),
                "No consumer connected"
            );
        }
        connected
    }

    pub fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    /// Connected, or detached within the configured grace window
    pub fn is_consumer_present(&self) -> bool {
        self.monitor.is_connected_within(self.detach_grace)
    }

    /// Number of consumer attaches so far
    pub fn connection_epoch(&self) -> u64 {
        self.monitor.epoch()
    }

    /// Pull side: a consumer started pulling from this device.
    ///
    /// Returns whether this attach connected the session.
    pub fn on_consumer_attach(&self) -> Result<bool> {
        if self.is_destroyed() {
            return Err(BridgeError::InvalidHandle);
        }
        match self.monitor.report_attached() {
            Transition::Rejected => Err(BridgeError::InvalidHandle),
            Transition::Unchanged => Ok(false),
            Transition::Changed => {
                info!(id = self.id, epoch = self.monitor.epoch(), "Consumer attached");
                Ok(true)
            }
        }
    }

    /// Pull side: the consumer stopped pulling.
    ///
    /// Returns whether a consumer was attached.
    pub fn on_consumer_detach(&self) -> bool {
        if self.monitor.report_detached() != Transition::Changed {
            return false;
        }
        info!(id = self.id, "Consumer detached");
        true
    }

    /// Pull side: the frame to deliver right now.
    ///
    /// The latest frame is re-delivered when nothing new arrived. Before the
    /// first push, `policy` decides between a blank frame and `None`.
    pub fn on_pull_request(&self, policy: EmptyFramePolicy) -> Result<Option<Frame>> {
        if self.is_destroyed() {
            return Err(BridgeError::InvalidHandle);
        }
        Ok(match self.slot.load() {
            Some(frame) => Some(frame),
            None => match policy {
                EmptyFramePolicy::Blank => Some(self.blank_frame()),
                EmptyFramePolicy::Stall => None,
            },
        })
    }

    pub fn stats(&self) -> SlotStats {
        self.slot.stats()
    }

    /// Move to `Destroyed`, waking any waiter with `false`. Pushes that have
    /// not published yet fail with `InvalidHandle`. Idempotent; returns
    /// whether this call did the transition.
    pub fn destroy(&self) -> bool {
        let previous = self.state.swap(STATE_DESTROYED, Ordering::AcqRel);
        if previous == STATE_DESTROYED {
            return false;
        }

        self.monitor.close();
        // Quiesce: a push that passed its state check finishes before we return
        drop(self.producer.lock());

        metrics::gauge!("softcam_sessions_active").decrement(1.0);
        let stats = self.slot.stats();
        info!(
            id = self.id,
            stored = stats.stored,
            dropped = stats.dropped,
            "Camera session destroyed"
        );
        true
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.destroy() {
            debug!(id = self.id, "Session dropped without explicit destroy");
        }
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("format", &self.format)
            .field("state", &self.state())
            .field("sequence", &self.sequence())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SessionConfig {
        SessionConfig::default()
    }

    #[test]
    fn create_keeps_format() {
        let session = DeviceSession::create_with_config(640, 480, 30.0, &config()).unwrap();
        assert_eq!(session.width(), 640);
        assert_eq!(session.height(), 480);
        assert_eq!(session.frame_rate(), 30.0);
        assert_eq!(session.frame_size(), 640 * 480 * 3);
        assert_eq!(session.state(), LifecycleState::Idle);
        assert_eq!(session.sequence(), 0);
    }

    #[test]
    fn create_rejects_limits() {
        let config = SessionConfig {
            max_width: Some(100),
            max_height: Some(100),
            max_frame_rate: Some(60.0),
            ..config()
        };
        for (w, h, fps) in [(101, 10, 30.0), (10, 101, 30.0), (10, 10, 61.0)] {
            assert!(matches!(
                DeviceSession::create_with_config(w, h, fps, &config),
                Err(BridgeError::InvalidFormat { .. })
            ));
        }
    }

    #[test]
    fn default_config_has_no_caps() {
        let wide = DeviceSession::create_with_config(10_000, 2, 30.0, &config()).unwrap();
        assert_eq!(wide.width(), 10_000);
        let fast = DeviceSession::create_with_config(2, 2, 2000.0, &config()).unwrap();
        assert_eq!(fast.frame_rate(), 2000.0);
    }

    #[test]
    fn tiny_frame_rate_is_accepted() {
        for rate in [1e-20, f32::MIN_POSITIVE, f32::from_bits(1)] {
            let session = DeviceSession::create_with_config(1, 1, rate, &config()).unwrap();
            assert_eq!(session.frame_rate(), rate);
            assert_eq!(session.clock().interval(), Duration::MAX);
        }
    }

    #[test]
    fn blank_frame_is_zeroed() {
        let session = DeviceSession::create_with_config(4, 2, 30.0, &config()).unwrap();
        let blank = session.blank_frame();
        assert_eq!(blank.sequence(), 0);
        assert_eq!(blank.data.len(), 4 * 2 * 3);
        assert!(blank.data.iter().all(|b| *b == 0));
    }

    #[test]
    fn pull_policy_before_first_push() {
        let session = DeviceSession::create_with_config(4, 2, 30.0, &config()).unwrap();
        let blank = session.on_pull_request(EmptyFramePolicy::Blank).unwrap();
        assert_eq!(blank.map(|f| f.sequence()), Some(0));
        assert!(session
            .on_pull_request(EmptyFramePolicy::Stall)
            .unwrap()
            .is_none());

        session.push(&[7u8; 24]).unwrap();
        let frame = session.on_pull_request(EmptyFramePolicy::Stall).unwrap();
        assert_eq!(frame.map(|f| f.sequence()), Some(1));
    }

    #[test]
    fn destroy_is_idempotent() {
        let session = DeviceSession::create_with_config(4, 2, 30.0, &config()).unwrap();
        assert!(session.destroy());
        assert!(!session.destroy());
        assert!(session.is_destroyed());
        assert!(matches!(session.push(&[0u8; 24]), Err(BridgeError::InvalidHandle)));
        assert!(matches!(
            session.on_pull_request(EmptyFramePolicy::Blank),
            Err(BridgeError::InvalidHandle)
        ));
        assert!(session.on_consumer_attach().is_err());
    }

    #[test]
    fn grace_window_covers_short_detach() {
        let config = SessionConfig {
            detach_grace_ms: 60_000,
            ..config()
        };
        let session = DeviceSession::create_with_config(4, 2, 30.0, &config).unwrap();
        assert!(!session.is_consumer_present());
        session.on_consumer_attach().unwrap();
        session.on_consumer_detach();
        assert!(!session.is_connected());
        assert!(session.is_consumer_present());
    }

    #[test]
    fn detach_reports_only_real_transitions() {
        let session = DeviceSession::create_with_config(4, 2, 30.0, &config()).unwrap();
        assert!(!session.on_consumer_detach());

        assert!(session.on_consumer_attach().unwrap());
        assert!(!session.on_consumer_attach().unwrap());
        assert_eq!(session.connection_epoch(), 1);

        assert!(session.on_consumer_detach());
        assert!(!session.on_consumer_detach());
    }
}
