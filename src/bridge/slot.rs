//! Latest-wins single frame handoff

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;

use super::frame::Frame;

/// Holds the most recently published frame.
///
/// Frames are immutable once built, so publishing is a single atomic pointer
/// swap: a reader gets either the old complete frame or the new complete
/// frame. Neither side waits on the other.
pub struct FrameSlot {
    frame_size: usize,
    current: ArcSwapOption<Frame>,
    /// Highest sequence any reader has observed
    last_loaded: AtomicU64,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_stored: AtomicU64,
    frames_loaded: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Counter snapshot. `dropped` counts frames replaced before any reader saw
/// them and is approximate when a store races a load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub stored: u64,
    pub loaded: u64,
    pub dropped: u64,
}

impl FrameSlot {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            current: ArcSwapOption::empty(),
            last_loaded: AtomicU64::new(0),
            stats: CachePadded::new(Stats::default()),
        }
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Publish `frame`, replacing whatever was there.
    ///
    /// Stores must be serialized by the caller and carry strictly increasing
    /// sequence numbers. Returns true if the replaced frame was never loaded.
    ///
    /// # Panics
    ///
    /// On a buffer of the wrong length or a sequence that does not advance.
    /// Both mean the caller skipped validation.
    pub fn store(&self, frame: Frame) -> bool {
        assert_eq!(
            frame.data.len(),
            self.frame_size,
            "frame slot fed a buffer of the wrong size"
        );
        let sequence = frame.sequence();

        let previous = self.current.swap(Some(Arc::new(frame)));
        self.stats.frames_stored.fetch_add(1, Ordering::Relaxed);

        let Some(previous) = previous else {
            return false;
        };
        assert!(
            previous.sequence() < sequence,
            "frame slot sequence went backwards: {} after {}",
            sequence,
            previous.sequence()
        );

        let unseen = self.last_loaded.load(Ordering::Relaxed) < previous.sequence();
        if unseen {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
        }
        unseen
    }

    /// Snapshot of the latest frame, `None` if nothing was ever stored
    pub fn load(&self) -> Option<Frame> {
        let frame = self.current.load_full()?;
        self.last_loaded.fetch_max(frame.sequence(), Ordering::Relaxed);
        self.stats.frames_loaded.fetch_add(1, Ordering::Relaxed);
        Some(Frame::clone(&frame))
    }

    /// Sequence of the latest frame, 0 when empty
    pub fn sequence(&self) -> u64 {
        match &*self.current.load() {
            Some(frame) => frame.sequence(),
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.load().is_none()
    }

    pub fn stats(&self) -> SlotStats {
        SlotStats {
            stored: self.stats.frames_stored.load(Ordering::Relaxed),
            loaded: self.stats.frames_loaded.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::frame::{FrameMetadata, PixelFormat};
    use bytes::Bytes;
    use std::time::{Duration, Instant};

    fn frame(sequence: u64, fill: u8, len: usize) -> Frame {
        Frame {
            data: Bytes::from(vec![fill; len]),
            meta: Arc::new(FrameMetadata {
                sequence,
                width: 1,
                height: 1,
                stride: 3,
                format: PixelFormat::Bgr24,
                pts: Duration::ZERO,
            }),
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn empty_slot_loads_nothing() {
        let slot = FrameSlot::new(3);
        assert!(slot.load().is_none());
        assert!(slot.is_empty());
        assert_eq!(slot.sequence(), 0);
    }

    #[test]
    fn latest_store_wins() {
        let slot = FrameSlot::new(3);
        for seq in 1..=5 {
            slot.store(frame(seq, seq as u8, 3));
        }
        let loaded = slot.load().unwrap();
        assert_eq!(loaded.sequence(), 5);
        assert_eq!(&loaded.data[..], &[5, 5, 5]);
    }

    #[test]
    fn unseen_frames_count_as_dropped() {
        let slot = FrameSlot::new(3);
        assert!(!slot.store(frame(1, 0, 3)));
        assert!(slot.store(frame(2, 0, 3)));
        slot.load();
        assert!(!slot.store(frame(3, 0, 3)));

        let stats = slot.stats();
        assert_eq!(stats.stored, 3);
        assert_eq!(stats.loaded, 1);
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    #[should_panic(expected = "wrong size")]
    fn wrong_size_store_panics() {
        let slot = FrameSlot::new(3);
        slot.store(frame(1, 0, 4));
    }

    #[test]
    #[should_panic(expected = "went backwards")]
    fn stale_sequence_panics() {
        let slot = FrameSlot::new(3);
        slot.store(frame(2, 0, 3));
        slot.store(frame(1, 0, 3));
    }
}
