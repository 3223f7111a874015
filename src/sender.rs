//! Producer call surface
//!
//! Stable, binding-friendly entry points that work on opaque handles. The
//! handle table holds one strong reference per live camera; `delete_camera`
//! releases it, and calls already in flight keep the session alive until they
//! return.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::bridge::{DeviceSession, WaitTimeout};
use crate::error::{BridgeError, Result};

static CAMERAS: Lazy<Mutex<HashMap<CameraHandle, Arc<DeviceSession>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

static NEXT_HANDLE: AtomicU64 = AtomicU64::new(1);

/// Opaque camera identity passed across the binding boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CameraHandle(NonZeroU64);

impl CameraHandle {
    pub fn as_raw(self) -> u64 {
        self.0.get()
    }

    /// `None` for 0, which is never a valid handle
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }
}

/// Create a camera with the configured pixel format
pub fn create_camera(width: i32, height: i32, frame_rate: f32) -> Result<CameraHandle> {
    let session = DeviceSession::create(width, height, frame_rate)?;
    let raw = NEXT_HANDLE.fetch_add(1, Ordering::Relaxed);
    let handle = CameraHandle::from_raw(raw).ok_or(BridgeError::InvalidHandle)?;

    CAMERAS.lock().insert(handle, session);
    info!(handle = raw, "Camera registered");
    Ok(handle)
}

/// Destroy the camera and release the table's reference.
///
/// Waiters are woken with `false`; later calls with this handle fail with
/// `InvalidHandle`.
pub fn delete_camera(handle: CameraHandle) -> Result<()> {
    let session = CAMERAS
        .lock()
        .remove(&handle)
        .ok_or(BridgeError::InvalidHandle)?;
    session.destroy();

    let in_flight = Arc::strong_count(&session) - 1;
    if in_flight > 0 {
        warn!(
            handle = handle.as_raw(),
            in_flight, "Camera deleted with calls still in flight"
        );
    }
    info!(handle = handle.as_raw(), "Camera unregistered");
    Ok(())
}

/// Push one frame; `pixels` must be exactly width * height * bytes-per-pixel
pub fn send_frame(handle: CameraHandle, pixels: &[u8]) -> Result<()> {
    session(handle)?.push(pixels).map(|_| ())
}

/// Wait up to `timeout_secs` for a consumer.
///
/// `<= 0` polls, `f32::INFINITY` waits until a consumer attaches or the
/// camera is deleted. Unknown handles report `false`.
pub fn wait_for_connection(handle: CameraHandle, timeout_secs: f32) -> bool {
    match session(handle) {
        Ok(session) => session.wait_for_connection(WaitTimeout::from_secs_f32(timeout_secs)),
        Err(_) => false,
    }
}

/// Session behind a live handle, for the pull side
pub fn session(handle: CameraHandle) -> Result<Arc<DeviceSession>> {
    CAMERAS
        .lock()
        .get(&handle)
        .cloned()
        .ok_or(BridgeError::InvalidHandle)
}

pub fn is_live(handle: CameraHandle) -> bool {
    CAMERAS.lock().contains_key(&handle)
}

/// Number of cameras currently registered
pub fn live_cameras() -> usize {
    CAMERAS.lock().len()
}
