//! Error types for the camera bridge

use thiserror::Error;

/// Result type alias using [`BridgeError`]
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors reported synchronously to producers and the pull side.
///
/// None of these are fatal: a caller can always retry with corrected input
/// or a fresh session.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Width, height or frame rate rejected at creation
    #[error("invalid format {width}x{height}@{frame_rate}: {reason}")]
    InvalidFormat {
        width: i64,
        height: i64,
        frame_rate: f32,
        reason: &'static str,
    },

    /// Pushed buffer does not match the session's frame size
    #[error("frame size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    /// Operation on a destroyed or unknown session
    #[error("invalid camera handle")]
    InvalidHandle,

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl BridgeError {
    pub(crate) fn invalid_format(
        width: impl Into<i64>,
        height: impl Into<i64>,
        frame_rate: f32,
        reason: &'static str,
    ) -> Self {
        Self::InvalidFormat {
            width: width.into(),
            height: height.into(),
            frame_rate,
            reason,
        }
    }
}
