//! In-process bridge between a frame producer and the pull-driven consumer
//! side of a software-emulated camera device.

pub mod bridge;
pub mod error;
pub mod pipeline;
pub mod sender;

use std::path::Path;

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};

pub use bridge::{
    ConnectionMonitor, DeviceSession, Frame, FrameMetadata, FramePacer, FrameSlot,
    LifecycleState, PacingClock, PixelFormat, ProducerPacer, SessionFormat, SlotStats,
    Transition, WaitTimeout,
};
pub use error::{BridgeError, Result};
pub use pipeline::{AdapterStats, PullAdapter, PullOutcome};
pub use sender::CameraHandle;

/// Global configuration that can be atomically swapped at runtime.
/// Sessions read it once at creation.
pub static CONFIG: once_cell::sync::Lazy<ArcSwap<Config>> =
    once_cell::sync::Lazy::new(|| ArcSwap::from_pointee(Config::default()));

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session: SessionConfig,
    pub adapter: AdapterConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Layout used by `DeviceSession::create`
    pub pixel_format: PixelFormat,
    /// Optional caps on what `create` accepts; unset means unlimited
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_frame_rate: Option<f32>,
    /// A detach shorter than this still counts as "consumer present"
    pub detach_grace_ms: u64,
}

/// What the pull side delivers before the producer's first frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmptyFramePolicy {
    /// Deliver an all-zero frame
    #[default]
    Blank,
    /// Deliver nothing and let the caller retry
    Stall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    pub empty_frame_policy: EmptyFramePolicy,
    /// Intervals the pull loop may fall behind before its schedule re-anchors
    pub max_lag_intervals: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Bgr24,
            max_width: None,
            max_height: None,
            max_frame_rate: None,
            detach_grace_ms: 0,
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            empty_frame_policy: EmptyFramePolicy::Blank,
            max_lag_intervals: 4,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "softcam=info".into(),
        }
    }
}

impl Config {
    /// Defaults, then the optional TOML file, then `SOFTCAM__*` environment
    /// variables (`SOFTCAM__SESSION__MAX_WIDTH=1920`).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("SOFTCAM")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}
