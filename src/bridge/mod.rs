pub mod connection;
pub mod frame;
pub mod pacing;
pub mod session;
pub mod slot;

pub use connection::{ConnectionMonitor, Transition, WaitTimeout};
pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use pacing::{FramePacer, PacingClock, ProducerPacer};
pub use session::{DeviceSession, LifecycleState, SessionFormat};
pub use slot::{FrameSlot, SlotStats};
