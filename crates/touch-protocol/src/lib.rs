//! Shared Protocol Definitions for Fingertip
//!
//! Gesture vocabulary, key usages, and request packets shared between the
//! injector and the command servers that drive it.

mod error;
mod gesture;
mod input;
mod method;
mod packets;

pub use error::*;
pub use gesture::*;
pub use input::*;
pub use method::*;
pub use packets::*;

/// Protocol version for compatibility checking
pub const PROTOCOL_VERSION: u32 = 1;

/// Number of finger slots a multi-touch session can track
pub const MAX_FINGERS: u8 = 20;

/// Finger slot used by single-finger gestures
pub const PRIMARY_FINGER: u8 = 1;
