//! Input Injector - synthetic touch and key injection for Fingertip
//!
//! Builds hardware-shaped digitizer and keyboard events, stamps them with a
//! sender credential, and delivers them through whichever platform channel
//! accepts them, falling back across channels in a fixed priority order.

pub mod backends;
mod clock;
pub mod codec;
mod config;
mod diagnostics;
mod error;
mod injector;
pub mod loopback;
pub mod plan;
pub mod platform;
mod router;
mod sender;
mod session;
mod traits;

pub use clock::*;
pub use self::config::*;
pub use diagnostics::*;
pub use error::*;
pub use injector::*;
pub use router::*;
pub use sender::*;
pub use session::*;
pub use traits::*;
