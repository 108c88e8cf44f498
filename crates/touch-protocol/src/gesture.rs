//! Gesture and touch point definitions

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{InjectionMethod, MAX_FINGERS, PRIMARY_FINGER, ProtocolError, ProtocolResult};

/// Screen position in points
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Linear interpolation towards `to`; `t` of 0.0 is `self`, 1.0 is `to`
    pub fn lerp(self, to: Point, t: f64) -> Point {
        Point {
            x: self.x + (to.x - self.x) * t,
            y: self.y + (to.y - self.y) * t,
        }
    }
}

/// Phase of a single finger within a gesture
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GesturePhase {
    Down,
    Move,
    Up,
}

impl GesturePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            GesturePhase::Down => "down",
            GesturePhase::Move => "move",
            GesturePhase::Up => "up",
        }
    }
}

impl std::fmt::Display for GesturePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single finger contact
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchPoint {
    /// Finger slot (0..MAX_FINGERS)
    pub finger: u8,
    pub x: f64,
    pub y: f64,
    pub pressure: f64,
    pub major_radius: f64,
    pub minor_radius: f64,
    /// Whether the contact still carries meaningful data
    pub valid: bool,
}

impl TouchPoint {
    /// Default contact pressure for synthetic fingers
    pub const DEFAULT_PRESSURE: f64 = 1.0;
    /// Default contact radius for synthetic fingers
    pub const DEFAULT_RADIUS: f64 = 5.0;

    pub fn new(finger: u8, x: f64, y: f64) -> Self {
        Self {
            finger,
            x,
            y,
            pressure: Self::DEFAULT_PRESSURE,
            major_radius: Self::DEFAULT_RADIUS,
            minor_radius: Self::DEFAULT_RADIUS,
            valid: true,
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Check that a finger index fits into a session
pub fn check_finger(finger: u8) -> ProtocolResult<u8> {
    if finger < MAX_FINGERS {
        Ok(finger)
    } else {
        Err(ProtocolError::InvalidFingerIndex(finger))
    }
}

/// One step of a raw multi-touch script
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TouchStep {
    pub finger: u8,
    pub phase: GesturePhase,
    pub x: f64,
    pub y: f64,
    /// Pause after this step's frame is emitted
    pub hold_ms: u64,
}

impl TouchStep {
    pub fn new(finger: u8, phase: GesturePhase, x: f64, y: f64) -> Self {
        Self {
            finger,
            phase,
            x,
            y,
            hold_ms: 0,
        }
    }

    pub fn hold(mut self, ms: u64) -> Self {
        self.hold_ms = ms;
        self
    }
}

/// Gesture kind requested by a caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GestureKind {
    Tap { at: Point },
    DoubleTap { at: Point },
    LongPress { at: Point, duration_ms: Option<u64> },
    Swipe { from: Point, to: Point, duration_ms: Option<u64> },
    Drag { from: Point, to: Point, duration_ms: Option<u64> },
    Key { usage: u16, down: bool },
    Text { text: String },
    MultiTouch { steps: Vec<TouchStep> },
}

impl GestureKind {
    pub fn name(&self) -> &'static str {
        match self {
            GestureKind::Tap { .. } => "tap",
            GestureKind::DoubleTap { .. } => "double_tap",
            GestureKind::LongPress { .. } => "long_press",
            GestureKind::Swipe { .. } => "swipe",
            GestureKind::Drag { .. } => "drag",
            GestureKind::Key { .. } => "key",
            GestureKind::Text { .. } => "text",
            GestureKind::MultiTouch { .. } => "multi_touch",
        }
    }
}

/// A gesture request with its delivery method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GestureRequest {
    pub kind: GestureKind,
    #[serde(default)]
    pub method: InjectionMethod,
}

impl GestureRequest {
    pub fn new(kind: GestureKind) -> Self {
        Self {
            kind,
            method: InjectionMethod::Auto,
        }
    }

    pub fn with_method(mut self, method: InjectionMethod) -> Self {
        self.method = method;
        self
    }

    pub fn tap(x: f64, y: f64) -> Self {
        Self::new(GestureKind::Tap {
            at: Point::new(x, y),
        })
    }

    pub fn swipe(from: Point, to: Point, duration: Duration) -> Self {
        Self::new(GestureKind::Swipe {
            from,
            to,
            duration_ms: Some(duration.as_millis() as u64),
        })
    }

    /// Finger used by single-finger gestures
    pub fn finger(&self) -> u8 {
        PRIMARY_FINGER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lerp_endpoints_and_midpoint() {
        let a = Point::new(10.0, 10.0);
        let b = Point::new(100.0, 100.0);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
        assert_eq!(a.lerp(b, 0.5), Point::new(55.0, 55.0));
    }

    #[test]
    fn test_phase_ordering() {
        assert!(GesturePhase::Down < GesturePhase::Move);
        assert!(GesturePhase::Move < GesturePhase::Up);
    }

    #[test]
    fn test_check_finger_bounds() {
        assert!(check_finger(0).is_ok());
        assert!(check_finger(MAX_FINGERS - 1).is_ok());
        assert!(matches!(
            check_finger(MAX_FINGERS),
            Err(ProtocolError::InvalidFingerIndex(_))
        ));
    }
}
