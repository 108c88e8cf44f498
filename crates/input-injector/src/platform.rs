//! Platform collaborator interfaces
//!
//! Every host channel the injector touches sits behind one of these traits.
//! A `Platform` bundles whichever channels the host provides; missing ones are
//! simply `None` and the matching backend reports itself unavailable.

use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::Receiver;
use serde::Serialize;
use touch_protocol::Point;

use crate::backends::{AxTouchEvent, LegacyTouchEvent};
use crate::codec::HidEvent;
use crate::{InjectorError, InjectorResult};

/// Process-wide client of the event system
pub trait EventSystemClient: Send + Sync {
    fn dispatch(&self, event: &HidEvent) -> InjectorResult<()>;
}

/// Raw connection handle below the client abstraction
pub trait RawConnection: Send + Sync {
    /// Write one serialized event
    fn write(&self, frame: Bytes) -> InjectorResult<()>;
}

/// Entry point to the event bus
pub trait EventBus: Send + Sync {
    /// Create and activate a client. Called at most once per process.
    fn open_client(&self) -> InjectorResult<Arc<dyn EventSystemClient>>;

    /// Open a raw connection. Called at most once per process.
    fn open_connection(&self) -> InjectorResult<Arc<dyn RawConnection>>;
}

/// Older event-posting mechanism without coordinate transforms
pub trait LegacyPoster: Send + Sync {
    fn post(&self, event: &LegacyTouchEvent) -> InjectorResult<()>;
}

/// Outcome of a focus-routed send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteReceipt {
    pub target_pid: i32,
    /// The router saw a live consumer for the event
    pub routed: bool,
}

/// Window/application router that addresses events to a process
pub trait FocusRouter: Send + Sync {
    fn frontmost_pid(&self) -> Option<i32>;

    /// Temporarily give `pid` event focus
    fn set_focus_override(&self, pid: i32) -> InjectorResult<()>;

    fn clear_focus_override(&self, pid: i32);

    fn send(&self, pid: i32, event: &HidEvent) -> InjectorResult<RouteReceipt>;
}

/// Accessibility event-posting surface
pub trait AccessibilityPoster: Send + Sync {
    fn post(&self, event: &AxTouchEvent) -> InjectorResult<()>;
}

/// Screen geometry query
pub trait ScreenInfo: Send + Sync {
    fn metrics(&self) -> ScreenMetrics;
}

/// Registry/property lookup for a live sender credential
pub trait SenderRegistry: Send + Sync {
    fn probe_sender_id(&self) -> Option<u64>;
}

/// An event seen in flight on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedEvent {
    pub sender_id: u64,
    pub event_type: u32,
    /// Came from a process whose sender tags are trusted
    pub trusted: bool,
    /// High-confidence digitizer event from real hardware
    pub digitizer: bool,
}

/// Transient listener on the event bus
pub trait EventTap: Send + Sync {
    fn subscribe(&self) -> InjectorResult<Receiver<ObservedEvent>>;

    /// Must tolerate being called more than once
    fn unsubscribe(&self);
}

/// Screen size in points and the points-to-pixels scale
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreenMetrics {
    pub width: f64,
    pub height: f64,
    pub scale: f64,
}

impl Default for ScreenMetrics {
    fn default() -> Self {
        Self {
            width: 375.0,
            height: 667.0,
            scale: 2.0,
        }
    }
}

impl ScreenMetrics {
    /// Clamp a point into the screen. Non-finite coordinates are rejected.
    pub fn clamp(&self, point: Point) -> InjectorResult<Point> {
        if !point.x.is_finite() || !point.y.is_finite() {
            return Err(InjectorError::InvalidCoordinates {
                x: point.x,
                y: point.y,
            });
        }
        let max_x = (self.width - 1.0).max(0.0);
        let max_y = (self.height - 1.0).max(0.0);
        Ok(Point::new(point.x.clamp(0.0, max_x), point.y.clamp(0.0, max_y)))
    }

    /// Points to 0..1 screen-relative coordinates
    pub fn normalize(&self, x: f64, y: f64) -> (f64, f64) {
        if self.width <= 0.0 || self.height <= 0.0 {
            return (0.0, 0.0);
        }
        (x / self.width, y / self.height)
    }

    /// Points to device pixels
    pub fn to_pixels(&self, x: f64, y: f64) -> (f64, f64) {
        (x * self.scale, y * self.scale)
    }
}

/// Capability detection result, computed once when the injector is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Capabilities {
    pub event_library: bool,
    pub event_bus: bool,
    pub legacy: bool,
    pub focus_router: bool,
    pub accessibility: bool,
    pub screen_info: bool,
    pub registry_probe: bool,
    pub event_tap: bool,
}

/// Host channels available to the injector
#[derive(Clone, Default)]
pub struct Platform {
    pub event_bus: Option<Arc<dyn EventBus>>,
    pub legacy: Option<Arc<dyn LegacyPoster>>,
    pub focus: Option<Arc<dyn FocusRouter>>,
    pub accessibility: Option<Arc<dyn AccessibilityPoster>>,
    pub screen: Option<Arc<dyn ScreenInfo>>,
    pub registry: Option<Arc<dyn SenderRegistry>>,
    pub event_tap: Option<Arc<dyn EventTap>>,
}

impl Platform {
    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            // the library that allocates HID events ships with the bus and router
            event_library: self.event_bus.is_some() || self.focus.is_some(),
            event_bus: self.event_bus.is_some(),
            legacy: self.legacy.is_some(),
            focus_router: self.focus.is_some(),
            accessibility: self.accessibility.is_some(),
            screen_info: self.screen.is_some(),
            registry_probe: self.registry.is_some(),
            event_tap: self.event_tap.is_some(),
        }
    }

    pub fn screen_metrics(&self) -> ScreenMetrics {
        self.screen
            .as_ref()
            .map(|s| s.metrics())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("capabilities", &self.capabilities())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_into_bounds() {
        let metrics = ScreenMetrics::default();
        let p = metrics.clamp(Point::new(-5.0, 1000.0)).unwrap();
        assert_eq!(p, Point::new(0.0, 666.0));
        assert!(metrics.clamp(Point::new(f64::NAN, 0.0)).is_err());
    }

    #[test]
    fn test_coordinate_spaces() {
        let metrics = ScreenMetrics {
            width: 400.0,
            height: 800.0,
            scale: 3.0,
        };
        assert_eq!(metrics.normalize(100.0, 400.0), (0.25, 0.5));
        assert_eq!(metrics.to_pixels(100.0, 400.0), (300.0, 1200.0));
    }

    #[test]
    fn test_empty_platform_has_no_capabilities() {
        assert_eq!(Platform::default().capabilities(), Capabilities::default());
    }
}
