//! Gesture injector trait abstraction

use std::sync::Arc;
use std::time::Duration;

use touch_protocol::{GesturePacket, GestureRequest, Point, TouchStep};

use crate::InjectorResult;
use crate::injector::TouchInjector;

/// Gesture surface consumed by command servers
pub trait GestureInjector: Send + Sync {
    fn tap(&self, at: Point, method: Option<&str>) -> bool;

    fn double_tap(&self, at: Point, method: Option<&str>) -> bool;

    fn long_press(&self, at: Point, duration: Option<Duration>, method: Option<&str>) -> bool;

    fn swipe(
        &self,
        from: Point,
        to: Point,
        duration: Option<Duration>,
        method: Option<&str>,
    ) -> bool;

    fn drag(
        &self,
        from: Point,
        to: Point,
        duration: Option<Duration>,
        method: Option<&str>,
    ) -> bool;

    /// Run a raw per-finger script
    fn multi_touch(&self, steps: &[TouchStep], method: Option<&str>) -> bool;

    /// Press or release one keyboard usage
    fn send_key_usage(&self, usage: u16, down: bool) -> bool;

    /// Type printable ASCII text
    fn type_text(&self, text: &str) -> bool;

    fn dispatch(&self, request: &GestureRequest) -> bool;

    /// Whether events carry a learned sender rather than the fallback
    fn sender_id_captured(&self) -> bool;
}

impl GestureInjector for TouchInjector {
    fn tap(&self, at: Point, method: Option<&str>) -> bool {
        TouchInjector::tap(self, at, method)
    }

    fn double_tap(&self, at: Point, method: Option<&str>) -> bool {
        TouchInjector::double_tap(self, at, method)
    }

    fn long_press(&self, at: Point, duration: Option<Duration>, method: Option<&str>) -> bool {
        TouchInjector::long_press(self, at, duration, method)
    }

    fn swipe(
        &self,
        from: Point,
        to: Point,
        duration: Option<Duration>,
        method: Option<&str>,
    ) -> bool {
        TouchInjector::swipe(self, from, to, duration, method)
    }

    fn drag(
        &self,
        from: Point,
        to: Point,
        duration: Option<Duration>,
        method: Option<&str>,
    ) -> bool {
        TouchInjector::drag(self, from, to, duration, method)
    }

    fn multi_touch(&self, steps: &[TouchStep], method: Option<&str>) -> bool {
        TouchInjector::multi_touch(self, steps, method)
    }

    fn send_key_usage(&self, usage: u16, down: bool) -> bool {
        TouchInjector::send_key_usage(self, usage, down)
    }

    fn type_text(&self, text: &str) -> bool {
        TouchInjector::type_text(self, text)
    }

    fn dispatch(&self, request: &GestureRequest) -> bool {
        TouchInjector::dispatch(self, request)
    }

    fn sender_id_captured(&self) -> bool {
        TouchInjector::sender_id_captured(self)
    }
}

/// Gesture request processor that handles packets from a command server
pub struct RequestProcessor {
    injector: Arc<dyn GestureInjector>,
    last_sequence: u64,
    processed: u64,
}

impl RequestProcessor {
    pub fn new(injector: Arc<dyn GestureInjector>) -> Self {
        Self {
            injector,
            last_sequence: 0,
            processed: 0,
        }
    }

    /// Decode and process one encoded packet
    pub fn process_bytes(&mut self, data: &[u8]) -> InjectorResult<bool> {
        let packet = GesturePacket::from_bytes(data)?;
        Ok(self.process_packet(&packet))
    }

    /// Process a gesture packet. Returns whether the gesture was delivered.
    pub fn process_packet(&mut self, packet: &GesturePacket) -> bool {
        // Check for out-of-order packets
        if packet.sequence <= self.last_sequence && self.last_sequence > 0 {
            tracing::warn!(
                "Out-of-order gesture packet: {} <= {}",
                packet.sequence,
                self.last_sequence
            );
            // Still process it; each packet is a complete gesture
        }
        self.last_sequence = packet.sequence;
        self.processed += 1;

        self.injector.dispatch(&packet.request)
    }

    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }
}
