//! Accessibility event posting
//!
//! Posts hand/finger descriptions instead of raw digitizer events. Needs no
//! sender credential, which makes it the path most likely to work in degraded
//! mode, at the price of coarser timing on the consumer side.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use touch_protocol::GesturePhase;

use super::{BackendKind, Corroboration, Delivery, DeliveryBackend, DeliveryContext};
use crate::codec::TouchFrame;
use crate::platform::AccessibilityPoster;
use crate::{InjectorError, InjectorResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxFinger {
    pub index: u8,
    pub identity: u32,
    /// Points
    pub x: f64,
    pub y: f64,
    pub phase: GesturePhase,
}

/// One hand update on the accessibility surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxTouchEvent {
    pub timestamp: u64,
    pub phase: GesturePhase,
    pub fingers: Vec<AxFinger>,
}

impl AxTouchEvent {
    pub fn from_frame(frame: &TouchFrame) -> Self {
        Self {
            timestamp: frame.timestamp,
            phase: frame.phase(),
            fingers: frame
                .entries
                .iter()
                .map(|e| AxFinger {
                    index: e.contact.point.finger,
                    identity: e.contact.identity,
                    x: e.contact.point.x,
                    y: e.contact.point.y,
                    phase: e.phase,
                })
                .collect(),
        }
    }
}

pub struct AccessibilityBackend {
    poster: Option<Arc<dyn AccessibilityPoster>>,
}

impl AccessibilityBackend {
    pub fn new(poster: Option<Arc<dyn AccessibilityPoster>>) -> Self {
        Self { poster }
    }

    pub fn deliver(&self, event: &AxTouchEvent) -> InjectorResult<()> {
        self.poster
            .as_ref()
            .ok_or_else(|| InjectorError::BackendUnavailable("no accessibility poster".into()))?
            .post(event)
    }
}

impl DeliveryBackend for AccessibilityBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Accessibility
    }

    fn is_available(&self) -> bool {
        self.poster.is_some()
    }

    fn requires_sender(&self) -> bool {
        false
    }

    fn corroboration(&self) -> Corroboration {
        Corroboration::Unconditional
    }

    fn deliver_touch(
        &self,
        frame: &TouchFrame,
        _ctx: &DeliveryContext,
    ) -> InjectorResult<Delivery> {
        if frame.entries.is_empty() {
            return Err(InjectorError::Construction("touch frame has no contacts".into()));
        }
        self.deliver(&AxTouchEvent::from_frame(frame))?;
        Ok(Delivery::default())
    }
}
