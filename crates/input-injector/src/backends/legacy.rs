//! Legacy event posting
//!
//! The old mechanism takes device pixels directly and has no notion of
//! pressure or contact radius, so events carry position and phase only.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use touch_protocol::GesturePhase;

use super::{BackendKind, Delivery, DeliveryBackend, DeliveryContext};
use crate::codec::TouchFrame;
use crate::platform::{LegacyPoster, ScreenMetrics};
use crate::{InjectorError, InjectorResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyTouchEvent {
    pub timestamp: u64,
    pub sender_id: u64,
    pub phase: GesturePhase,
    pub finger: u8,
    /// Device pixels
    pub x: f64,
    pub y: f64,
}

pub struct LegacyBackend {
    poster: Option<Arc<dyn LegacyPoster>>,
    metrics: ScreenMetrics,
}

impl LegacyBackend {
    pub fn new(poster: Option<Arc<dyn LegacyPoster>>, metrics: ScreenMetrics) -> Self {
        Self { poster, metrics }
    }

    pub fn deliver(&self, event: &LegacyTouchEvent) -> InjectorResult<()> {
        self.poster
            .as_ref()
            .ok_or_else(|| InjectorError::BackendUnavailable("no legacy poster".into()))?
            .post(event)
    }
}

impl DeliveryBackend for LegacyBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Legacy
    }

    fn is_available(&self) -> bool {
        self.poster.is_some()
    }

    fn deliver_touch(&self, frame: &TouchFrame, ctx: &DeliveryContext) -> InjectorResult<Delivery> {
        let sender_id = ctx.sender_id()?;
        for entry in &frame.entries {
            let point = &entry.contact.point;
            let (x, y) = self.metrics.to_pixels(point.x, point.y);
            self.deliver(&LegacyTouchEvent {
                timestamp: frame.timestamp,
                sender_id,
                phase: entry.phase,
                finger: point.finger,
                x,
                y,
            })?;
        }
        Ok(Delivery::default())
    }
}
