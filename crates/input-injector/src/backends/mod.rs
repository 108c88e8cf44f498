//! Delivery backends
//!
//! Each backend wraps one platform channel. They never panic and never retry;
//! any failure comes back as an error that the router records and falls back
//! from.

mod accessibility;
mod bus;
mod focus;
mod legacy;

use serde::{Deserialize, Serialize};
use touch_protocol::InjectionMethod;

use crate::codec::{EventCodec, HidEvent, TouchFrame};
use crate::platform::ScreenMetrics;
use crate::sender::SenderCredential;
use crate::{InjectorError, InjectorResult};

pub use accessibility::{AccessibilityBackend, AxFinger, AxTouchEvent};
pub use bus::{ConnectionBackend, DirectBusBackend};
pub use focus::FocusRoutedBackend;
pub use legacy::{LegacyBackend, LegacyTouchEvent};

/// Backend identity; names match the injection method vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    #[serde(rename = "sim", alias = "iohid", alias = "direct")]
    DirectBus,
    #[serde(rename = "conn", alias = "connection")]
    Connection,
    #[serde(rename = "bks")]
    FocusRouted,
    #[serde(rename = "legacy", alias = "old")]
    Legacy,
    #[serde(rename = "ax", alias = "a11y")]
    Accessibility,
}

impl BackendKind {
    /// Default priority: lowest latency and most capable first, most
    /// compatible and least precise last
    pub const PRIORITY: [BackendKind; 5] = [
        BackendKind::DirectBus,
        BackendKind::Connection,
        BackendKind::FocusRouted,
        BackendKind::Legacy,
        BackendKind::Accessibility,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::DirectBus => "sim",
            BackendKind::Connection => "conn",
            BackendKind::FocusRouted => "bks",
            BackendKind::Legacy => "legacy",
            BackendKind::Accessibility => "ax",
        }
    }

    /// Backend named by a method, if the method names exactly one
    pub fn from_method(method: InjectionMethod) -> Option<Self> {
        match method {
            InjectionMethod::Sim => Some(BackendKind::DirectBus),
            InjectionMethod::Conn => Some(BackendKind::Connection),
            InjectionMethod::Legacy => Some(BackendKind::Legacy),
            InjectionMethod::Bks => Some(BackendKind::FocusRouted),
            InjectionMethod::Ax => Some(BackendKind::Accessibility),
            InjectionMethod::All | InjectionMethod::Auto => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        name.parse().ok().and_then(Self::from_method)
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One key transition on a usage page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransition {
    pub usage_page: u16,
    pub usage: u16,
    pub down: bool,
}

/// Per-gesture state handed back to a backend on every delivery
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryContext {
    pub sender: Option<SenderCredential>,
    pub target_pid: Option<i32>,
    /// Focus override that must be cleared when the gesture ends
    pub focus_override: Option<i32>,
}

impl DeliveryContext {
    pub fn new(sender: Option<SenderCredential>) -> Self {
        Self {
            sender,
            target_pid: None,
            focus_override: None,
        }
    }

    /// Sender value to stamp; HID backends cannot deliver without one
    pub fn sender_id(&self) -> InjectorResult<u64> {
        self.sender
            .map(|c| c.value)
            .ok_or(InjectorError::DegradedCredential)
    }
}

/// Evidence that lets a success count when unverified deliveries are refused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Corroboration {
    /// The stamped sender was learned, not the fallback constant
    CapturedSender,
    /// A routed dispatch landed within the verification window
    RoutedDispatch,
    /// Success always counts
    Unconditional,
}

/// What a backend knows after a successful call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delivery {
    pub target_pid: Option<i32>,
    /// `Some` when the channel reports whether a live consumer received it
    pub routed: Option<bool>,
}

pub trait DeliveryBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// The platform channel exists. Cheap; does not open anything.
    fn is_available(&self) -> bool;

    /// Events must carry a sender credential to be honored
    fn requires_sender(&self) -> bool {
        true
    }

    fn supports_keys(&self) -> bool {
        false
    }

    fn corroboration(&self) -> Corroboration {
        Corroboration::CapturedSender
    }

    /// Resolve per-gesture state before the first phase
    fn prepare(&self, sender: Option<SenderCredential>) -> InjectorResult<DeliveryContext> {
        Ok(DeliveryContext::new(sender))
    }

    fn deliver_touch(&self, frame: &TouchFrame, ctx: &DeliveryContext) -> InjectorResult<Delivery>;

    fn deliver_key(
        &self,
        _timestamp: u64,
        _key: KeyTransition,
        _ctx: &DeliveryContext,
    ) -> InjectorResult<Delivery> {
        Err(InjectorError::BackendUnavailable(format!(
            "{} does not carry key events",
            self.kind()
        )))
    }

    /// Undo anything `prepare` set up. Called once per prepared gesture.
    fn finish(&self, _ctx: &DeliveryContext) {}
}

/// Normalized, sender-stamped HID events for a frame
pub(crate) fn stamped_touch_events(
    codec: &EventCodec,
    metrics: &ScreenMetrics,
    frame: &TouchFrame,
    ctx: &DeliveryContext,
) -> InjectorResult<Vec<HidEvent>> {
    let sender_id = ctx.sender_id()?;
    let normalized = frame.map_positions(|x, y| metrics.normalize(x, y));
    let mut events = codec.build_frame(&normalized)?;
    for event in &mut events {
        event.stamp(sender_id);
    }
    Ok(events)
}

/// Sender-stamped key event
pub(crate) fn stamped_key_event(
    codec: &EventCodec,
    timestamp: u64,
    key: KeyTransition,
    ctx: &DeliveryContext,
) -> InjectorResult<HidEvent> {
    let sender_id = ctx.sender_id()?;
    let mut event = codec.build_key_event(timestamp, key.usage_page, key.usage, key.down)?;
    event.stamp(sender_id);
    Ok(event)
}
