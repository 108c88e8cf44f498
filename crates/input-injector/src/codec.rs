//! Event codec: builds hardware-shaped input events
//!
//! Touch frames become a hand-level digitizer event with one finger child per
//! contact. Lifting is two events: the first clears `touch` but keeps `range`,
//! the second clears `range`. Consumers treat a lift without the range
//! teardown as a stuck touch, so both are always emitted.

use bitflags::bitflags;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use touch_protocol::GesturePhase;

use crate::session::Contact;
use crate::{InjectorError, InjectorResult};

/// Event type of keyboard events on the event bus
pub const EVENT_TYPE_KEYBOARD: u32 = 3;
/// Event type of digitizer events on the event bus
pub const EVENT_TYPE_DIGITIZER: u32 = 11;

bitflags! {
    /// Which fields of a digitizer event changed in this update
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct EventMask: u32 {
        const RANGE = 0x0000_0001;
        const TOUCH = 0x0000_0002;
        const POSITION = 0x0000_0004;
        const IDENTITY = 0x0000_0020;
        const CANCEL = 0x0000_0080;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transducer {
    Finger,
    Hand,
}

/// Per-finger child of a digitizer event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FingerEvent {
    pub index: u8,
    pub identity: u32,
    pub mask: EventMask,
    pub x: f64,
    pub y: f64,
    pub pressure: f64,
    pub major_radius: f64,
    pub minor_radius: f64,
    pub range: bool,
    pub touch: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitizerEvent {
    pub timestamp: u64,
    pub sender_id: u64,
    pub transducer: Transducer,
    pub mask: EventMask,
    pub range: bool,
    pub touch: bool,
    pub display_integrated: bool,
    pub children: Vec<FingerEvent>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardEvent {
    pub timestamp: u64,
    pub sender_id: u64,
    pub usage_page: u16,
    pub usage: u16,
    pub down: bool,
}

/// A low-level event ready for any HID-based backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HidEvent {
    Digitizer(DigitizerEvent),
    Keyboard(KeyboardEvent),
}

impl HidEvent {
    pub fn timestamp(&self) -> u64 {
        match self {
            HidEvent::Digitizer(e) => e.timestamp,
            HidEvent::Keyboard(e) => e.timestamp,
        }
    }

    pub fn event_type(&self) -> u32 {
        match self {
            HidEvent::Digitizer(_) => EVENT_TYPE_DIGITIZER,
            HidEvent::Keyboard(_) => EVENT_TYPE_KEYBOARD,
        }
    }

    pub fn sender_id(&self) -> u64 {
        match self {
            HidEvent::Digitizer(e) => e.sender_id,
            HidEvent::Keyboard(e) => e.sender_id,
        }
    }

    /// Tag the event with a sender credential. Unstamped events are dropped
    /// silently by consumers.
    pub fn stamp(&mut self, sender_id: u64) {
        match self {
            HidEvent::Digitizer(e) => e.sender_id = sender_id,
            HidEvent::Keyboard(e) => e.sender_id = sender_id,
        }
    }

    pub fn is_stamped(&self) -> bool {
        self.sender_id() != 0
    }

    /// Serialize to the wire format written to raw connections
    pub fn to_bytes(&self) -> InjectorResult<Bytes> {
        let encoded = bincode::serialize(self)?;
        Ok(Bytes::from(encoded))
    }

    pub fn from_bytes(data: &[u8]) -> InjectorResult<Self> {
        Ok(bincode::deserialize(data)?)
    }
}

/// One contact of a touch frame and the phase it is in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEntry {
    pub phase: GesturePhase,
    pub contact: Contact,
}

/// All contacts of one instant of a gesture
#[derive(Debug, Clone, PartialEq)]
pub struct TouchFrame {
    pub timestamp: u64,
    pub entries: Vec<FrameEntry>,
}

impl TouchFrame {
    pub fn uniform(timestamp: u64, phase: GesturePhase, contacts: &[Contact]) -> Self {
        Self {
            timestamp,
            entries: contacts
                .iter()
                .map(|&contact| FrameEntry { phase, contact })
                .collect(),
        }
    }

    /// Phase reported for the frame as a whole: any down wins, then any up
    pub fn phase(&self) -> GesturePhase {
        let has = |p| self.entries.iter().any(|e| e.phase == p);
        if has(GesturePhase::Down) {
            GesturePhase::Down
        } else if has(GesturePhase::Up) {
            GesturePhase::Up
        } else {
            GesturePhase::Move
        }
    }

    /// Copy of the frame with every position passed through `f`
    pub fn map_positions(&self, f: impl Fn(f64, f64) -> (f64, f64)) -> TouchFrame {
        TouchFrame {
            timestamp: self.timestamp,
            entries: self
                .entries
                .iter()
                .map(|e| {
                    let (x, y) = f(e.contact.point.x, e.contact.point.y);
                    FrameEntry {
                        phase: e.phase,
                        contact: e.contact.with_position(x, y),
                    }
                })
                .collect(),
        }
    }
}

#[derive(Clone, Copy)]
enum Stage {
    Update,
    RangeTeardown,
}

fn finger_event(entry: &FrameEntry, stage: Stage) -> FingerEvent {
    let (mask, range, touch) = match (entry.phase, stage) {
        (GesturePhase::Down, Stage::Update) => {
            (EventMask::RANGE | EventMask::TOUCH | EventMask::POSITION, true, true)
        }
        (GesturePhase::Move, Stage::Update) => (EventMask::POSITION, true, true),
        (GesturePhase::Up, Stage::Update) => (EventMask::TOUCH, true, false),
        (GesturePhase::Up, Stage::RangeTeardown) => (EventMask::RANGE, false, false),
        // fingers that stay down ride along unchanged
        (_, Stage::RangeTeardown) => (EventMask::empty(), true, true),
    };
    let point = &entry.contact.point;
    FingerEvent {
        index: point.finger,
        identity: entry.contact.identity,
        mask,
        x: point.x,
        y: point.y,
        pressure: if touch { point.pressure } else { 0.0 },
        major_radius: point.major_radius,
        minor_radius: point.minor_radius,
        range,
        touch,
    }
}

fn hand_event(timestamp: u64, children: Vec<FingerEvent>) -> HidEvent {
    let mask = children
        .iter()
        .fold(EventMask::empty(), |acc, child| acc | child.mask);
    HidEvent::Digitizer(DigitizerEvent {
        timestamp,
        sender_id: 0,
        transducer: Transducer::Hand,
        mask,
        range: children.iter().any(|c| c.range),
        touch: children.iter().any(|c| c.touch),
        display_integrated: true,
        children,
    })
}

/// Pure event construction
#[derive(Debug, Clone, Copy)]
pub struct EventCodec {
    library_loaded: bool,
}

impl EventCodec {
    /// `library_loaded` reflects whether the platform event library that
    /// allocates events is present
    pub fn new(library_loaded: bool) -> Self {
        Self { library_loaded }
    }

    pub fn is_available(&self) -> bool {
        self.library_loaded
    }

    fn ensure_loaded(&self, what: &str) -> InjectorResult<()> {
        if self.library_loaded {
            Ok(())
        } else {
            Err(InjectorError::Construction(format!(
                "{what} allocator unavailable: event library not loaded"
            )))
        }
    }

    /// Build the events for one phase applied to every contact
    pub fn build_touch_event(
        &self,
        timestamp: u64,
        phase: GesturePhase,
        contacts: &[Contact],
    ) -> InjectorResult<Vec<HidEvent>> {
        self.build_frame(&TouchFrame::uniform(timestamp, phase, contacts))
    }

    /// Build the events for a frame. Frames that lift a finger yield the
    /// touch-cleared event followed by the range teardown one tick later.
    pub fn build_frame(&self, frame: &TouchFrame) -> InjectorResult<Vec<HidEvent>> {
        self.ensure_loaded("digitizer")?;
        if frame.entries.is_empty() {
            return Err(InjectorError::Construction(
                "touch frame has no contacts".into(),
            ));
        }

        let update = frame
            .entries
            .iter()
            .map(|e| finger_event(e, Stage::Update))
            .collect();
        let mut events = vec![hand_event(frame.timestamp, update)];

        if frame.entries.iter().any(|e| e.phase == GesturePhase::Up) {
            let teardown = frame
                .entries
                .iter()
                .map(|e| finger_event(e, Stage::RangeTeardown))
                .collect();
            events.push(hand_event(frame.timestamp + 1, teardown));
        }
        Ok(events)
    }

    pub fn build_key_event(
        &self,
        timestamp: u64,
        usage_page: u16,
        usage: u16,
        down: bool,
    ) -> InjectorResult<HidEvent> {
        self.ensure_loaded("keyboard")?;
        Ok(HidEvent::Keyboard(KeyboardEvent {
            timestamp,
            sender_id: 0,
            usage_page,
            usage,
            down,
        }))
    }
}
