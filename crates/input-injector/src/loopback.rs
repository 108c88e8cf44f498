//! In-memory platform
//!
//! Implements every platform channel in memory and records whatever is handed
//! to it. Each channel can be switched to fail, so fallback, degraded and
//! verification behavior can be driven without a host OS.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::trace;

use crate::backends::{AxTouchEvent, BackendKind, LegacyTouchEvent};
use crate::codec::HidEvent;
use crate::platform::{
    AccessibilityPoster, EventBus, EventSystemClient, EventTap, FocusRouter, LegacyPoster,
    ObservedEvent, Platform, RawConnection, RouteReceipt, ScreenInfo, ScreenMetrics,
    SenderRegistry,
};
use crate::{InjectorError, InjectorResult};

/// Process id reported as frontmost unless changed
pub const DEFAULT_FRONTMOST_PID: i32 = 4242;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChannelMode {
    #[default]
    Working,
    /// Channel missing from the platform; calls fail as unavailable
    Unavailable,
    /// Calls fail as rejected deliveries
    Rejecting,
    /// Focus router only: sends succeed but reach no consumer
    Unrouted,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Hid(HidEvent),
    Legacy(LegacyTouchEvent),
    Accessibility(AxTouchEvent),
}

/// One event handed to a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub backend: BackendKind,
    pub target_pid: Option<i32>,
    pub payload: Payload,
}

impl Delivered {
    pub fn hid(&self) -> Option<&HidEvent> {
        match &self.payload {
            Payload::Hid(event) => Some(event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusChange {
    Set(i32),
    Cleared(i32),
}

#[derive(Default)]
struct Inner {
    modes: Mutex<HashMap<BackendKind, ChannelMode>>,
    delivered: Mutex<Vec<Delivered>>,
    focus_changes: Mutex<Vec<FocusChange>>,
    frontmost_pid: Mutex<Option<i32>>,
    registry_value: Mutex<Option<u64>>,
    metrics: Mutex<ScreenMetrics>,
    tap: Mutex<Option<Sender<ObservedEvent>>>,
    client_opens: AtomicUsize,
    connection_opens: AtomicUsize,
    unsubscribes: AtomicUsize,
}

/// Recording platform. Clones share state.
#[derive(Clone)]
pub struct Loopback {
    inner: Arc<Inner>,
}

impl Default for Loopback {
    fn default() -> Self {
        Self::new()
    }
}

impl Loopback {
    pub fn new() -> Self {
        let inner = Inner::default();
        *inner.frontmost_pid.lock() = Some(DEFAULT_FRONTMOST_PID);
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn set_mode(&self, backend: BackendKind, mode: ChannelMode) {
        self.inner.modes.lock().insert(backend, mode);
    }

    pub fn mode(&self, backend: BackendKind) -> ChannelMode {
        self.inner
            .modes
            .lock()
            .get(&backend)
            .copied()
            .unwrap_or_default()
    }

    pub fn set_frontmost_pid(&self, pid: Option<i32>) {
        *self.inner.frontmost_pid.lock() = pid;
    }

    /// Value the registry probe reports from now on
    pub fn set_registry_value(&self, value: Option<u64>) {
        *self.inner.registry_value.lock() = value;
    }

    pub fn set_screen_metrics(&self, metrics: ScreenMetrics) {
        *self.inner.metrics.lock() = metrics;
    }

    /// Platform exposing every channel not marked unavailable. The event bus
    /// stays present while either of its two paths is usable.
    pub fn platform(&self) -> Platform {
        let present = |kind| self.mode(kind) != ChannelMode::Unavailable;
        let this = Arc::new(self.clone());
        let bus_present = present(BackendKind::DirectBus) || present(BackendKind::Connection);

        Platform {
            event_bus: bus_present.then(|| Arc::clone(&this) as Arc<dyn EventBus>),
            legacy: present(BackendKind::Legacy)
                .then(|| Arc::clone(&this) as Arc<dyn LegacyPoster>),
            focus: present(BackendKind::FocusRouted)
                .then(|| Arc::clone(&this) as Arc<dyn FocusRouter>),
            accessibility: present(BackendKind::Accessibility)
                .then(|| Arc::clone(&this) as Arc<dyn AccessibilityPoster>),
            screen: Some(Arc::clone(&this) as Arc<dyn ScreenInfo>),
            registry: Some(Arc::clone(&this) as Arc<dyn SenderRegistry>),
            event_tap: Some(this as Arc<dyn EventTap>),
        }
    }

    /// Feed an event to the capture listener. False if nobody is listening.
    pub fn emit_observed(&self, event: ObservedEvent) -> bool {
        match &*self.inner.tap.lock() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.inner.tap.lock().is_some()
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.inner.unsubscribes.load(Ordering::Acquire)
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.inner.delivered.lock().clone()
    }

    pub fn delivered_by(&self, backend: BackendKind) -> Vec<Delivered> {
        self.inner
            .delivered
            .lock()
            .iter()
            .filter(|d| d.backend == backend)
            .cloned()
            .collect()
    }

    /// HID events handed to `backend`, in order
    pub fn hid_events(&self, backend: BackendKind) -> Vec<HidEvent> {
        self.delivered_by(backend)
            .into_iter()
            .filter_map(|d| match d.payload {
                Payload::Hid(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    pub fn focus_changes(&self) -> Vec<FocusChange> {
        self.inner.focus_changes.lock().clone()
    }

    pub fn client_opens(&self) -> usize {
        self.inner.client_opens.load(Ordering::Acquire)
    }

    pub fn connection_opens(&self) -> usize {
        self.inner.connection_opens.load(Ordering::Acquire)
    }

    pub fn clear_delivered(&self) {
        self.inner.delivered.lock().clear();
        self.inner.focus_changes.lock().clear();
    }

    fn check(&self, backend: BackendKind) -> InjectorResult<ChannelMode> {
        match self.mode(backend) {
            ChannelMode::Unavailable => Err(InjectorError::BackendUnavailable(format!(
                "loopback {backend} unavailable"
            ))),
            ChannelMode::Rejecting => Err(InjectorError::DeliveryRejected(format!(
                "loopback {backend} rejected the event"
            ))),
            mode => Ok(mode),
        }
    }

    fn push(&self, backend: BackendKind, target_pid: Option<i32>, payload: Payload) {
        trace!(%backend, ?target_pid, "Loopback delivery");
        self.inner.delivered.lock().push(Delivered {
            backend,
            target_pid,
            payload,
        });
    }
}

impl EventBus for Loopback {
    fn open_client(&self) -> InjectorResult<Arc<dyn EventSystemClient>> {
        self.inner.client_opens.fetch_add(1, Ordering::AcqRel);
        if self.mode(BackendKind::DirectBus) == ChannelMode::Unavailable {
            return Err(InjectorError::BackendUnavailable("client not activated".into()));
        }
        Ok(Arc::new(self.clone()))
    }

    fn open_connection(&self) -> InjectorResult<Arc<dyn RawConnection>> {
        self.inner.connection_opens.fetch_add(1, Ordering::AcqRel);
        if self.mode(BackendKind::Connection) == ChannelMode::Unavailable {
            return Err(InjectorError::BackendUnavailable("no connection handle".into()));
        }
        Ok(Arc::new(self.clone()))
    }
}

impl EventSystemClient for Loopback {
    fn dispatch(&self, event: &HidEvent) -> InjectorResult<()> {
        self.check(BackendKind::DirectBus)?;
        self.push(BackendKind::DirectBus, None, Payload::Hid(event.clone()));
        Ok(())
    }
}

impl RawConnection for Loopback {
    fn write(&self, frame: Bytes) -> InjectorResult<()> {
        self.check(BackendKind::Connection)?;
        let event = HidEvent::from_bytes(&frame)?;
        self.push(BackendKind::Connection, None, Payload::Hid(event));
        Ok(())
    }
}

impl LegacyPoster for Loopback {
    fn post(&self, event: &LegacyTouchEvent) -> InjectorResult<()> {
        self.check(BackendKind::Legacy)?;
        self.push(BackendKind::Legacy, None, Payload::Legacy(event.clone()));
        Ok(())
    }
}

impl FocusRouter for Loopback {
    fn frontmost_pid(&self) -> Option<i32> {
        *self.inner.frontmost_pid.lock()
    }

    fn set_focus_override(&self, pid: i32) -> InjectorResult<()> {
        self.check(BackendKind::FocusRouted)?;
        self.inner.focus_changes.lock().push(FocusChange::Set(pid));
        Ok(())
    }

    fn clear_focus_override(&self, pid: i32) {
        self.inner.focus_changes.lock().push(FocusChange::Cleared(pid));
    }

    fn send(&self, pid: i32, event: &HidEvent) -> InjectorResult<RouteReceipt> {
        let mode = self.check(BackendKind::FocusRouted)?;
        self.push(BackendKind::FocusRouted, Some(pid), Payload::Hid(event.clone()));
        Ok(RouteReceipt {
            target_pid: pid,
            routed: mode != ChannelMode::Unrouted,
        })
    }
}

impl AccessibilityPoster for Loopback {
    fn post(&self, event: &AxTouchEvent) -> InjectorResult<()> {
        self.check(BackendKind::Accessibility)?;
        self.push(
            BackendKind::Accessibility,
            None,
            Payload::Accessibility(event.clone()),
        );
        Ok(())
    }
}

impl ScreenInfo for Loopback {
    fn metrics(&self) -> ScreenMetrics {
        *self.inner.metrics.lock()
    }
}

impl SenderRegistry for Loopback {
    fn probe_sender_id(&self) -> Option<u64> {
        *self.inner.registry_value.lock()
    }
}

impl EventTap for Loopback {
    fn subscribe(&self) -> InjectorResult<Receiver<ObservedEvent>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        *self.inner.tap.lock() = Some(tx);
        Ok(rx)
    }

    fn unsubscribe(&self) {
        if self.inner.tap.lock().take().is_some() {
            self.inner.unsubscribes.fetch_add(1, Ordering::AcqRel);
        }
    }
}

impl std::fmt::Debug for Loopback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loopback")
            .field("modes", &*self.inner.modes.lock())
            .field("delivered", &self.inner.delivered.lock().len())
            .finish()
    }
}
