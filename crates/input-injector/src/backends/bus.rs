//! Event-bus backends: client dispatch and raw connection writes

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use super::{
    BackendKind, Delivery, DeliveryBackend, DeliveryContext, KeyTransition, stamped_key_event,
    stamped_touch_events,
};
use crate::codec::{EventCodec, HidEvent, TouchFrame};
use crate::platform::{EventBus, EventSystemClient, RawConnection, ScreenMetrics};
use crate::{InjectorError, InjectorResult};

enum HandleState<T: ?Sized> {
    Pending,
    Ready(Arc<T>),
    Failed(String),
}

/// Init-once handle. The first caller opens it; a failed open is remembered
/// so later callers fail fast instead of retrying the platform.
struct LazyHandle<T: ?Sized> {
    state: Mutex<HandleState<T>>,
}

impl<T: ?Sized> LazyHandle<T> {
    fn new() -> Self {
        Self {
            state: Mutex::new(HandleState::Pending),
        }
    }

    fn get_or_open(
        &self,
        what: &str,
        open: impl FnOnce() -> InjectorResult<Arc<T>>,
    ) -> InjectorResult<Arc<T>> {
        let mut state = self.state.lock();
        match &*state {
            HandleState::Ready(handle) => return Ok(Arc::clone(handle)),
            HandleState::Failed(reason) => {
                return Err(InjectorError::BackendUnavailable(reason.clone()));
            }
            HandleState::Pending => {}
        }
        match open() {
            Ok(handle) => {
                info!("Opened event system {what}");
                *state = HandleState::Ready(Arc::clone(&handle));
                Ok(handle)
            }
            Err(e) => {
                let reason = format!("{what} unavailable: {e}");
                warn!(%reason, "Event system open failed");
                *state = HandleState::Failed(reason.clone());
                Err(InjectorError::BackendUnavailable(reason))
            }
        }
    }
}

/// Hands events straight to the process-wide event-system client
pub struct DirectBusBackend {
    bus: Option<Arc<dyn EventBus>>,
    client: LazyHandle<dyn EventSystemClient>,
    codec: EventCodec,
    metrics: ScreenMetrics,
}

impl DirectBusBackend {
    pub fn new(bus: Option<Arc<dyn EventBus>>, codec: EventCodec, metrics: ScreenMetrics) -> Self {
        Self {
            bus,
            client: LazyHandle::new(),
            codec,
            metrics,
        }
    }

    fn client(&self) -> InjectorResult<Arc<dyn EventSystemClient>> {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| InjectorError::BackendUnavailable("no event bus".into()))?;
        self.client.get_or_open("client", || bus.open_client())
    }

    /// Dispatch one already-stamped event
    pub fn deliver(&self, event: &HidEvent) -> InjectorResult<()> {
        self.client()?.dispatch(event)
    }
}

impl DeliveryBackend for DirectBusBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DirectBus
    }

    fn is_available(&self) -> bool {
        self.bus.is_some() && self.codec.is_available()
    }

    fn supports_keys(&self) -> bool {
        true
    }

    fn deliver_touch(&self, frame: &TouchFrame, ctx: &DeliveryContext) -> InjectorResult<Delivery> {
        for event in stamped_touch_events(&self.codec, &self.metrics, frame, ctx)? {
            self.deliver(&event)?;
        }
        Ok(Delivery::default())
    }

    fn deliver_key(
        &self,
        timestamp: u64,
        key: KeyTransition,
        ctx: &DeliveryContext,
    ) -> InjectorResult<Delivery> {
        self.deliver(&stamped_key_event(&self.codec, timestamp, key, ctx)?)?;
        Ok(Delivery::default())
    }
}

/// Writes serialized events to a raw connection, bypassing the client
pub struct ConnectionBackend {
    bus: Option<Arc<dyn EventBus>>,
    connection: LazyHandle<dyn RawConnection>,
    codec: EventCodec,
    metrics: ScreenMetrics,
}

impl ConnectionBackend {
    pub fn new(bus: Option<Arc<dyn EventBus>>, codec: EventCodec, metrics: ScreenMetrics) -> Self {
        Self {
            bus,
            connection: LazyHandle::new(),
            codec,
            metrics,
        }
    }

    fn connection(&self) -> InjectorResult<Arc<dyn RawConnection>> {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| InjectorError::BackendUnavailable("no event bus".into()))?;
        self.connection
            .get_or_open("connection", || bus.open_connection())
    }

    pub fn deliver(&self, event: &HidEvent) -> InjectorResult<()> {
        let frame = event.to_bytes()?;
        self.connection()?.write(frame)
    }
}

impl DeliveryBackend for ConnectionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Connection
    }

    fn is_available(&self) -> bool {
        self.bus.is_some() && self.codec.is_available()
    }

    fn supports_keys(&self) -> bool {
        true
    }

    fn deliver_touch(&self, frame: &TouchFrame, ctx: &DeliveryContext) -> InjectorResult<Delivery> {
        for event in stamped_touch_events(&self.codec, &self.metrics, frame, ctx)? {
            self.deliver(&event)?;
        }
        Ok(Delivery::default())
    }

    fn deliver_key(
        &self,
        timestamp: u64,
        key: KeyTransition,
        ctx: &DeliveryContext,
    ) -> InjectorResult<Delivery> {
        self.deliver(&stamped_key_event(&self.codec, timestamp, key, ctx)?)?;
        Ok(Delivery::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_lazy_handle_opens_once() {
        let handle: LazyHandle<str> = LazyHandle::new();
        let opens = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = handle
                .get_or_open("test", || {
                    opens.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::from("client"))
                })
                .unwrap();
            assert_eq!(&*value, "client");
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_handle_remembers_failure() {
        let handle: LazyHandle<str> = LazyHandle::new();
        let opens = AtomicUsize::new(0);
        for _ in 0..2 {
            let result = handle.get_or_open("test", || {
                opens.fetch_add(1, Ordering::SeqCst);
                Err(InjectorError::Internal("boom".into()))
            });
            assert!(matches!(result, Err(InjectorError::BackendUnavailable(_))));
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_bus_unavailable() {
        let backend = DirectBusBackend::new(None, EventCodec::new(true), ScreenMetrics::default());
        assert!(!backend.is_available());
        assert!(matches!(
            backend.client(),
            Err(InjectorError::BackendUnavailable(_))
        ));
    }
}
