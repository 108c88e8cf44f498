//! The injector context object
//!
//! `TouchInjector` owns everything that would otherwise be process-wide
//! state: the lazily opened backend handles, the sender credential slot and
//! the dispatch history. Gesture calls block for the length of the gesture.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use touch_protocol::{GestureKind, GestureRequest, InjectionMethod, Point, TouchStep};
use tracing::{debug, info, warn};

use crate::backends::{
    AccessibilityBackend, BackendKind, ConnectionBackend, DeliveryBackend, DirectBusBackend,
    FocusRoutedBackend, LegacyBackend,
};
use crate::codec::EventCodec;
use crate::config::InjectorConfig;
use crate::diagnostics::{Diagnostics, DispatchAttempt, DispatchStats};
use crate::plan::GesturePlanner;
use crate::platform::{Capabilities, Platform, ScreenMetrics};
use crate::router::{Router, RoutingPolicy};
use crate::sender::{
    CredentialSource, CredentialStore, ProxySenderContext, SenderIdentityManager, SenderSettings,
    SenderStatus,
};
use crate::{InjectorError, InjectorResult};

/// Everything a caller may want to know about injector health
#[derive(Debug, Clone, Serialize)]
pub struct HidDiagnostics {
    pub capabilities: Capabilities,
    pub available_backends: Vec<BackendKind>,
    pub screen: ScreenMetrics,
    pub sender: SenderStatus,
    pub proxy_sender_likely_live: bool,
    pub stats: DispatchStats,
    pub last_dispatch: Option<DispatchAttempt>,
    pub recent_dispatches: Vec<DispatchAttempt>,
    pub last_meaningful_dispatch_ms_ago: Option<u64>,
}

pub struct TouchInjector {
    config: InjectorConfig,
    capabilities: Capabilities,
    metrics: ScreenMetrics,
    planner: GesturePlanner,
    sender: Arc<SenderIdentityManager>,
    diagnostics: Arc<Diagnostics>,
    router: Router,
}

impl TouchInjector {
    pub fn new(config: InjectorConfig, platform: Platform) -> Self {
        let capabilities = platform.capabilities();
        let metrics = platform.screen_metrics();
        info!(
            ?capabilities,
            width = metrics.width,
            height = metrics.height,
            scale = metrics.scale,
            "Initializing touch injector"
        );

        let codec = EventCodec::new(capabilities.event_library);
        let store = config.sender_store_path.clone().map(CredentialStore::new);
        let sender = SenderIdentityManager::new(
            SenderSettings::from(&config),
            store,
            platform.registry.clone(),
            platform.event_tap.clone(),
        );
        let diagnostics = Arc::new(Diagnostics::new(config.history_capacity));

        let backends: Vec<Box<dyn DeliveryBackend>> = vec![
            Box::new(DirectBusBackend::new(platform.event_bus.clone(), codec, metrics)),
            Box::new(ConnectionBackend::new(platform.event_bus.clone(), codec, metrics)),
            Box::new(FocusRoutedBackend::new(
                platform.focus.clone(),
                codec,
                metrics,
                config.target_pid,
                config.transient_focus_override,
            )),
            Box::new(LegacyBackend::new(platform.legacy.clone(), metrics)),
            Box::new(AccessibilityBackend::new(platform.accessibility.clone())),
        ];
        let router = Router::new(
            backends,
            Arc::clone(&sender),
            Arc::clone(&diagnostics),
            config.verify_window(),
        );

        Self {
            planner: GesturePlanner::new(&config, metrics),
            config,
            capabilities,
            metrics,
            sender,
            diagnostics,
            router,
        }
    }

    /// Resolve the sender credential now instead of on the first gesture
    pub fn warm_up(&self) {
        self.sender.ensure_initialized();
    }

    pub fn tap(&self, at: Point, method: Option<&str>) -> bool {
        self.perform(GestureKind::Tap { at }, method)
    }

    pub fn double_tap(&self, at: Point, method: Option<&str>) -> bool {
        self.perform(GestureKind::DoubleTap { at }, method)
    }

    pub fn long_press(&self, at: Point, duration: Option<Duration>, method: Option<&str>) -> bool {
        let duration_ms = duration.map(as_millis);
        self.perform(GestureKind::LongPress { at, duration_ms }, method)
    }

    pub fn swipe(
        &self,
        from: Point,
        to: Point,
        duration: Option<Duration>,
        method: Option<&str>,
    ) -> bool {
        let duration_ms = duration.map(as_millis);
        self.perform(GestureKind::Swipe { from, to, duration_ms }, method)
    }

    pub fn drag(
        &self,
        from: Point,
        to: Point,
        duration: Option<Duration>,
        method: Option<&str>,
    ) -> bool {
        let duration_ms = duration.map(as_millis);
        self.perform(GestureKind::Drag { from, to, duration_ms }, method)
    }

    pub fn multi_touch(&self, steps: &[TouchStep], method: Option<&str>) -> bool {
        let steps = steps.to_vec();
        self.perform(GestureKind::MultiTouch { steps }, method)
    }

    /// One key transition on the keyboard usage page
    pub fn send_key_usage(&self, usage: u16, down: bool) -> bool {
        self.perform(GestureKind::Key { usage, down }, None)
    }

    pub fn type_text(&self, text: &str) -> bool {
        let text = text.to_owned();
        self.perform(GestureKind::Text { text }, None)
    }

    pub fn dispatch(&self, request: &GestureRequest) -> bool {
        self.try_dispatch(request).is_ok()
    }

    /// Plan and route a request, returning the backend that carried it
    pub fn try_dispatch(&self, request: &GestureRequest) -> InjectorResult<BackendKind> {
        let gesture = request.kind.name();
        let policy = RoutingPolicy::resolve(request.method, &self.config);
        let plan = match self.planner.plan(&request.kind) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(gesture, error = %e, "Invalid gesture request");
                self.router.refuse(gesture, &e);
                return Err(e);
            }
        };

        debug!(gesture, method = %policy.method, "Dispatching gesture");
        let result = self.router.dispatch(&plan, &policy);
        if let Err(e) = &result {
            debug!(gesture, error = %e, "Gesture not delivered");
        }
        result
    }

    fn perform(&self, kind: GestureKind, method: Option<&str>) -> bool {
        match InjectionMethod::parse_optional(method) {
            Ok(method) => self.dispatch(&GestureRequest::new(kind).with_method(method)),
            Err(e) => {
                let e = InjectorError::from(e);
                warn!(gesture = kind.name(), error = %e, "Rejected injection method");
                self.router.refuse(kind.name(), &e);
                false
            }
        }
    }

    pub fn config(&self) -> &InjectorConfig {
        &self.config
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn screen_metrics(&self) -> ScreenMetrics {
        self.metrics
    }

    /// Backends whose platform channel is present
    pub fn available_backends(&self) -> Vec<BackendKind> {
        self.router.available()
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    /// Up to `limit` most recent attempts, oldest first; zero means all
    pub fn recent_dispatches(&self, limit: usize) -> Vec<DispatchAttempt> {
        self.diagnostics.snapshot(limit)
    }

    pub fn last_dispatch(&self) -> Option<DispatchAttempt> {
        self.diagnostics.last()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.diagnostics.stats()
    }

    pub fn hid_diagnostics(&self) -> HidDiagnostics {
        HidDiagnostics {
            capabilities: self.capabilities,
            available_backends: self.available_backends(),
            screen: self.metrics,
            sender: self.sender.status(),
            proxy_sender_likely_live: self.sender.proxy_sender_likely_live(),
            stats: self.diagnostics.stats(),
            last_dispatch: self.diagnostics.last(),
            recent_dispatches: self.diagnostics.snapshot(0),
            last_meaningful_dispatch_ms_ago: self
                .diagnostics
                .last_meaningful_dispatch()
                .map(|at| as_millis(at.elapsed())),
        }
    }

    pub fn sender(&self) -> &Arc<SenderIdentityManager> {
        &self.sender
    }

    pub fn sender_id(&self) -> u64 {
        self.sender.sender_id()
    }

    pub fn sender_id_captured(&self) -> bool {
        self.sender.sender_id_captured()
    }

    pub fn sender_source(&self) -> CredentialSource {
        self.sender.source()
    }

    pub fn sender_status(&self) -> SenderStatus {
        self.sender.status()
    }

    /// Set (or clear with 0) the sender override
    pub fn set_sender_override(&self, value: u64, persist: bool) -> InjectorResult<()> {
        self.sender.set_override(value, persist)
    }

    pub fn set_proxy_sender_context(&self, context: ProxySenderContext) {
        self.sender.set_proxy_context(context);
    }

    pub fn proxy_sender_likely_live(&self) -> bool {
        self.sender.proxy_sender_likely_live()
    }
}

fn as_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Drop for TouchInjector {
    fn drop(&mut self) {
        self.sender.shutdown();
    }
}

impl std::fmt::Debug for TouchInjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TouchInjector")
            .field("capabilities", &self.capabilities)
            .field("router", &self.router)
            .field("sender", &self.sender)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::Loopback;

    #[test]
    fn test_capabilities_fixed_at_construction() {
        let loopback = Loopback::new();
        let injector = TouchInjector::new(InjectorConfig::default(), loopback.platform());
        assert!(injector.capabilities().event_bus);
        assert_eq!(injector.available_backends(), BackendKind::PRIORITY.to_vec());
    }

    #[test]
    fn test_unknown_method_is_recorded() {
        let injector = TouchInjector::new(InjectorConfig::default(), Loopback::new().platform());
        assert!(!injector.tap(Point::new(1.0, 1.0), Some("teleport")));

        let last = injector.last_dispatch().unwrap();
        assert_eq!(last.gesture, "tap");
        assert_eq!(last.backend, None);
        assert_eq!(last.failure, Some(crate::FailureKind::InvalidRequest));
    }

    #[test]
    fn test_hid_diagnostics_serializes() {
        let injector = TouchInjector::new(InjectorConfig::default(), Loopback::new().platform());
        assert!(injector.tap(Point::new(10.0, 10.0), None));

        let json = serde_json::to_value(injector.hid_diagnostics()).unwrap();
        assert_eq!(json["stats"]["successes"], 2);
        assert_eq!(json["last_dispatch"]["backend"], "sim");
        assert_eq!(json["sender"]["fallback_enabled"], true);
    }
}
