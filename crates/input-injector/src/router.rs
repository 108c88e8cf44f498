//! Strategy router
//!
//! Replays a plan on each permitted backend in priority order until one of
//! them completes every phase. A backend either carries the whole gesture or
//! none of it: events from two backends are never mixed in one gesture.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use touch_protocol::{GesturePhase, InjectionMethod};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backends::{
    BackendKind, Corroboration, Delivery, DeliveryBackend, DeliveryContext, KeyTransition,
};
use crate::clock::Pacer;
use crate::codec::TouchFrame;
use crate::config::InjectorConfig;
use crate::diagnostics::{Diagnostics, DispatchAttempt};
use crate::plan::{KeyPlan, Plan, TouchPlan};
use crate::sender::{SenderCredential, SenderIdentityManager};
use crate::session::MultiTouchSession;
use crate::{InjectorError, InjectorResult};

/// Backends permitted for one request, resolved once at request entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoutingPolicy {
    /// Method after `auto` was resolved against the configured default
    pub method: InjectionMethod,
    pub want_direct_bus: bool,
    pub want_connection: bool,
    pub want_focus_routed: bool,
    pub want_legacy: bool,
    pub want_accessibility: bool,
    pub allow_fallback: bool,
    pub reject_unverified: bool,
}

impl RoutingPolicy {
    pub fn resolve(requested: InjectionMethod, config: &InjectorConfig) -> Self {
        let method = match requested {
            InjectionMethod::Auto => config.method,
            other => other,
        };
        let mut policy = Self {
            method,
            want_direct_bus: false,
            want_connection: false,
            want_focus_routed: false,
            want_legacy: false,
            want_accessibility: false,
            allow_fallback: false,
            reject_unverified: config.reject_unverified,
        };

        match BackendKind::from_method(method) {
            // an explicit backend is used even if disabled for auto/all
            Some(kind) => policy.set(kind),
            None => {
                for kind in BackendKind::PRIORITY {
                    if !config.disabled_backends.contains(&kind) {
                        policy.set(kind);
                    }
                }
                policy.allow_fallback = method == InjectionMethod::All || config.allow_fallback;
            }
        }
        policy
    }

    fn set(&mut self, kind: BackendKind) {
        match kind {
            BackendKind::DirectBus => self.want_direct_bus = true,
            BackendKind::Connection => self.want_connection = true,
            BackendKind::FocusRouted => self.want_focus_routed = true,
            BackendKind::Legacy => self.want_legacy = true,
            BackendKind::Accessibility => self.want_accessibility = true,
        }
    }

    pub fn wants(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::DirectBus => self.want_direct_bus,
            BackendKind::Connection => self.want_connection,
            BackendKind::FocusRouted => self.want_focus_routed,
            BackendKind::Legacy => self.want_legacy,
            BackendKind::Accessibility => self.want_accessibility,
        }
    }

    /// Permitted backends in priority order
    pub fn backends(&self) -> Vec<BackendKind> {
        BackendKind::PRIORITY
            .into_iter()
            .filter(|&kind| self.wants(kind))
            .collect()
    }

    /// Successes must be corroborated before they count
    pub fn is_strict(&self) -> bool {
        self.reject_unverified && self.method.is_strict()
    }
}

pub struct Router {
    backends: Vec<Box<dyn DeliveryBackend>>,
    sender: Arc<SenderIdentityManager>,
    diagnostics: Arc<Diagnostics>,
    verify_window: Duration,
}

impl Router {
    pub fn new(
        backends: Vec<Box<dyn DeliveryBackend>>,
        sender: Arc<SenderIdentityManager>,
        diagnostics: Arc<Diagnostics>,
        verify_window: Duration,
    ) -> Self {
        Self {
            backends,
            sender,
            diagnostics,
            verify_window,
        }
    }

    pub fn backend(&self, kind: BackendKind) -> Option<&dyn DeliveryBackend> {
        self.backends
            .iter()
            .find(|b| b.kind() == kind)
            .map(|b| b.as_ref())
    }

    /// Backends whose platform channel is present
    pub fn available(&self) -> Vec<BackendKind> {
        BackendKind::PRIORITY
            .into_iter()
            .filter(|&kind| self.backend(kind).is_some_and(|b| b.is_available()))
            .collect()
    }

    /// Deliver a plan. Returns the backend that carried it.
    pub fn dispatch(&self, plan: &Plan, policy: &RoutingPolicy) -> InjectorResult<BackendKind> {
        let gesture_id = Uuid::new_v4();
        match plan {
            Plan::Touch(touch) => {
                let candidates = self.candidates(policy, false);
                self.route(gesture_id, touch.gesture, policy, candidates, |backend, ctx| {
                    self.play_touch(gesture_id, touch, backend, ctx)
                })
            }
            Plan::Keys(keys) => {
                let candidates = self.candidates(policy, true);
                self.route(gesture_id, keys.gesture, policy, candidates, |backend, ctx| {
                    self.play_keys(gesture_id, keys, backend, ctx)
                })
            }
        }
    }

    /// Record a request refused before any backend was chosen
    pub fn refuse(&self, gesture: &'static str, error: &InjectorError) {
        self.refuse_gesture(Uuid::new_v4(), gesture, error);
    }

    fn refuse_gesture(&self, gesture_id: Uuid, gesture: &'static str, error: &InjectorError) {
        self.diagnostics.record(DispatchAttempt::failed(
            gesture_id,
            gesture,
            None,
            GesturePhase::Down,
            None,
            error,
        ));
    }

    fn candidates(&self, policy: &RoutingPolicy, keys: bool) -> Vec<&dyn DeliveryBackend> {
        policy
            .backends()
            .into_iter()
            .filter_map(|kind| self.backend(kind))
            .filter(|b| !keys || b.supports_keys())
            .collect()
    }

    fn route<F>(
        &self,
        gesture_id: Uuid,
        gesture: &'static str,
        policy: &RoutingPolicy,
        candidates: Vec<&dyn DeliveryBackend>,
        mut play: F,
    ) -> InjectorResult<BackendKind>
    where
        F: FnMut(&dyn DeliveryBackend, &DeliveryContext) -> InjectorResult<()>,
    {
        if candidates.is_empty() {
            let error = InjectorError::BackendUnavailable(format!(
                "no backend for {gesture} permitted by method {}",
                policy.method
            ));
            self.refuse_gesture(gesture_id, gesture, &error);
            return Err(error);
        }

        let sender = self.sender.current();
        if sender.is_none() && candidates.iter().any(|b| b.requires_sender()) {
            warn!(gesture, method = %policy.method, "No sender credential, refusing delivery");
            let error = InjectorError::DegradedCredential;
            self.refuse_gesture(gesture_id, gesture, &error);
            return Err(error);
        }

        let mut last_error = None;
        for backend in candidates {
            let kind = backend.kind();
            match self.attempt(gesture_id, gesture, policy, backend, sender, &mut play) {
                Ok(()) => {
                    debug!(gesture, backend = %kind, "Gesture delivered");
                    return Ok(kind);
                }
                Err(e) if !e.is_recoverable() || !policy.allow_fallback => return Err(e),
                Err(e) => {
                    warn!(gesture, backend = %kind, error = %e, "Backend failed, trying next");
                    last_error = Some(e);
                }
            }
        }

        info!(gesture, method = %policy.method, "Every permitted backend failed");
        Err(last_error.unwrap_or_else(|| {
            InjectorError::Internal("fallback ended without an attempt".into())
        }))
    }

    /// Run a whole gesture on one backend
    fn attempt<F>(
        &self,
        gesture_id: Uuid,
        gesture: &'static str,
        policy: &RoutingPolicy,
        backend: &dyn DeliveryBackend,
        sender: Option<SenderCredential>,
        play: &mut F,
    ) -> InjectorResult<()>
    where
        F: FnMut(&dyn DeliveryBackend, &DeliveryContext) -> InjectorResult<()>,
    {
        let kind = backend.kind();
        let fail = |error: InjectorError, phase, target_pid| {
            self.diagnostics.record(DispatchAttempt::failed(
                gesture_id,
                gesture,
                Some(kind),
                phase,
                target_pid,
                &error,
            ));
            Err(error)
        };

        if !backend.is_available() {
            let error = InjectorError::BackendUnavailable(format!("{kind} channel not present"));
            return fail(error, GesturePhase::Down, None);
        }

        let strict = policy.is_strict();
        if strict
            && backend.corroboration() == Corroboration::CapturedSender
            && !sender.is_some_and(|c| c.captured)
        {
            warn!(gesture, backend = %kind, "Sender not captured, refusing unverified delivery");
            return fail(InjectorError::DegradedCredential, GesturePhase::Down, None);
        }

        let ctx = match backend.prepare(sender) {
            Ok(ctx) => ctx,
            Err(error) => return fail(error, GesturePhase::Down, None),
        };
        let started = Instant::now();
        let outcome = play(backend, &ctx);
        backend.finish(&ctx);
        outcome?;

        if strict
            && backend.corroboration() == Corroboration::RoutedDispatch
            && !self
                .diagnostics
                .meaningful_dispatch_since(started, self.verify_window)
        {
            let error = InjectorError::DeliveryRejected(format!(
                "no routed dispatch within {}ms",
                self.verify_window.as_millis()
            ));
            return fail(error, GesturePhase::Up, ctx.target_pid);
        }
        Ok(())
    }

    fn play_touch(
        &self,
        gesture_id: Uuid,
        plan: &TouchPlan,
        backend: &dyn DeliveryBackend,
        ctx: &DeliveryContext,
    ) -> InjectorResult<()> {
        let kind = backend.kind();
        let mut session = MultiTouchSession::new();
        let mut pacer = Pacer::start();

        for frame in &plan.frames {
            pacer.wait_until(frame.offset);
            let phase = frame.phase();

            // commit only once the backend took the frame
            let mut next = session.clone();
            let delivered = frame.apply(&mut next).and_then(|entries| {
                let touch = TouchFrame {
                    timestamp: pacer.next_timestamp(),
                    entries,
                };
                backend.deliver_touch(&touch, ctx)
            });

            match delivered {
                Ok(delivery) => {
                    session = next;
                    self.note_delivery(gesture_id, plan.gesture, kind, phase, ctx, delivery);
                }
                Err(error) => {
                    self.diagnostics.record(DispatchAttempt::failed(
                        gesture_id,
                        plan.gesture,
                        Some(kind),
                        phase,
                        ctx.target_pid,
                        &error,
                    ));
                    if !session.is_empty() {
                        self.lift_all(
                            gesture_id,
                            plan.gesture,
                            backend,
                            ctx,
                            &mut session,
                            &mut pacer,
                        );
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Best-effort Up for fingers left down by a failed gesture
    fn lift_all(
        &self,
        gesture_id: Uuid,
        gesture: &'static str,
        backend: &dyn DeliveryBackend,
        ctx: &DeliveryContext,
        session: &mut MultiTouchSession,
        pacer: &mut Pacer,
    ) {
        let kind = backend.kind();
        let lifted: Vec<_> = session
            .active_fingers()
            .into_iter()
            .filter_map(|finger| session.lift(finger, None).ok())
            .collect();
        let frame = TouchFrame::uniform(pacer.next_timestamp(), GesturePhase::Up, &lifted);

        match backend.deliver_touch(&frame, ctx) {
            Ok(delivery) => {
                debug!(gesture, backend = %kind, fingers = lifted.len(), "Lifted stranded fingers");
                self.note_delivery(gesture_id, gesture, kind, GesturePhase::Up, ctx, delivery);
            }
            Err(error) => {
                warn!(gesture, backend = %kind, error = %error, "Cleanup lift failed");
                self.diagnostics.record(DispatchAttempt::failed(
                    gesture_id,
                    gesture,
                    Some(kind),
                    GesturePhase::Up,
                    ctx.target_pid,
                    &error,
                ));
            }
        }
    }

    fn play_keys(
        &self,
        gesture_id: Uuid,
        plan: &KeyPlan,
        backend: &dyn DeliveryBackend,
        ctx: &DeliveryContext,
    ) -> InjectorResult<()> {
        let kind = backend.kind();
        let mut pacer = Pacer::start();
        let mut held: Vec<KeyTransition> = Vec::new();

        for planned in &plan.keys {
            pacer.wait_until(planned.offset);
            let key = planned.key;
            let phase = key_phase(key);

            match backend.deliver_key(pacer.next_timestamp(), key, ctx) {
                Ok(delivery) => {
                    if key.down {
                        held.push(key);
                    } else {
                        held.retain(|k| k.usage != key.usage || k.usage_page != key.usage_page);
                    }
                    self.note_delivery(gesture_id, plan.gesture, kind, phase, ctx, delivery);
                }
                Err(error) => {
                    self.diagnostics.record(DispatchAttempt::failed(
                        gesture_id,
                        plan.gesture,
                        Some(kind),
                        phase,
                        ctx.target_pid,
                        &error,
                    ));
                    for key in held.into_iter().rev() {
                        let release = KeyTransition { down: false, ..key };
                        if let Err(e) = backend.deliver_key(pacer.next_timestamp(), release, ctx) {
                            warn!(
                                backend = %kind,
                                usage = key.usage,
                                error = %e,
                                "Key release failed"
                            );
                        }
                    }
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    fn note_delivery(
        &self,
        gesture_id: Uuid,
        gesture: &'static str,
        kind: BackendKind,
        phase: GesturePhase,
        ctx: &DeliveryContext,
        delivery: Delivery,
    ) {
        match delivery.routed {
            Some(true) => self.diagnostics.record_meaningful_dispatch(),
            Some(false) => {
                debug!(gesture, backend = %kind, %phase, "Dispatch not routed to a consumer")
            }
            None => {}
        }
        debug!(gesture, backend = %kind, %phase, "Phase dispatched");
        self.diagnostics.record(DispatchAttempt::succeeded(
            gesture_id,
            gesture,
            kind,
            phase,
            delivery.target_pid.or(ctx.target_pid),
        ));
    }
}

fn key_phase(key: KeyTransition) -> GesturePhase {
    if key.down {
        GesturePhase::Down
    } else {
        GesturePhase::Up
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("available", &self.available())
            .field("verify_window", &self.verify_window)
            .finish()
    }
}
