//! Focus-routed delivery through the window/application router

use std::sync::Arc;

use tracing::{debug, warn};

use super::{
    BackendKind, Corroboration, Delivery, DeliveryBackend, DeliveryContext, KeyTransition,
    stamped_key_event, stamped_touch_events,
};
use crate::codec::{EventCodec, HidEvent, TouchFrame};
use crate::platform::{FocusRouter, ScreenMetrics};
use crate::sender::SenderCredential;
use crate::{InjectorError, InjectorResult};

pub struct FocusRoutedBackend {
    router: Option<Arc<dyn FocusRouter>>,
    codec: EventCodec,
    metrics: ScreenMetrics,
    /// Fixed target; otherwise the frontmost application is asked for
    target_pid: Option<i32>,
    transient_override: bool,
}

impl FocusRoutedBackend {
    pub fn new(
        router: Option<Arc<dyn FocusRouter>>,
        codec: EventCodec,
        metrics: ScreenMetrics,
        target_pid: Option<i32>,
        transient_override: bool,
    ) -> Self {
        Self {
            router,
            codec,
            metrics,
            target_pid,
            transient_override,
        }
    }

    fn router(&self) -> InjectorResult<&Arc<dyn FocusRouter>> {
        self.router
            .as_ref()
            .ok_or_else(|| InjectorError::BackendUnavailable("no focus router".into()))
    }

    /// Send events to the target resolved in `ctx`. The result is routed only
    /// if every event reached a live consumer.
    pub fn deliver(&self, events: &[HidEvent], ctx: &DeliveryContext) -> InjectorResult<Delivery> {
        let router = self.router()?;
        let pid = ctx.target_pid.ok_or_else(|| {
            InjectorError::BackendUnavailable("focus target not resolved".into())
        })?;

        let mut routed = true;
        for event in events {
            let receipt = router.send(pid, event)?;
            routed &= receipt.routed;
        }
        Ok(Delivery {
            target_pid: Some(pid),
            routed: Some(routed),
        })
    }
}

impl DeliveryBackend for FocusRoutedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::FocusRouted
    }

    fn is_available(&self) -> bool {
        self.router.is_some() && self.codec.is_available()
    }

    fn supports_keys(&self) -> bool {
        true
    }

    fn corroboration(&self) -> Corroboration {
        Corroboration::RoutedDispatch
    }

    fn prepare(&self, sender: Option<SenderCredential>) -> InjectorResult<DeliveryContext> {
        let router = self.router()?;
        let pid = self
            .target_pid
            .or_else(|| router.frontmost_pid())
            .ok_or_else(|| {
                InjectorError::BackendUnavailable("no frontmost application".into())
            })?;

        let mut ctx = DeliveryContext::new(sender);
        ctx.target_pid = Some(pid);
        if self.transient_override {
            router.set_focus_override(pid)?;
            ctx.focus_override = Some(pid);
            debug!(pid, "Focus override applied");
        }
        Ok(ctx)
    }

    fn deliver_touch(&self, frame: &TouchFrame, ctx: &DeliveryContext) -> InjectorResult<Delivery> {
        let events = stamped_touch_events(&self.codec, &self.metrics, frame, ctx)?;
        self.deliver(&events, ctx)
    }

    fn deliver_key(
        &self,
        timestamp: u64,
        key: KeyTransition,
        ctx: &DeliveryContext,
    ) -> InjectorResult<Delivery> {
        let event = stamped_key_event(&self.codec, timestamp, key, ctx)?;
        self.deliver(std::slice::from_ref(&event), ctx)
    }

    fn finish(&self, ctx: &DeliveryContext) {
        let Some(pid) = ctx.focus_override else {
            return;
        };
        match &self.router {
            Some(router) => {
                router.clear_focus_override(pid);
                debug!(pid, "Focus override restored");
            }
            None => warn!(pid, "Focus override set without a router"),
        }
    }
}
