//! Sender identity management
//!
//! Consumers only honor events tagged with the sender credential of a trusted
//! input source. The credential is learned rather than known: from an explicit
//! override, a persisted value, a registry probe, or by watching live digitizer
//! traffic on a background thread. When none of those succeed a well-known
//! fallback constant can be used, but some consumers drop events bearing it,
//! so callers can check `sender_id_captured()` to detect degraded operation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::{Mutex, Once};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::codec::EVENT_TYPE_DIGITIZER;
use crate::platform::{EventTap, ObservedEvent, SenderRegistry};
use crate::{InjectorConfig, InjectorError, InjectorResult};

/// Sender used when nothing better is known
pub const FALLBACK_SENDER_ID: u64 = 0xDEFA_CEDB_EEFF_ECE5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialSource {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "ioreg")]
    RegistryProbe,
    #[serde(rename = "callback")]
    CallbackCapture,
    #[serde(rename = "persisted")]
    Persisted,
    #[serde(rename = "override")]
    Override,
}

impl CredentialSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialSource::None => "none",
            CredentialSource::RegistryProbe => "ioreg",
            CredentialSource::CallbackCapture => "callback",
            CredentialSource::Persisted => "persisted",
            CredentialSource::Override => "override",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SenderCredential {
    pub value: u64,
    /// Learned from a live or persisted source rather than the fallback constant
    pub captured: bool,
    pub source: CredentialSource,
}

impl SenderCredential {
    pub fn fallback(value: u64) -> Self {
        Self {
            value,
            captured: false,
            source: CredentialSource::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SenderState {
    Unresolved,
    Probing,
    Captured,
    PersistedLoaded,
    Overridden,
}

/// Sender context reported by a proxy running inside a trusted process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProxySenderContext {
    pub sender_id: u64,
    pub captured: bool,
    pub digitizer_count: u32,
    pub source: Option<String>,
}

impl ProxySenderContext {
    pub fn likely_live(&self) -> bool {
        self.captured || self.digitizer_count > 0
    }
}

/// Serializable view of the manager for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct SenderStatus {
    pub state: SenderState,
    pub sender_id: u64,
    pub captured: bool,
    pub source: CredentialSource,
    pub fallback_enabled: bool,
    pub callback_count: u64,
    pub digitizer_count: u64,
    pub last_event_type: Option<u32>,
    pub capture_thread_running: bool,
    pub listener_registered: bool,
    pub proxy: Option<ProxySenderContext>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    sender_id: u64,
    saved_at_us: u64,
}

/// Persisted credential file
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Missing file is `Ok(None)`; a zero value counts as absent
    pub fn load(&self) -> InjectorResult<Option<u64>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredCredential = serde_json::from_str(&text)?;
        Ok((stored.sender_id != 0).then_some(stored.sender_id))
    }

    /// Write atomically via a sibling temp file
    pub fn save(&self, sender_id: u64) -> InjectorResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let stored = StoredCredential {
            sender_id,
            saved_at_us: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_micros() as u64)
                .unwrap_or(0),
        };
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&stored)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Sender-related settings taken from `InjectorConfig`
#[derive(Debug, Clone)]
pub struct SenderSettings {
    pub fallback_enabled: bool,
    pub fallback_id: u64,
    pub initial_override: Option<u64>,
    pub probe_interval: Duration,
    pub capture_deadline: Option<Duration>,
}

impl From<&InjectorConfig> for SenderSettings {
    fn from(config: &InjectorConfig) -> Self {
        Self {
            fallback_enabled: config.sender_fallback_enabled,
            fallback_id: config.sender_fallback_id,
            initial_override: config.sender_override,
            probe_interval: config.probe_interval(),
            capture_deadline: config.capture_deadline_ms.map(Duration::from_millis),
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    learned: Option<SenderCredential>,
    overridden: Option<SenderCredential>,
    proxy: Option<ProxySenderContext>,
    probing: bool,
}

#[derive(Debug, Default)]
struct CaptureCounters {
    callbacks: AtomicU64,
    digitizer_events: AtomicU64,
    last_event_type: AtomicI64,
    thread_running: AtomicBool,
    listener_registered: AtomicBool,
}

pub struct SenderIdentityManager {
    settings: SenderSettings,
    store: Option<CredentialStore>,
    registry: Option<Arc<dyn SenderRegistry>>,
    tap: Option<Arc<dyn EventTap>>,
    slot: Mutex<Slot>,
    counters: CaptureCounters,
    init: Once,
    probe_started: AtomicBool,
    shutdown: AtomicBool,
}

impl SenderIdentityManager {
    pub fn new(
        settings: SenderSettings,
        store: Option<CredentialStore>,
        registry: Option<Arc<dyn SenderRegistry>>,
        tap: Option<Arc<dyn EventTap>>,
    ) -> Arc<Self> {
        let overridden = settings
            .initial_override
            .filter(|&id| id != 0)
            .map(|value| SenderCredential {
                value,
                captured: true,
                source: CredentialSource::Override,
            });
        let counters = CaptureCounters::default();
        counters.last_event_type.store(-1, Ordering::Relaxed);

        Arc::new(Self {
            settings,
            store,
            registry,
            tap,
            slot: Mutex::new(Slot {
                overridden,
                ..Slot::default()
            }),
            counters,
            init: Once::new(),
            probe_started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Bounded synchronous resolution, run once on first use: persisted value,
    /// then a single registry probe, then hand off to the background capture.
    /// Concurrent first callers block until it completes. An override only
    /// shadows the learned credential, so resolution runs regardless.
    pub fn ensure_initialized(self: &Arc<Self>) {
        self.init.call_once(|| self.resolve());
    }

    fn resolve(self: &Arc<Self>) {
        if self.slot.lock().overridden.is_some() {
            debug!("Sender override present, resolving learned sender underneath");
        }
        if self.is_learned() {
            return;
        }

        if let Some(store) = &self.store {
            match store.load() {
                Ok(Some(value)) => {
                    info!(sender_id = format_args!("{value:#x}"), "Loaded persisted sender ID");
                    self.slot.lock().learned = Some(SenderCredential {
                        value,
                        captured: true,
                        source: CredentialSource::Persisted,
                    });
                    return;
                }
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Failed to read persisted sender ID"),
            }
        }

        if let Some(value) = self.registry.as_ref().and_then(|r| r.probe_sender_id()) {
            self.capture(value, CredentialSource::RegistryProbe);
            return;
        }

        self.start_probe();
    }

    /// Start the background capture. Idempotent.
    pub fn start_probe(self: &Arc<Self>) {
        if self.registry.is_none() && self.tap.is_none() {
            debug!("No sender probe available");
            return;
        }
        if self.probe_started.swap(true, Ordering::AcqRel) {
            return;
        }
        self.slot.lock().probing = true;
        self.counters.thread_running.store(true, Ordering::Release);

        let manager = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("sender-capture".into())
            .spawn(move || manager.capture_loop());
        if let Err(e) = spawned {
            warn!(error = %e, "Failed to spawn sender capture thread");
            self.counters.thread_running.store(false, Ordering::Release);
            self.slot.lock().probing = false;
        }
    }

    fn capture_loop(&self) {
        let receiver = match &self.tap {
            Some(tap) => match tap.subscribe() {
                Ok(rx) => {
                    self.counters.listener_registered.store(true, Ordering::Release);
                    debug!("Sender capture listener registered");
                    Some(rx)
                }
                Err(e) => {
                    warn!(error = %e, "Sender capture listener unavailable");
                    None
                }
            },
            None => None,
        };

        let started = Instant::now();
        let interval = self.settings.probe_interval;

        while !self.shutdown.load(Ordering::Acquire) && !self.is_learned() {
            if self
                .settings
                .capture_deadline
                .is_some_and(|deadline| started.elapsed() >= deadline)
            {
                warn!("Sender capture deadline reached without a credential");
                break;
            }

            let timed_out = match &receiver {
                Some(rx) => match rx.recv_timeout(interval) {
                    Ok(event) => {
                        self.observe(event);
                        false
                    }
                    Err(RecvTimeoutError::Timeout) => true,
                    Err(RecvTimeoutError::Disconnected) => {
                        debug!("Sender capture listener closed");
                        self.teardown_listener();
                        std::thread::sleep(interval);
                        true
                    }
                },
                None => {
                    std::thread::sleep(interval);
                    true
                }
            };

            if timed_out
                && let Some(value) = self.registry.as_ref().and_then(|r| r.probe_sender_id())
            {
                self.capture(value, CredentialSource::RegistryProbe);
            }
        }

        self.teardown_listener();
        self.slot.lock().probing = false;
        self.counters.thread_running.store(false, Ordering::Release);
        debug!("Sender capture thread exiting");
    }

    fn observe(&self, event: ObservedEvent) {
        self.counters.callbacks.fetch_add(1, Ordering::Relaxed);
        self.counters
            .last_event_type
            .store(event.event_type as i64, Ordering::Relaxed);
        if event.event_type != EVENT_TYPE_DIGITIZER {
            return;
        }
        self.counters.digitizer_events.fetch_add(1, Ordering::Relaxed);
        trace!(
            sender_id = format_args!("{:#x}", event.sender_id),
            trusted = event.trusted,
            "Observed digitizer event"
        );

        if event.digitizer && event.trusted && event.sender_id != 0 {
            self.capture(event.sender_id, CredentialSource::CallbackCapture);
        }
    }

    /// Record a learned credential. First capture wins; returns whether this
    /// call was the one that captured.
    fn capture(&self, value: u64, source: CredentialSource) -> bool {
        {
            let mut slot = self.slot.lock();
            if slot.learned.is_some_and(|c| c.captured) {
                return false;
            }
            slot.learned = Some(SenderCredential {
                value,
                captured: true,
                source,
            });
        }
        info!(
            sender_id = format_args!("{value:#x}"),
            source = source.as_str(),
            "Captured sender ID"
        );
        self.persist(value);
        self.teardown_listener();
        true
    }

    fn persist(&self, value: u64) {
        if let Some(store) = &self.store
            && let Err(e) = store.save(value)
        {
            warn!(error = %e, path = %store.path().display(), "Failed to persist sender ID");
        }
    }

    fn teardown_listener(&self) {
        if self.counters.listener_registered.swap(false, Ordering::AcqRel)
            && let Some(tap) = &self.tap
        {
            tap.unsubscribe();
            debug!("Sender capture listener removed");
        }
    }

    fn is_learned(&self) -> bool {
        self.slot.lock().learned.is_some_and(|c| c.captured)
    }

    /// Credential to stamp on the next event. `None` means nothing was learned
    /// and the fallback constant is disabled.
    pub fn current(self: &Arc<Self>) -> Option<SenderCredential> {
        self.ensure_initialized();
        let slot = self.slot.lock();
        slot.overridden
            .or(slot.learned)
            .or_else(|| {
                self.settings
                    .fallback_enabled
                    .then(|| SenderCredential::fallback(self.settings.fallback_id))
            })
    }

    /// Set or clear (with 0) an explicit override. Persisting makes later
    /// launches load it as their persisted value.
    pub fn set_override(&self, value: u64, persist: bool) -> InjectorResult<()> {
        {
            let mut slot = self.slot.lock();
            slot.overridden = (value != 0).then_some(SenderCredential {
                value,
                captured: true,
                source: CredentialSource::Override,
            });
        }
        if value == 0 {
            info!("Sender override cleared");
            return Ok(());
        }
        info!(sender_id = format_args!("{value:#x}"), persist, "Sender override set");
        if persist {
            let store = self.store.as_ref().ok_or_else(|| {
                InjectorError::Config("no sender store configured".into())
            })?;
            store.save(value)?;
        }
        Ok(())
    }

    /// Record sender context reported by a trusted proxy. A live context with a
    /// nonzero sender is adopted unless a sender was already learned.
    pub fn set_proxy_context(&self, context: ProxySenderContext) {
        let adopt = context.likely_live() && context.sender_id != 0;
        let sender_id = context.sender_id;
        debug!(
            sender_id = format_args!("{sender_id:#x}"),
            captured = context.captured,
            digitizer_count = context.digitizer_count,
            "Proxy sender context updated"
        );
        self.slot.lock().proxy = Some(context);
        if adopt {
            self.capture(sender_id, CredentialSource::CallbackCapture);
        }
    }

    pub fn proxy_context(&self) -> Option<ProxySenderContext> {
        self.slot.lock().proxy.clone()
    }

    pub fn proxy_sender_likely_live(&self) -> bool {
        self.slot
            .lock()
            .proxy
            .as_ref()
            .is_some_and(ProxySenderContext::likely_live)
    }

    pub fn state(&self) -> SenderState {
        let slot = self.slot.lock();
        if slot.overridden.is_some() {
            return SenderState::Overridden;
        }
        match slot.learned.map(|c| c.source) {
            Some(CredentialSource::Persisted) => SenderState::PersistedLoaded,
            Some(_) => SenderState::Captured,
            None if slot.probing => SenderState::Probing,
            None => SenderState::Unresolved,
        }
    }

    /// Current sender value, 0 when unresolved
    pub fn sender_id(self: &Arc<Self>) -> u64 {
        self.current().map(|c| c.value).unwrap_or(0)
    }

    /// Whether the sender in use was learned rather than the fallback constant.
    /// Once a learned capture happens this never reverts.
    pub fn sender_id_captured(self: &Arc<Self>) -> bool {
        self.current().is_some_and(|c| c.captured)
    }

    pub fn source(self: &Arc<Self>) -> CredentialSource {
        self.current()
            .map(|c| c.source)
            .unwrap_or(CredentialSource::None)
    }

    pub fn fallback_enabled(&self) -> bool {
        self.settings.fallback_enabled
    }

    pub fn callback_count(&self) -> u64 {
        self.counters.callbacks.load(Ordering::Relaxed)
    }

    pub fn digitizer_count(&self) -> u64 {
        self.counters.digitizer_events.load(Ordering::Relaxed)
    }

    pub fn last_event_type(&self) -> Option<u32> {
        let value = self.counters.last_event_type.load(Ordering::Relaxed);
        (value >= 0).then_some(value as u32)
    }

    pub fn capture_thread_running(&self) -> bool {
        self.counters.thread_running.load(Ordering::Acquire)
    }

    pub fn listener_registered(&self) -> bool {
        self.counters.listener_registered.load(Ordering::Acquire)
    }

    pub fn status(self: &Arc<Self>) -> SenderStatus {
        let credential = self.current();
        SenderStatus {
            state: self.state(),
            sender_id: credential.map(|c| c.value).unwrap_or(0),
            captured: credential.is_some_and(|c| c.captured),
            source: credential
                .map(|c| c.source)
                .unwrap_or(CredentialSource::None),
            fallback_enabled: self.fallback_enabled(),
            callback_count: self.callback_count(),
            digitizer_count: self.digitizer_count(),
            last_event_type: self.last_event_type(),
            capture_thread_running: self.capture_thread_running(),
            listener_registered: self.listener_registered(),
            proxy: self.proxy_context(),
        }
    }

    /// Stop the background capture at its next wakeup
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for SenderIdentityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderIdentityManager")
            .field("state", &self.state())
            .field("fallback_enabled", &self.settings.fallback_enabled)
            .finish()
    }
}
