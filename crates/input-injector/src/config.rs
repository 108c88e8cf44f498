//! Injector configuration
//!
//! Defaults, then an optional JSON preferences file, then `FINGERTIP_*`
//! environment overrides.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat, Map};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use touch_protocol::InjectionMethod;
use tracing::debug;

use crate::InjectorResult;
use crate::backends::BackendKind;
use crate::sender::FALLBACK_SENDER_ID;

/// Environment variable prefix; `FINGERTIP_ALLOW_FALLBACK` sets `allow_fallback`
pub const ENV_PREFIX: &str = "FINGERTIP";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectorConfig {
    /// Method used when a request says `auto`
    pub method: InjectionMethod,
    /// Fall back to the next backend when one fails
    pub allow_fallback: bool,
    /// Backends skipped by `auto` and `all`
    pub disabled_backends: Vec<BackendKind>,

    /// Use the well-known fallback sender when nothing was captured
    #[serde(alias = "sender_fallback")]
    pub sender_fallback_enabled: bool,
    pub sender_fallback_id: u64,
    /// Caller-supplied sender that beats every other source
    #[serde(alias = "sender_id", deserialize_with = "deserialize_sender_override")]
    pub sender_override: Option<u64>,
    /// Where a captured sender is persisted between launches
    #[serde(alias = "sender_store")]
    pub sender_store_path: Option<PathBuf>,
    /// Registry re-probe interval of the background capture
    pub probe_interval_ms: u64,
    /// Give up background capture after this long; `None` runs until captured
    pub capture_deadline_ms: Option<u64>,

    /// Refuse strict-method successes that cannot be corroborated
    pub reject_unverified: bool,
    /// Trailing window in which a meaningful dispatch corroborates a focus hint.
    /// Tunable heuristic, not a guaranteed-correct threshold.
    pub verify_window_ms: u64,

    /// Explicit target process for focus-routed delivery
    pub target_pid: Option<i32>,
    /// Set a focus override for the duration of each gesture and restore it after
    pub transient_focus_override: bool,

    pub tap_dwell_ms: u64,
    pub double_tap_gap_ms: u64,
    pub swipe_duration_ms: u64,
    pub drag_duration_ms: u64,
    pub long_press_duration_ms: u64,
    pub swipe_steps: u32,
    pub drag_steps: u32,
    /// Pause between key transitions while typing
    pub key_interval_ms: u64,

    pub history_capacity: usize,
}

impl Default for InjectorConfig {
    fn default() -> Self {
        Self {
            method: InjectionMethod::Auto,
            allow_fallback: true,
            disabled_backends: Vec::new(),
            sender_fallback_enabled: true,
            sender_fallback_id: FALLBACK_SENDER_ID,
            sender_override: None,
            sender_store_path: None,
            probe_interval_ms: 250,
            capture_deadline_ms: None,
            reject_unverified: false,
            verify_window_ms: 750,
            target_pid: None,
            transient_focus_override: true,
            tap_dwell_ms: 50,
            double_tap_gap_ms: 120,
            swipe_duration_ms: 300,
            drag_duration_ms: 1000,
            long_press_duration_ms: 1000,
            swipe_steps: 20,
            drag_steps: 50,
            key_interval_ms: 8,
            history_capacity: 64,
        }
    }
}

impl InjectorConfig {
    /// Defaults, overlaid with `prefs` if given and then the process environment
    pub fn load(prefs: Option<&Path>) -> InjectorResult<Self> {
        Self::load_from(prefs, None)
    }

    /// Like [`load`](Self::load), reading overrides from `vars` instead of the
    /// process environment when given
    pub fn load_from(
        prefs: Option<&Path>,
        vars: Option<Map<String, String>>,
    ) -> InjectorResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = prefs {
            debug!(path = %path.display(), "Loading injector preferences");
            builder = builder.add_source(File::from(path).format(FileFormat::Json));
        }

        let env = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .ignore_empty(true)
            .list_separator(",")
            .with_list_parse_key("disabled_backends")
            .source(vars);

        let config = builder.add_source(env).build()?.try_deserialize()?;
        Ok(config)
    }

    pub fn tap_dwell(&self) -> Duration {
        Duration::from_millis(self.tap_dwell_ms)
    }

    pub fn double_tap_gap(&self) -> Duration {
        Duration::from_millis(self.double_tap_gap_ms)
    }

    pub fn verify_window(&self) -> Duration {
        Duration::from_millis(self.verify_window_ms)
    }

    pub fn key_interval(&self) -> Duration {
        Duration::from_millis(self.key_interval_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms.max(1))
    }
}

/// Parse a sender id written in decimal or `0x` hex
pub fn parse_sender_id(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|e| format!("invalid sender id {value}: {e}"))
}

/// Zero clears the override
fn deserialize_sender_override<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SenderIdVisitor;

    impl<'de> Visitor<'de> for SenderIdVisitor {
        type Value = Option<u64>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a sender id as an integer or a hex string")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok((v != 0).then_some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            let v = u64::try_from(v).map_err(|_| E::custom(format!("negative sender id {v}")))?;
            self.visit_u64(v)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            if v.trim().is_empty() {
                return Ok(None);
            }
            parse_sender_id(v).map_err(E::custom).and_then(|v| self.visit_u64(v))
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(self)
        }
    }

    deserializer.deserialize_any(SenderIdVisitor)
}
