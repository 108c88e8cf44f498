//! Fingertip command-line driver
//!
//! Performs one gesture against the in-memory loopback platform and prints
//! the resulting diagnostics as JSON.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use input_injector::backends::BackendKind;
use input_injector::loopback::{ChannelMode, Loopback};
use input_injector::{InjectorConfig, TouchInjector, parse_sender_id};
use touch_protocol::Point;

#[derive(Debug, Parser)]
#[command(name = "fingertip", about = "Inject synthetic touch and key events")]
struct Cli {
    /// Delivery method: sim, conn, legacy, bks, ax, all or auto
    #[arg(long, short, global = true)]
    method: Option<String>,

    /// JSON preferences file layered over the defaults
    #[arg(long, global = true)]
    prefs: Option<PathBuf>,

    /// Simulate a missing platform channel (repeatable)
    #[arg(long, global = true, value_parser = parse_backend)]
    unavailable: Vec<BackendKind>,

    /// Simulate a channel that rejects every event (repeatable)
    #[arg(long, global = true, value_parser = parse_backend)]
    rejecting: Vec<BackendKind>,

    /// Focus router accepts events without reaching a consumer
    #[arg(long, global = true)]
    unrouted: bool,

    /// Sender credential reported by the registry probe
    #[arg(long, global = true, value_parser = parse_sender_id)]
    registry_sender: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Tap {
        x: f64,
        y: f64,
    },
    DoubleTap {
        x: f64,
        y: f64,
    },
    LongPress {
        x: f64,
        y: f64,
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    Swipe {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    Drag {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        #[arg(long)]
        duration_ms: Option<u64>,
    },
    /// Press (or with --up release) a keyboard usage, e.g. 0x28
    Key {
        #[arg(value_parser = parse_u16)]
        usage: u16,
        #[arg(long)]
        up: bool,
    },
    /// Type printable ASCII text
    Type { text: String },
    /// Print diagnostics without injecting anything
    Status,
}

fn parse_backend(s: &str) -> Result<BackendKind, String> {
    BackendKind::from_name(s).ok_or_else(|| format!("unknown backend: {s}"))
}

fn parse_u16(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid usage {s}: {e}"))
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("input_injector=debug".parse()?)
                .add_directive("fingertip=debug".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = InjectorConfig::load(cli.prefs.as_deref()).context("loading configuration")?;

    let loopback = Loopback::new();
    for &kind in &cli.unavailable {
        loopback.set_mode(kind, ChannelMode::Unavailable);
    }
    for &kind in &cli.rejecting {
        loopback.set_mode(kind, ChannelMode::Rejecting);
    }
    if cli.unrouted {
        loopback.set_mode(BackendKind::FocusRouted, ChannelMode::Unrouted);
    }
    loopback.set_registry_value(cli.registry_sender);

    info!(method = cli.method.as_deref().unwrap_or("auto"), "Starting Fingertip");
    let injector = TouchInjector::new(config, loopback.platform());
    let method = cli.method.as_deref();
    let duration = |ms: Option<u64>| ms.map(Duration::from_millis);

    let delivered = match cli.command {
        Command::Tap { x, y } => injector.tap(Point::new(x, y), method),
        Command::DoubleTap { x, y } => injector.double_tap(Point::new(x, y), method),
        Command::LongPress { x, y, duration_ms } => {
            injector.long_press(Point::new(x, y), duration(duration_ms), method)
        }
        Command::Swipe {
            x1,
            y1,
            x2,
            y2,
            duration_ms,
        } => injector.swipe(
            Point::new(x1, y1),
            Point::new(x2, y2),
            duration(duration_ms),
            method,
        ),
        Command::Drag {
            x1,
            y1,
            x2,
            y2,
            duration_ms,
        } => injector.drag(
            Point::new(x1, y1),
            Point::new(x2, y2),
            duration(duration_ms),
            method,
        ),
        Command::Key { usage, up } => injector.send_key_usage(usage, !up),
        Command::Type { text } => injector.type_text(&text),
        Command::Status => {
            injector.warm_up();
            true
        }
    };

    let report = serde_json::to_string_pretty(&injector.hid_diagnostics())?;
    println!("{report}");

    if !delivered {
        let reason = injector
            .last_dispatch()
            .and_then(|a| a.reason)
            .unwrap_or_else(|| "unknown".into());
        bail!("gesture not delivered: {reason}");
    }
    info!(events = loopback.delivered().len(), "Gesture delivered");
    Ok(())
}
