//! MixDeck device simulator.
//!
//! Runs the firmware's control loop on a desktop machine.  The serial port is
//! a TCP connection to `mixdeck-host --listen`, touches and encoder turns come
//! from a gesture script, and draw calls and HID reports go to the log.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ parse Args, init tracing
//!  └─ Script (TOML, or the built-in demo) → ScriptedPeripherals
//!  └─ DeviceApp
//!       ├─ TcpSerialPort          (serial)
//!       ├─ TouchTracker           (touch samples → phases)
//!       ├─ DebouncedEncoder       (5 ms window)
//!       ├─ DebouncedButton        (50 ms window, 800 ms long press)
//!       ├─ LoggingSurface         (display)
//!       └─ LoggingHid             (USB HID)
//!  └─ one poll_once per scheduler tick until Ctrl-C
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use mixdeck_device::application::control_loop::{DeviceApp, Peripherals};
use mixdeck_device::config::DeviceConfig;
use mixdeck_device::infrastructure::peripherals::debounce::{DebouncedButton, DebouncedEncoder};
use mixdeck_device::infrastructure::peripherals::logging::{LoggingHid, LoggingSurface};
use mixdeck_device::infrastructure::peripherals::scripted::{Script, ScriptedPeripherals, SimClock};
use mixdeck_device::infrastructure::peripherals::touch::TouchTracker;
use mixdeck_device::infrastructure::serial::TcpSerialPort;

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "mixdeck-device", version, about = "Desktop simulator for the MixDeck controller")]
struct Args {
    /// Address the host application listens on.
    #[arg(long, env = "MIXDECK_HOST", default_value = "127.0.0.1:7420")]
    host: SocketAddr,

    /// Gesture script (TOML).  Defaults to the built-in demo.
    #[arg(long, env = "MIXDECK_SCRIPT")]
    script: Option<PathBuf>,

    /// Stop after this many milliseconds.
    #[arg(long)]
    run_for_ms: Option<u64>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .init();

    info!("MixDeck device simulator starting");

    let config = DeviceConfig::default();
    let script = match &args.script {
        Some(path) => Script::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Script::demo().context("parsing the built-in demo script")?,
    };
    info!("{} scripted gesture(s)", script.steps.len());

    let clock = SimClock::default();
    let scripted = ScriptedPeripherals::compile(&script, clock.clone());
    let peripherals = Peripherals {
        serial: Box::new(TcpSerialPort::new(args.host)),
        touch: Box::new(TouchTracker::new(scripted.touch)),
        encoder: Box::new(DebouncedEncoder::new(
            scripted.encoder,
            config.encoder_debounce_ms,
        )),
        button: Box::new(DebouncedButton::new(
            scripted.button,
            config.button_debounce_ms,
            config.long_press_ms,
        )),
        display: Box::new(LoggingSurface::default()),
        hid: Box::new(LoggingHid),
    };
    let tick_ms = config.tick_ms.max(1);
    let mut app = DeviceApp::new(config, peripherals);

    // ── Ctrl-C handler ────────────────────────────────────────────────────────
    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("connecting to host at {}.  Press Ctrl-C to exit.", args.host);

    let start = Instant::now();
    let limit = args.run_for_ms.map(Duration::from_millis);
    let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut last_state = app.link_state();

    while running.load(Ordering::Relaxed) {
        ticker.tick().await;
        let elapsed = start.elapsed();
        if limit.is_some_and(|limit| elapsed >= limit) {
            break;
        }
        let now_ms = elapsed.as_millis() as u64;
        clock.set(now_ms);

        let report = app.poll_once(now_ms / tick_ms);
        if report.redrawn {
            debug!("frame painted");
        }
        if app.link_state() != last_state {
            last_state = app.link_state();
            info!("link {last_state}, {} session(s) shown", app.reconciler().shadow().len());
        }
    }

    info!("MixDeck device simulator stopped");
    Ok(())
}
