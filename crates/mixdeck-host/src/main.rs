//! MixDeck host application entry point.
//!
//! Wires together the audio backend, the session registry, and the serial
//! link, then runs until Ctrl-C.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load HostConfig            -- TOML file + CLI overrides
//!  └─ SharedRegistry             -- seeded from one enumeration
//!  └─ start services
//!       ├─ audio change callback (backend thread → registry)
//!       ├─ audio poll watcher    (Tokio task)
//!       └─ LinkService           (Tokio task: serial ↔ HostRelay)
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mixdeck_host::application::relay::HostRelay;
use mixdeck_host::application::session_registry::SharedRegistry;
use mixdeck_host::infrastructure::audio::{
    self, simulated::SimulatedBackend, AudioBackend,
};
use mixdeck_host::infrastructure::serial::{opener_for, LinkService, LinkServiceConfig, LinkStatus};
use mixdeck_host::infrastructure::storage::config::{self, HostConfig};

/// Command-line options.  Each overrides the matching config file entry.
#[derive(Debug, Parser)]
#[command(name = "mixdeck-host", version, about = "Per-application volume sync for the MixDeck controller")]
struct Args {
    /// Path to the config file (defaults to the platform config directory).
    #[arg(long, env = "MIXDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device node of the controller, e.g. /dev/ttyACM0 or COM4.
    #[arg(long, env = "MIXDECK_DEVICE")]
    device: Option<PathBuf>,

    /// TCP address to accept the device simulator on (ignored with --device).
    #[arg(long, env = "MIXDECK_LISTEN")]
    listen: Option<SocketAddr>,

    /// Log level used when `RUST_LOG` is not set.
    #[arg(long)]
    log_level: Option<String>,
}

fn load(args: &Args) -> anyhow::Result<HostConfig> {
    let mut cfg = match &args.config {
        Some(path) => config::load_config_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => config::load_config().context("loading config")?,
    };
    if let Some(device) = &args.device {
        cfg.link.device = Some(device.clone());
    }
    if let Some(listen) = args.listen {
        cfg.link.listen = listen.to_string();
    }
    if let Some(level) = &args.log_level {
        cfg.host.log_level = level.clone();
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = load(&args)?;

    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.host.log_level)),
        )
        .init();

    info!("MixDeck host starting");

    // Shutdown flag shared across all background services.
    let running = Arc::new(AtomicBool::new(true));

    // ── Audio backend and registry ────────────────────────────────────────────
    let backend: Arc<dyn AudioBackend> = Arc::new(SimulatedBackend::with_demo_sessions());
    let registry = SharedRegistry::new();
    let seeded = audio::refresh_registry(backend.as_ref(), &registry)
        .context("enumerating audio sessions")?;
    registry.take_changes();
    info!("{seeded} audio session(s) found");

    audio::subscribe_registry(backend.as_ref(), registry.clone());
    tokio::spawn(audio::run_poll_watcher(
        Arc::clone(&backend),
        registry.clone(),
        cfg.audio.poll_interval(),
        Arc::clone(&running),
    ));

    // ── Serial link ───────────────────────────────────────────────────────────
    let target = cfg.link.target().context("resolving link target")?;
    let service = Arc::new(LinkService::new(
        opener_for(target),
        LinkServiceConfig::from(&cfg.link),
    ));
    let relay = HostRelay::new(registry.clone(), Arc::clone(&backend), cfg.sync);
    let mut status = service
        .start(relay, registry.clone(), Arc::clone(&running))
        .await;

    // ── Ctrl-C / SIGTERM handler ──────────────────────────────────────────────
    let running_clone = Arc::clone(&running);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            running_clone.store(false, Ordering::Relaxed);
        }
    });

    info!("MixDeck host ready.  Press Ctrl-C to exit.");

    while running.load(Ordering::Relaxed) {
        tokio::select! {
            Some(event) = status.recv() => match event {
                LinkStatus::Connected => info!("device connected"),
                LinkStatus::Disconnected { reason } => warn!("device disconnected: {reason}"),
            },
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    info!("MixDeck host stopped");
    Ok(())
}
