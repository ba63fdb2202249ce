//! ghlink — entry point.
//!
//! ```text
//! ghlink                              Monitor telemetry (default)
//! ghlink info                         Print the device model
//! ghlink set-performance <mode>       balanced | turbo | silent
//! ghlink set-gpu <mode>               eco | standard | ultimate | optimized
//! ghlink --config <path>              Load a custom config TOML
//! ghlink --gen-config                 Write default config to stdout
//! ```

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ghlink_cli::config::ClientConfig;
use ghlink_cli::poller::Poller;
use ghlink_cli::render;
use ghlink_core::{
    ChannelObserver, ConnectionState, DeviceSnapshot, FrameKind, GpuMode, PerformanceMode,
    Session, SessionConfig, SessionEvent, SessionHandle, TransportKind,
};

type BoxError = Box<dyn Error>;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "ghlink", about = "Monitor and control a remote hardware-monitor host")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "ghlink.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Override the configured transport (ble, socket, loopback).
    #[arg(short, long)]
    transport: Option<TransportKind>,

    /// Override the socket host.
    #[arg(long)]
    host: Option<String>,

    /// Override the polling interval.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Print reports as JSON lines.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    action: Option<Action>,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Poll telemetry until Ctrl-C.
    Monitor,
    /// Print the device model.
    Info,
    /// Change the performance mode and print the confirmed modes.
    SetPerformance { mode: PerformanceMode },
    /// Change the GPU mode and print the confirmed modes.
    SetGpu { mode: GpuMode },
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&ClientConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config, then apply command-line overrides.
    let mut config = ClientConfig::load(&cli.config);
    if let Some(kind) = cli.transport {
        config.transport.kind = kind;
    }
    if let Some(host) = &cli.host {
        config.socket.host = host.clone();
    }
    if let Some(interval) = cli.interval_ms {
        config.polling.interval_ms = interval;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            error!("config: {problem}");
        }
        return Err("invalid configuration".into());
    }

    info!("ghlink v{}", env!("CARGO_PKG_VERSION"));
    let (handle, task) = Session::spawn(config.build_transport(), SessionConfig::default());
    info!("transport: {}", handle.transport_kind());
    if handle.transport_kind() == TransportKind::Socket {
        info!("host: {}:{}", config.socket.host, config.socket.port);
    }
    let (observer, mut events) = ChannelObserver::new();
    handle.register_observer(Box::new(observer)).await?;

    if !handle.transport_available().await? {
        return Err(format!(
            "{} transport unavailable: enable the radio or network",
            config.transport.kind
        )
        .into());
    }

    let mut poller = Poller::new();
    handle.connect().await?;
    wait_connected(&mut events, &mut poller, connect_deadline(&config)).await?;

    let outcome = match cli.action.unwrap_or(Action::Monitor) {
        Action::Monitor => monitor(&handle, &mut events, &mut poller, &config, cli.json).await,
        Action::Info => {
            let snapshot = wait_frame(&mut events, FrameKind::Info).await?;
            if cli.json {
                println!("{}", render::json(&*snapshot)?);
            } else {
                println!("{}", snapshot.device_model);
            }
            Ok(())
        }
        Action::SetPerformance { mode } => {
            handle.set_performance_mode(mode).await?;
            confirm_modes(&handle, &mut events, cli.json).await
        }
        Action::SetGpu { mode } => {
            handle.set_gpu_mode(mode).await?;
            confirm_modes(&handle, &mut events, cli.json).await
        }
    };

    handle.disconnect().await?;
    drop(handle);
    if let Err(e) = task.await {
        warn!("session task ended abnormally: {e}");
    }
    outcome
}

// ── Helpers ──────────────────────────────────────────────────────

/// Upper bound on scan + connect + settle for the configured transport.
fn connect_deadline(config: &ClientConfig) -> Duration {
    let margin = Duration::from_secs(5);
    match config.transport.kind {
        TransportKind::Ble => {
            let ble = config.to_ble_config();
            ble.scan_timeout + ble.connect_timeout + ble.settle_delay + margin
        }
        TransportKind::Socket => config.to_socket_config().connect_timeout + margin,
        TransportKind::Loopback => margin,
    }
}

async fn connection_outcome(
    events: &mut UnboundedReceiver<SessionEvent>,
    poller: &mut Poller,
) -> Result<(), BoxError> {
    while let Some(event) = events.recv().await {
        poller.observe(&event);
        if let SessionEvent::ConnectionChanged(state) = event {
            match state {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Error => return Err("connection failed".into()),
                ConnectionState::None => return Err("device not found".into()),
                _ => {}
            }
        }
    }
    Err("session closed".into())
}

async fn wait_connected(
    events: &mut UnboundedReceiver<SessionEvent>,
    poller: &mut Poller,
    limit: Duration,
) -> Result<(), BoxError> {
    match timeout(limit, connection_outcome(events, poller)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(format!("no connection after {limit:?}").into()),
    }
}

async fn next_frame(
    events: &mut UnboundedReceiver<SessionEvent>,
    kind: FrameKind,
) -> Result<Arc<DeviceSnapshot>, BoxError> {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::FrameDecoded(decoded, snapshot) if decoded == kind => {
                return Ok(snapshot);
            }
            SessionEvent::ConnectionChanged(state) if !state.is_connected() => {
                return Err(format!("link lost ({state})").into());
            }
            _ => {}
        }
    }
    Err("session closed".into())
}

async fn wait_frame(
    events: &mut UnboundedReceiver<SessionEvent>,
    kind: FrameKind,
) -> Result<Arc<DeviceSnapshot>, BoxError> {
    let limit = Duration::from_secs(10);
    match timeout(limit, next_frame(events, kind)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(format!("no {kind} frame after {limit:?}").into()),
    }
}

/// Read the modes back after a write and print what the host reports.
async fn confirm_modes(
    handle: &SessionHandle,
    events: &mut UnboundedReceiver<SessionEvent>,
    json: bool,
) -> Result<(), BoxError> {
    handle.read_modes().await?;
    let snapshot = wait_frame(events, FrameKind::Modes).await?;
    if json {
        println!("{}", render::json(&snapshot.modes)?);
    } else {
        println!("{}", render::modes(&snapshot.modes));
    }
    Ok(())
}

async fn monitor(
    handle: &SessionHandle,
    events: &mut UnboundedReceiver<SessionEvent>,
    poller: &mut Poller,
    config: &ClientConfig,
    json: bool,
) -> Result<(), BoxError> {
    let mut ticker = tokio::time::interval(config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                poller.tick(handle).await?;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    return Err("session closed".into());
                };
                poller.observe(&event);
                match &event {
                    SessionEvent::ConnectionChanged(state) if !state.is_connected() => {
                        return Err(format!("link lost ({state})").into());
                    }
                    SessionEvent::FrameDecoded(FrameKind::Modes, snapshot) => {
                        if json {
                            println!("{}", render::json(&**snapshot)?);
                        } else {
                            println!("{}\n", render::snapshot(snapshot));
                        }
                    }
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received, shutting down");
                return Ok(());
            }
        }
    }
}
