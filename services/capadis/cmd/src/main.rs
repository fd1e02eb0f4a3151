//! Capacitance-disturbance alarm receiver.
//!
//! Dials alarm controllers and/or accepts their connections, reassembles
//! their 10-byte alarm frames and logs each alarm. Can also run a simulated
//! controller for testing.

use anyhow::Context;
use capadis_session::{
    emitter, listen_tcp, EmitMode, EmitterConfig, Session, SessionConfig, SessionEvent,
};
use capadis_wire::{AlarmEvent, CarryOverPolicy};
use clap::Parser;
use serde::Serialize;
use std::{net::SocketAddr, path::PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::CapadisConfig;
use logging::CapadisLogFormatter;

/// Alarm controller receiver
#[derive(Parser, Debug)]
#[command(name = "capadis", version, about = "Capacitance-disturbance alarm receiver")]
struct Args {
    /// Controller address to dial, e.g. 192.168.1.23:8888 (repeatable)
    #[arg(long)]
    connect: Vec<SocketAddr>,

    /// Accept controller connections on this address, e.g. 0.0.0.0:8888
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Run a simulated controller on this address
    #[arg(long)]
    simulate: Option<SocketAddr>,

    /// Simulated traffic: clean or dirty
    #[arg(long, default_value = "clean")]
    simulate_mode: EmitMode,

    /// Time between simulated bursts, e.g. 1s
    #[arg(long, default_value = "1s")]
    simulate_interval: humantime::Duration,

    /// Carry-over bound per connection in bytes
    #[arg(long)]
    max_carry_over: Option<usize>,

    /// Pending fragment handling on a newer header: replace or flush
    #[arg(long)]
    carry_over_policy: Option<CarryOverPolicy>,

    /// Reject alarms whose timestamp is not a real date and time
    #[arg(long)]
    strict_timestamps: bool,

    /// Print each alarm as a JSON line on stdout
    #[arg(long)]
    json: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

/// One line of `--json` output
#[derive(Serialize)]
struct AlarmRecord<'a> {
    peer: SocketAddr,
    #[serde(flatten)]
    event: &'a AlarmEvent,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("capadis={}", args.log_level).parse()?)
        .add_directive(format!("capadis_session={}", args.log_level).parse()?)
        .add_directive(format!("capadis_wire={}", args.log_level).parse()?);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .event_format(CapadisLogFormatter::new("capadis"))
        .init();

    info!("Starting capadis v{}", env!("CARGO_PKG_VERSION"));

    let mut capadis_config = CapadisConfig::load_from_file(&args.config)?;
    apply_args(&mut capadis_config, &args);
    capadis_config
        .validate()
        .context("invalid command line settings")?;

    if capadis_config.connect.is_empty()
        && capadis_config.listen.is_none()
        && args.simulate.is_none()
    {
        anyhow::bail!("Must specify --connect, --listen or --simulate (or a combination)");
    }

    let session_config = capadis_config.session_config();
    info!(
        "Pipeline config: max_carry_over={}, policy={:?}, strict_timestamps={}",
        session_config.pipeline.max_carry_over,
        session_config.pipeline.carry_over_policy,
        session_config.pipeline.strict_timestamps
    );

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    if let Some(simulate_addr) = args.simulate {
        let listener = listen_tcp(simulate_addr)
            .await
            .with_context(|| format!("failed to bind simulator on {}", simulate_addr))?;
        let emitter_config = EmitterConfig {
            interval: args.simulate_interval.into(),
            mode: args.simulate_mode,
        };
        tasks.push(tokio::spawn(async move {
            if let Err(e) = emitter::serve(listener, emitter_config).await {
                component_error!("simulator", "Simulator stopped: {:#}", e);
            }
        }));
    }

    if let Some(listen_addr) = capadis_config.listen {
        let listener = listen_tcp(listen_addr)
            .await
            .with_context(|| format!("failed to listen on {}", listen_addr))?;
        info!("Listening for controllers on {}", listen_addr);
        tasks.push(tokio::spawn(accept_loop(
            listener,
            session_config.clone(),
            event_tx.clone(),
        )));
    }

    for connect_addr in capadis_config.connect.iter().copied() {
        let config_connect = session_config.clone();
        let tx_connect = event_tx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = Session::run_outbound(config_connect, connect_addr, tx_connect).await {
                component_error!("session", "Outbound session to {} failed: {:#}", connect_addr, e);
            }
        }));
    }
    drop(event_tx);

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGINT handler: {}", e))?;

    info!("capadis started. Waiting for alarms...");

    let mut events_open = true;
    loop {
        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            event = event_rx.recv(), if events_open => match event {
                Some(event) => handle_event(event, args.json)?,
                None if args.simulate.is_some() => {
                    // Simulator only; keep serving until a signal arrives.
                    events_open = false;
                }
                None => {
                    info!("Event channel closed, shutting down");
                    break;
                }
            },
        }
    }

    for task in tasks {
        task.abort();
    }

    info!("capadis shutdown complete");
    Ok(())
}

/// Command line flags win over file and environment settings
fn apply_args(config: &mut CapadisConfig, args: &Args) {
    if !args.connect.is_empty() {
        config.connect = args.connect.clone();
    }
    if args.listen.is_some() {
        config.listen = args.listen;
    }
    if let Some(max_carry_over) = args.max_carry_over {
        config.max_carry_over = max_carry_over;
    }
    if let Some(policy) = args.carry_over_policy {
        config.carry_over_policy = policy;
    }
    if args.strict_timestamps {
        config.strict_timestamps = true;
    }
}

async fn accept_loop(
    listener: tokio::net::TcpListener,
    config: SessionConfig,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
                }
                let config_session = config.clone();
                let tx_session = event_tx.clone();
                tokio::spawn(async move {
                    if let Err(e) =
                        Session::run_inbound(&config_session, stream, peer, &tx_session).await
                    {
                        component_warn!("session", "Inbound session from {} failed: {:#}", peer, e);
                    }
                });
            }
            Err(e) => {
                component_error!("session", "Accept error: {}; stopping listener", e);
                return;
            }
        }
    }
}

fn handle_event(event: SessionEvent, json: bool) -> anyhow::Result<()> {
    match event {
        SessionEvent::Connected { peer } => {
            component_info!("session", "Connected to controller {}", peer);
        }
        SessionEvent::Alarm { peer, event } => {
            if json {
                println!(
                    "{}",
                    serde_json::to_string(&AlarmRecord { peer, event: &event })?
                );
            } else {
                component_info!("alarm", "ALARM INFO: {}", event);
            }
        }
        SessionEvent::Rejected { peer, rejected } => {
            component_warn!(
                "alarm",
                "Dropped {} bytes from {}: {}",
                rejected.bytes.len(),
                peer,
                rejected.reason
            );
        }
        SessionEvent::Disconnected { peer, stats } => {
            component_info!(
                "session",
                "Disconnected from {} ({} bytes, {} alarms, {} rejected, {} superseded)",
                peer,
                stats.bytes_in,
                stats.pipeline.accepted,
                stats.pipeline.rejected,
                stats.pipeline.reassembly.superseded
            );
        }
    }
    Ok(())
}
