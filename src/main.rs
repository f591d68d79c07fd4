#![forbid(unsafe_code)]

//! `clockd`: clock profile daemon binary.
//!
//! Loads configuration, builds the profile store and clock manager, starts
//! the IPC command server for `clockd-ctl`, and samples the skin temperature
//! until a signal or an `Exit` command asks it to stop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use clockd::clock::{ClockController, ClockManager, MemoryProfileStore, ProfileStore};
use clockd::config::GlobalConfig;
use clockd::ipc::{Dispatcher, IpcServer};
use clockd::telemetry::{ServicePool, ThermalZoneConnector};
use clockd::{AppError, Result};

type ThermalPool = ServicePool<ThermalZoneConnector>;

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "clockd", about = "Clock profile daemon", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file; built-in defaults when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the IPC socket name from the configuration.
    #[arg(long)]
    ipc_name: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("clockd bootstrap");

    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    if let Some(name) = args.ipc_name {
        config.ipc_name = name;
    }
    info!(ipc_name = %config.ipc_name, "configuration loaded");

    // ── Build collaborators ─────────────────────────────
    let store: Arc<dyn ProfileStore> = Arc::new(MemoryProfileStore::open_or_unloaded(
        config.profiles.path.clone(),
        config.enabled,
    ));
    let clock = Arc::new(ClockManager::new(Arc::clone(&store)));
    let pool = Arc::new(ServicePool::new(ThermalZoneConnector::new(
        config.telemetry.thermal_zone.clone(),
    )));

    // ── Start the IPC server ────────────────────────────
    let controller = Arc::clone(&clock) as Arc<dyn ClockController>;
    let server = IpcServer::new(
        config.ipc_name.clone(),
        config.max_sessions,
        Dispatcher::new(store, controller),
    );
    server.start()?;

    // ── Run until stopped ───────────────────────────────
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?;
    runtime.block_on(run(
        Arc::clone(&clock),
        Arc::clone(&pool),
        config.telemetry.poll_interval(),
    ));
    drop(runtime);

    // ── Teardown ────────────────────────────────────────
    server.stop();
    pool.shutdown();
    info!("clockd shut down");

    Ok(())
}

/// Sample telemetry until a shutdown signal or an `Exit` request arrives.
async fn run(clock: Arc<ClockManager>, pool: Arc<ThermalPool>, poll_interval: Duration) {
    let stop = clock.stop_token();
    let signal = shutdown_signal();
    tokio::pin!(signal);

    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut sampling_ok = true;

    loop {
        tokio::select! {
            () = &mut signal => {
                info!("shutdown signal received");
                clock.request_stop();
                break;
            }
            () = stop.cancelled() => {
                info!("stop requested");
                break;
            }
            _ = ticker.tick() => {
                sampling_ok = sample(Arc::clone(&clock), Arc::clone(&pool), sampling_ok).await;
            }
        }
    }
}

/// Take one temperature sample; returns whether it succeeded.
async fn sample(clock: Arc<ClockManager>, pool: Arc<ThermalPool>, was_ok: bool) -> bool {
    let result =
        tokio::task::spawn_blocking(move || clock.refresh_skin_temperature(&pool)).await;

    match result {
        Ok(Ok(_)) => {
            if !was_ok {
                info!("temperature sampling recovered");
            }
            true
        }
        Ok(Err(err)) => {
            if was_ok {
                warn!(%err, "temperature sampling failed");
            } else {
                debug!(%err, "temperature sampling still failing");
            }
            false
        }
        Err(err) => {
            warn!(%err, "temperature sampling task panicked");
            false
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
