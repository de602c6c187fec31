//! rf-fleet Controller Daemon
//!
//! Connects to every radio in the configured fleet, brings each to its
//! baseline, and keeps their state in sync until shut down.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rf_controller::shell::{ProcessShell, SshShell};
use rf_controller::Fleet;
use rf_core::config::{self, ControllerConfig};

#[derive(Parser)]
#[command(name = "rf-controller")]
#[command(about = "rf-fleet controller daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, env = "RF_FLEET_CONFIG")]
    config: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load(args.config.as_ref())?;
    config.validate().context("Invalid configuration")?;

    if args.check {
        println!("Configuration OK: {} devices", config.devices.len());
        return Ok(());
    }

    if config.devices.is_empty() {
        tracing::warn!("No devices configured");
    }

    tracing::info!("rf-fleet controller starting ({} devices)", config.devices.len());

    let fleet = Arc::new(Fleet::new(
        &config,
        Arc::new(SshShell::new(config.ssh.clone())),
        Arc::new(ProcessShell::new()),
    ));

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    // Bring-up runs in the background so a slow fleet does not delay
    // shutdown.
    let bring_up = {
        let fleet = Arc::clone(&fleet);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                report = fleet.bring_up() => {
                    for (id, e) in &report.failed {
                        tracing::warn!("{} not ready: {}", id, e);
                    }
                    match serde_json::to_string(&fleet.states()) {
                        Ok(states) => tracing::debug!("Fleet state: {}", states),
                        Err(e) => tracing::debug!("Failed to serialize fleet state: {}", e),
                    }
                }
                _ = cancel.cancelled() => {}
            }
        })
    };

    let sync = fleet.spawn_sync(cancel.clone());

    cancel.cancelled().await;

    bring_up.abort();
    if let Err(e) = sync.await {
        tracing::warn!("Sync task ended abnormally: {}", e);
    }
    fleet.shutdown().await;

    tracing::info!("Controller shutdown complete");
    Ok(())
}

/// Load the configuration from `path`, or the default location if present
fn load(path: Option<&PathBuf>) -> Result<ControllerConfig> {
    if let Some(path) = path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        config::load_config(&default_path)
            .with_context(|| format!("Failed to load config from {:?}", default_path))
    } else {
        tracing::info!(
            "No config at {:?}, using default configuration",
            default_path
        );
        Ok(ControllerConfig::default())
    }
}

fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
