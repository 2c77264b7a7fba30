//! # Shadow Uplink
//!
//! Uploads buffered telemetry records to a device shadow whenever the network
//! is up.
//!
//! # Control Flow
//!
//! 1. **Initialization**
//!    - Parse `-p <period>` / `-c <config>`
//!    - Load configuration (defaults if the file is absent)
//!    - Set up logging to stderr and the log file
//!
//! 2. **Supervision**
//!    - Probe connectivity every 10 s
//!    - Start the upload worker when the network comes up, kill it when it
//!      goes down
//!
//! 3. **Shutdown**
//!    - SIGTERM or Ctrl+C cancels the supervisor
//!    - The worker is terminated and confirmed gone before the process exits 0

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use shadow_uplink::channel::tcp::TcpShadowFactory;
use shadow_uplink::cli::Cli;
use shadow_uplink::config::Config;
use shadow_uplink::connectivity::HttpHeadProbe;
use shadow_uplink::logging;
use shadow_uplink::supervisor::UploadSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load_or_default(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    apply_overrides(&mut config, &cli);

    let _log_guard = logging::init(&config.logging)?;

    info!("Shadow Uplink v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "Queue: {} (scan every {} s), shadow endpoint: {}",
        config.queue.dir, config.uploader.scan_period_s, config.shadow.endpoint
    );

    let probe = HttpHeadProbe::from_config(&config.connectivity);
    let factory = Arc::new(TcpShadowFactory::new(config.shadow.clone()));
    let supervisor = UploadSupervisor::from_config(probe, factory, &config);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        wait_for_termination().await;
        signal_token.cancel();
    });

    supervisor.run(shutdown).await;
    info!("Shutdown complete");
    Ok(())
}

/// Command line flags take precedence over the configuration file
fn apply_overrides(config: &mut Config, cli: &Cli) {
    if let Some(period) = cli.period {
        config.uploader.scan_period_s = period;
    }
}

/// Resolve on SIGTERM or Ctrl+C
async fn wait_for_termination() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}
