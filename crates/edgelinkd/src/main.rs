//! EdgeLink Daemon - edge telemetry gateway
//!
//! Polls field devices on fixed schedules, caches each device's latest
//! reading for the query interface and forwards every reading downstream.

use anyhow::{Context, Result};
use clap::Parser;
use edgelink_common::config::DEFAULT_CONFIG_PATH;
use edgelink_common::{Config, GIT_SHA, VERSION};
use edgelinkd::supervisor::shutdown_signal;
use edgelinkd::{logging, server, Gateway};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "edgelinkd")]
#[command(about = "EdgeLink - edge telemetry gateway", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&cli.log_level);

    info!("EdgeLink daemon v{} ({}) starting", VERSION, GIT_SHA);

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load config {}", cli.config.display()))?;
    info!(
        devices = config.devices.len(),
        publisher = ?config.broker.publisher,
        "configuration loaded from {}",
        cli.config.display()
    );

    if cli.check {
        info!("configuration OK");
        return Ok(());
    }

    let listener = server::bind(&config.http_addr).await?;
    let gateway = Gateway::new(config)?;

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let report = gateway.run(listener, shutdown).await?;
    for poller in &report.pollers {
        info!(
            device = %poller.device_id,
            ticks = poller.ticks,
            readings = poller.readings,
            failed = poller.polls_failed,
            publish_failures = poller.publish_failures,
            "poller summary"
        );
    }

    info!("Shutdown complete");
    Ok(())
}
