//! revive monitor
//!
//! Watches service heartbeats in the inventory, detects dead hosts and
//! dispatches recovery of their VMs to surviving compute hosts.

use std::sync::Arc;

use anyhow::Result;
use revive_bus::HttpCaster;
use revive_inventory::SqliteInventory;
use revive_monitor::{
    config,
    monitor::{MonitorWorker, RecoveryMonitor},
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to REVIVE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting revive monitor");
    info!(
        inventory_path = %config.inventory_path,
        recover_topic = %config.recover_topic,
        compute_topic = %config.compute_topic,
        "Configuration loaded"
    );

    let inventory = match SqliteInventory::open(&config.inventory_path) {
        Ok(inventory) => Arc::new(inventory),
        Err(e) => {
            error!(error = %e, "Failed to open inventory");
            return Err(e.into());
        }
    };

    let caster = Arc::new(HttpCaster::new(
        &config.recover_topic,
        &config.agent_url_template,
    )?);

    let monitor = RecoveryMonitor::new(
        inventory,
        caster,
        config.service_down_time,
        &config.recover_topic,
        &config.compute_topic,
    );

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = MonitorWorker::new(monitor, config.poll_interval);
    let mut worker_handle = tokio::spawn(worker.run(shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            if let Err(e) = result {
                error!(error = %e, "Monitor worker panicked");
            }
            return Ok(());
        }
    }

    // Signal shutdown to the worker
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    if let Err(e) = tokio::time::timeout(shutdown_timeout, worker_handle).await {
        warn!(error = %e, "Monitor worker did not shut down in time");
    }

    info!("Monitor shutdown complete");
    Ok(())
}
