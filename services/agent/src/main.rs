//! revive agent
//!
//! Runs on each compute host:
//!
//! - **Heartbeat Loop**: records this host's liveness in the inventory
//! - **Ingress**: accepts recovery casts addressed to this host
//! - **Recover Manager**: rebuilds each requested VM on this host

use std::sync::Arc;

use anyhow::{Context, Result};
use revive_agent::{
    api::{self, IngressState},
    config,
    domain::VirshHypervisor,
    driver,
    heartbeat::{self, HeartbeatReporter},
    network::HostNetworkAttacher,
    RecoverManager, VmRecovery,
};
use revive_inventory::SqliteInventory;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Casts buffered between the ingress and the recover manager.
const QUEUE_DEPTH: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to REVIVE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting revive agent");
    info!(
        host = %config.host_id,
        inventory_path = %config.inventory_path,
        listen_addr = %config.listen_addr,
        driver = %config.driver,
        policy = ?config.step_failure_policy,
        compute_capable = config.compute_capable,
        "Configuration loaded"
    );

    let inventory = match SqliteInventory::open(&config.inventory_path) {
        Ok(inventory) => Arc::new(inventory),
        Err(e) => {
            error!(error = %e, "Failed to open inventory");
            return Err(e.into());
        }
    };

    let runner = driver::command_runner(config.driver, config.use_sudo);
    let recovery = VmRecovery::new(
        config.host_id.clone(),
        Arc::new(HostNetworkAttacher::new(runner.clone())),
        Arc::new(VirshHypervisor::new(runner)),
        inventory.clone(),
    )
    .with_instances_path(config.instances_path.clone())
    .with_integration_bridge(&config.integration_bridge)
    .with_policy(config.step_failure_policy);

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);

    // Start the heartbeat loop
    let reporter = HeartbeatReporter::new(
        inventory,
        config.host_id.clone(),
        &config.recover_topic,
        config
            .compute_capable
            .then_some(config.compute_topic.as_str()),
    );
    let heartbeat_handle = tokio::spawn(heartbeat::run_heartbeat_loop(
        reporter,
        config.heartbeat_interval,
        shutdown_rx.clone(),
    ));

    // Start the recover manager
    let manager_handle = tokio::spawn(RecoverManager::new(recovery).run(queue_rx, shutdown_rx.clone()));

    // Start the ingress
    let app = api::router(IngressState {
        host: config.host_id.clone(),
        base_topic: config.recover_topic.clone(),
        queue: queue_tx,
    });
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Ingress listening");

    let server_handle = tokio::spawn({
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stop| *stop).await;
                })
                .await
        }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = heartbeat_handle => {
            if let Err(e) = result {
                error!(error = %e, "Heartbeat task panicked");
            }
        }
        result = manager_handle => {
            if let Err(e) = result {
                error!(error = %e, "Recover manager panicked");
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    let shutdown_timeout = std::time::Duration::from_secs(10);
    match tokio::time::timeout(shutdown_timeout, server_handle).await {
        Ok(Ok(Err(e))) => error!(error = %e, "Ingress error"),
        Ok(Err(e)) => error!(error = %e, "Ingress task panicked"),
        Err(_) => warn!("Ingress did not shut down in time"),
        Ok(Ok(Ok(()))) => {}
    }

    info!("Agent shutdown complete");
    Ok(())
}
