//! Heartbeat loop for reporting this host's liveness.
//!
//! The agent records a report under the recover topic every interval; the
//! monitor reads these reports to decide which hosts are dead. A
//! compute-capable host also reports under the compute topic, which makes
//! it eligible as a recovery destination.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use revive_id::HostId;
use revive_inventory::{Inventory, InventoryError};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Consecutive failures logged as warnings before escalating to errors.
const WARN_FAILURES: u32 = 3;

/// Reports liveness of one host under a set of topics.
pub struct HeartbeatReporter {
    inventory: Arc<dyn Inventory>,
    host: HostId,
    topics: Vec<String>,
}

impl HeartbeatReporter {
    /// Report under `recover_topic`, and also under `compute_topic` if set.
    pub fn new(
        inventory: Arc<dyn Inventory>,
        host: HostId,
        recover_topic: &str,
        compute_topic: Option<&str>,
    ) -> Self {
        let mut topics = vec![recover_topic.to_string()];
        topics.extend(compute_topic.map(str::to_string));
        Self {
            inventory,
            host,
            topics,
        }
    }

    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Record one report per topic at `now`.
    pub async fn report_once(&self, now: DateTime<Utc>) -> Result<(), InventoryError> {
        for topic in &self.topics {
            self.inventory
                .report_service_heartbeat(&self.host, topic, now)
                .await?;
        }
        Ok(())
    }
}

/// Run the heartbeat loop until shutdown. The first report is sent
/// immediately.
pub async fn run_heartbeat_loop(
    reporter: HeartbeatReporter,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        host = %reporter.host,
        topics = ?reporter.topics,
        interval_secs = interval.as_secs(),
        "Starting heartbeat loop"
    );

    let mut consecutive_failures = 0u32;
    let mut interval_timer = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {
                match reporter.report_once(Utc::now()).await {
                    Ok(()) => {
                        if consecutive_failures > 0 {
                            info!(consecutive_failures, "Heartbeat recovered");
                        }
                        consecutive_failures = 0;
                        debug!("Heartbeat recorded");
                    }
                    Err(e) => {
                        consecutive_failures += 1;
                        if consecutive_failures <= WARN_FAILURES {
                            warn!(
                                error = %e,
                                consecutive_failures,
                                "Heartbeat failed"
                            );
                        } else {
                            error!(
                                error = %e,
                                consecutive_failures,
                                "Heartbeat failed repeatedly"
                            );
                        }
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("Heartbeat loop shutting down");
                    break;
                }
            }
        }
    }
}
