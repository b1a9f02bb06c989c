//! Monitor background worker.
//!
//! Runs the monitoring pass on a periodic interval.

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{error, info, instrument};

use super::poller::RecoveryMonitor;

/// Monitor worker that runs the polling loop.
pub struct MonitorWorker {
    monitor: RecoveryMonitor,
    interval: Duration,
}

impl MonitorWorker {
    /// Create a new monitor worker.
    pub fn new(monitor: RecoveryMonitor, interval: Duration) -> Self {
        Self { monitor, interval }
    }

    /// Run the monitor worker until shutdown is signaled.
    #[instrument(skip(self, shutdown))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            down_time_secs = self.monitor.detector().threshold().as_secs(),
            "Starting monitor worker"
        );

        let mut interval = tokio::time::interval(self.interval);
        // Don't immediately tick on startup - wait for first interval
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.monitor.poll_once(Utc::now()).await {
                        Ok(stats) => {
                            if stats.hosts_newly_dead > 0 {
                                info!(
                                    newly_dead = stats.hosts_newly_dead,
                                    vms_dispatched = stats.vms_dispatched,
                                    vms_failed = stats.vms_failed,
                                    "Monitor poll complete"
                                );
                            }
                        }
                        Err(e) => error!(error = %e, "Monitor poll failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Monitor worker shutting down");
                        break;
                    }
                }
            }
        }
    }
}
