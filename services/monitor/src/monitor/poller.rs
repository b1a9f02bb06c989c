//! A single monitoring pass.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use revive_bus::{host_topic, Caster, CastMessage, DispatchError, RecoverVmRequest};
use revive_id::HostId;
use revive_inventory::{Instance, Inventory, InventoryError};
use revive_networking::{NetworkAttachment, NetworkError};
use revive_reconcile::{FailureDetector, RecoveryScheduler, ScheduleError};
use tracing::{debug, info, instrument, warn};

/// Errors that fail a whole poll.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),
}

/// Errors that stop the recovery of a single VM.
#[derive(Debug, thiserror::Error)]
pub enum VmDispatchError {
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error(transparent)]
    Attachment(#[from] NetworkError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Counters for one poll.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollStats {
    pub hosts_alive: usize,
    pub hosts_dead: usize,
    pub hosts_newly_dead: usize,
    /// Newly dead hosts whose instances could not be listed.
    pub hosts_retried: usize,
    pub vms_dispatched: usize,
    pub vms_failed: usize,
}

/// Owns the failure detector and scheduler state and drives one poll at a
/// time. Construct once per process.
pub struct RecoveryMonitor {
    inventory: Arc<dyn Inventory>,
    caster: Arc<dyn Caster>,
    detector: FailureDetector,
    scheduler: RecoveryScheduler,
    recover_topic: String,
    compute_topic: String,
}

impl RecoveryMonitor {
    /// Create a monitor with an empty dead-host set and a zero cursor.
    pub fn new(
        inventory: Arc<dyn Inventory>,
        caster: Arc<dyn Caster>,
        service_down_time: Duration,
        recover_topic: &str,
        compute_topic: &str,
    ) -> Self {
        Self {
            inventory,
            caster,
            detector: FailureDetector::new(service_down_time),
            scheduler: RecoveryScheduler::new(),
            recover_topic: recover_topic.to_string(),
            compute_topic: compute_topic.to_string(),
        }
    }

    /// Failure detector state.
    pub fn detector(&self) -> &FailureDetector {
        &self.detector
    }

    /// Scheduler state.
    pub fn scheduler(&self) -> &RecoveryScheduler {
        &self.scheduler
    }

    /// Run one poll at `now`.
    ///
    /// Only a failure to read the heartbeat feed or the compute host list
    /// fails the poll, and both are read before any state changes. Every
    /// other error is confined to the host or VM it concerns.
    #[instrument(skip(self))]
    pub async fn poll_once(&mut self, now: DateTime<Utc>) -> Result<PollStats, MonitorError> {
        let heartbeats = self
            .inventory
            .list_services_by_topic(&self.recover_topic)
            .await?;
        let eligible: HashSet<HostId> = self
            .inventory
            .list_services_by_topic(&self.compute_topic)
            .await?
            .into_iter()
            .map(|service| service.host)
            .collect();

        let outcome = self.detector.observe(&heartbeats, now);
        let mut stats = PollStats {
            hosts_alive: outcome.alive.len(),
            hosts_dead: outcome.dead.len(),
            hosts_newly_dead: outcome.newly_dead.len(),
            ..PollStats::default()
        };

        debug!(
            alive = stats.hosts_alive,
            dead = stats.hosts_dead,
            newly_dead = stats.hosts_newly_dead,
            "Heartbeats classified"
        );

        for dead_host in &outcome.newly_dead {
            warn!(host = %dead_host, "Host is dead, recovering its instances");

            let instances = match self.inventory.list_instances_by_host(dead_host).await {
                Ok(instances) => instances,
                Err(e) => {
                    // Retried as newly dead on the next poll
                    self.detector.forget(dead_host);
                    warn!(host = %dead_host, error = %e, "Failed to list instances of dead host");
                    stats.hosts_retried += 1;
                    continue;
                }
            };

            for instance in instances {
                match self.dispatch_recovery(&instance, &outcome.alive, &eligible).await {
                    Ok(destination) => {
                        info!(
                            vm_uuid = %instance.uuid,
                            vm_name = %instance.name,
                            from = %dead_host,
                            to = %destination,
                            "Recovery dispatched"
                        );
                        stats.vms_dispatched += 1;
                    }
                    Err(e) => {
                        warn!(
                            vm_uuid = %instance.uuid,
                            vm_name = %instance.name,
                            host = %dead_host,
                            error = %e,
                            "Failed to dispatch recovery"
                        );
                        stats.vms_failed += 1;
                    }
                }
            }
        }

        Ok(stats)
    }

    /// Resolve the attachment, pick a destination and cast the request.
    async fn dispatch_recovery(
        &mut self,
        instance: &Instance,
        alive: &[HostId],
        eligible: &HashSet<HostId>,
    ) -> Result<HostId, VmDispatchError> {
        let descriptor = self.inventory.get_network_info(&instance.uuid).await?;
        let attachment = NetworkAttachment::parse(&descriptor)?;
        let destination = self.scheduler.select_destination(alive, eligible)?;

        let request = RecoverVmRequest {
            port_id: attachment.port_id(),
            port_mac: attachment.mac_address().clone(),
            vm_uuid: instance.uuid,
            vm_name: instance.name.clone(),
        };
        let topic = host_topic(&self.recover_topic, &destination);
        self.caster
            .cast(&topic, CastMessage::recover_vm(&request)?)
            .await?;

        Ok(destination)
    }
}
