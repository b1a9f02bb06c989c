//! Cluster inventory store.
//!
//! The inventory is the source of truth both services share:
//!
//! - `services`: one row per (host, topic) with registration and last
//!   report timestamps. The monitor reads these as heartbeats.
//! - `instances`: VM placement (`host`, `launched_on`).
//! - `instance_info_caches`: the serialized network descriptor of a VM.
//!
//! The `Inventory` trait is the capability the services depend on;
//! `SqliteInventory` is the bundled implementation.

mod error;
mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revive_id::{HostId, InstanceUuid};

pub use error::InventoryError;
pub use revive_reconcile::HostHeartbeat;
pub use sqlite::SqliteInventory;

/// A virtual machine as recorded in the inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    /// Inventory UUID.
    pub uuid: InstanceUuid,
    /// Hypervisor domain name (e.g. `instance-0000002a`).
    pub name: String,
    /// Host the VM is placed on.
    pub host: Option<HostId>,
    /// Host the VM was last launched on.
    pub launched_on: Option<HostId>,
}

/// Inventory store capability.
#[async_trait]
pub trait Inventory: Send + Sync {
    /// List heartbeat records of every service registered under `topic`.
    async fn list_services_by_topic(&self, topic: &str) -> Result<Vec<HostHeartbeat>, InventoryError>;

    /// List the instances placed on `host`.
    async fn list_instances_by_host(&self, host: &HostId) -> Result<Vec<Instance>, InventoryError>;

    /// Fetch the serialized network descriptor of an instance.
    async fn get_network_info(&self, uuid: &InstanceUuid) -> Result<String, InventoryError>;

    /// Record `host` as both the placement and launch host of an instance.
    async fn update_instance_host(
        &self,
        uuid: &InstanceUuid,
        host: &HostId,
    ) -> Result<(), InventoryError>;

    /// Record a liveness report for (host, topic), registering the service
    /// on first report.
    async fn report_service_heartbeat(
        &self,
        host: &HostId,
        topic: &str,
        now: DateTime<Utc>,
    ) -> Result<(), InventoryError>;
}
