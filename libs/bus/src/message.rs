//! Wire messages.

use revive_id::{InstanceUuid, PortId};
use revive_networking::MacAddress;
use serde::{Deserialize, Serialize};

/// Version stamped on every message.
pub const RPC_API_VERSION: &str = "1.0";

/// Method name of a VM recovery request.
pub const RECOVER_VM: &str = "recover_vm";

/// Envelope of a cast: a method name and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastMessage {
    pub method: String,
    pub version: String,
    pub args: serde_json::Value,
}

impl CastMessage {
    /// Build a `recover_vm` cast.
    pub fn recover_vm(request: &RecoverVmRequest) -> Result<Self, serde_json::Error> {
        Ok(Self {
            method: RECOVER_VM.to_string(),
            version: RPC_API_VERSION.to_string(),
            args: serde_json::to_value(request)?,
        })
    }
}

/// Arguments of `recover_vm`: everything the destination needs to rebuild
/// a VM that ran on a dead host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverVmRequest {
    pub port_id: PortId,
    pub port_mac: MacAddress,
    pub vm_uuid: InstanceUuid,
    pub vm_name: String,
}
