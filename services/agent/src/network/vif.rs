//! VIF plumbing via host networking tools.
//!
//! Renders typed `LinkOp`s into `brctl`, `ip` and `ovs-vsctl` invocations
//! and runs them in order.

use std::sync::Arc;

use async_trait::async_trait;
use revive_networking::{LinkOp, VifPlan};
use tracing::{debug, info};

use crate::command::{run_checked, CommandRunner, HostCommand};
use crate::error::StepError;

/// Applies a network attachment on this host.
#[async_trait]
pub trait NetworkAttacher: Send + Sync {
    /// Create every device and switch port in `plan`, in order.
    async fn attach(&self, plan: &VifPlan) -> Result<(), StepError>;
}

/// `NetworkAttacher` backed by host networking commands.
pub struct HostNetworkAttacher {
    runner: Arc<dyn CommandRunner>,
}

impl HostNetworkAttacher {
    /// Create an attacher running commands through `runner`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl NetworkAttacher for HostNetworkAttacher {
    async fn attach(&self, plan: &VifPlan) -> Result<(), StepError> {
        info!(
            bridge = %plan.devices.bridge,
            veth = %plan.devices.bridge_veth,
            peer = %plan.devices.switch_veth,
            "Creating VIF devices"
        );

        for op in &plan.ops {
            let command = render_link_op(op);
            match run_checked(self.runner.as_ref(), &command).await {
                Ok(_) => debug!(op = %op, "Link operation applied"),
                // Devices left over from an earlier attempt are reused
                Err(StepError::CommandFailed { ref stderr, .. })
                    if already_applied(op, stderr) =>
                {
                    debug!(op = %op, "Link operation already applied");
                }
                Err(e) => return Err(e),
            }
        }

        debug!(bridge = %plan.devices.bridge, "VIF devices created");
        Ok(())
    }
}

/// Returns true if `stderr` says `op` failed only because an earlier run
/// already applied it.
fn already_applied(op: &LinkOp, stderr: &str) -> bool {
    match op {
        LinkOp::CreateBridge { .. } | LinkOp::CreateVethPair { .. } => stderr.contains("exists"),
        LinkOp::AddBridgePort { .. } => stderr.contains("already a member"),
        _ => false,
    }
}

/// The host command that applies `op`.
pub fn render_link_op(op: &LinkOp) -> HostCommand {
    match op {
        LinkOp::CreateBridge { bridge } => HostCommand::new("brctl").arg("addbr").arg(bridge),
        LinkOp::CreateVethPair { name, peer } => HostCommand::new("ip")
            .args(["link", "add"])
            .arg(name)
            .args(["type", "veth", "peer", "name"])
            .arg(peer),
        LinkOp::SetLinkUp { device } => HostCommand::new("ip")
            .args(["link", "set"])
            .arg(device)
            .arg("up"),
        LinkOp::SetPromiscuous { device } => HostCommand::new("ip")
            .args(["link", "set"])
            .arg(device)
            .args(["promisc", "on"]),
        LinkOp::AddBridgePort { bridge, device } => HostCommand::new("brctl")
            .arg("addif")
            .arg(bridge)
            .arg(device),
        LinkOp::AttachSwitchPort {
            switch,
            device,
            port_id,
            mac_address,
            vm_uuid,
        } => HostCommand::new("ovs-vsctl")
            .args(["--", "--may-exist", "add-port"])
            .arg(switch)
            .arg(device)
            .args(["--", "set", "Interface"])
            .arg(device)
            .arg(format!("external-ids:iface-id={port_id}"))
            .arg("external-ids:iface-status=active")
            .arg(format!("external-ids:attached-mac={mac_address}"))
            .arg(format!("external-ids:vm-uuid={vm_uuid}")),
    }
}
