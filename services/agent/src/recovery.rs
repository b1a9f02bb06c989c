//! VM recovery state machine.
//!
//! ```text
//! PendingNetwork ──attach──> NetworkAttached ──define──> DomainDefined
//!        │                         │                          │
//!        └──────────┬──────────────┴───────────┬──────────────┘
//!                   v                          │ start
//!                Failed <──────────────────  DomainRunning ──commit──> LocationCommitted
//! ```
//!
//! Each transition is one external action against this host. Nothing is
//! rolled back on failure; network objects created by a failed run are
//! reused by the next one.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use revive_bus::RecoverVmRequest;
use revive_id::{HostId, InstanceUuid};
use revive_inventory::Inventory;
use revive_networking::{NetworkAttachment, VifPlan};
use tracing::{error, info, instrument, warn};

use crate::domain::{DomainDescriptor, Hypervisor};
use crate::error::StepError;
use crate::network::NetworkAttacher;

/// Default directory holding per-VM descriptor directories.
pub const DEFAULT_INSTANCES_PATH: &str = "/var/lib/nova/instances";

/// Default integration switch.
pub const DEFAULT_INTEGRATION_BRIDGE: &str = "br-int";

/// One external action of a recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStep {
    AttachNetwork,
    DefineDomain,
    StartDomain,
    CommitLocation,
}

impl RecoveryStep {
    /// All steps in execution order.
    pub const ALL: [RecoveryStep; 4] = [
        RecoveryStep::AttachNetwork,
        RecoveryStep::DefineDomain,
        RecoveryStep::StartDomain,
        RecoveryStep::CommitLocation,
    ];

    /// State reached when this step succeeds.
    pub fn completes(self) -> RecoveryState {
        match self {
            Self::AttachNetwork => RecoveryState::NetworkAttached,
            Self::DefineDomain => RecoveryState::DomainDefined,
            Self::StartDomain => RecoveryState::DomainRunning,
            Self::CommitLocation => RecoveryState::LocationCommitted,
        }
    }
}

impl fmt::Display for RecoveryStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AttachNetwork => "attach_network",
            Self::DefineDomain => "define_domain",
            Self::StartDomain => "start_domain",
            Self::CommitLocation => "commit_location",
        };
        f.write_str(name)
    }
}

/// Recovery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    PendingNetwork,
    NetworkAttached,
    DomainDefined,
    DomainRunning,
    /// Terminal success.
    LocationCommitted,
    /// Terminal failure at `step`.
    Failed { step: RecoveryStep },
}

impl RecoveryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::LocationCommitted | Self::Failed { .. })
    }
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PendingNetwork => write!(f, "pending_network"),
            Self::NetworkAttached => write!(f, "network_attached"),
            Self::DomainDefined => write!(f, "domain_defined"),
            Self::DomainRunning => write!(f, "domain_running"),
            Self::LocationCommitted => write!(f, "location_committed"),
            Self::Failed { step } => write!(f, "failed({step})"),
        }
    }
}

/// What to do when a step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StepFailurePolicy {
    /// Skip the remaining steps.
    #[default]
    Abort,
    /// Attempt every step regardless of earlier failures.
    Continue,
}

impl FromStr for StepFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "continue" => Ok(Self::Continue),
            other => Err(format!(
                "unknown step failure policy '{other}' (expected abort or continue)"
            )),
        }
    }
}

/// A failed step and why.
#[derive(Debug)]
pub struct StepFailure {
    pub step: RecoveryStep,
    pub error: StepError,
}

/// Outcome of one recovery.
#[derive(Debug)]
pub struct RecoveryReport {
    pub vm_uuid: InstanceUuid,
    pub vm_name: String,
    pub destination: HostId,
    pub state: RecoveryState,
    /// Steps that ran, in order.
    pub attempted: Vec<RecoveryStep>,
    pub failures: Vec<StepFailure>,
}

impl RecoveryReport {
    pub fn is_success(&self) -> bool {
        self.state == RecoveryState::LocationCommitted
    }

    /// The step the recovery failed at, if any.
    pub fn failed_step(&self) -> Option<RecoveryStep> {
        match self.state {
            RecoveryState::Failed { step } => Some(step),
            _ => None,
        }
    }
}

/// Executes recoveries on this host.
pub struct VmRecovery {
    host: HostId,
    network: Arc<dyn NetworkAttacher>,
    hypervisor: Arc<dyn Hypervisor>,
    inventory: Arc<dyn Inventory>,
    instances_path: PathBuf,
    integration_bridge: String,
    policy: StepFailurePolicy,
}

impl VmRecovery {
    /// Create a recovery executor for `host` with default paths and the
    /// abort policy.
    pub fn new(
        host: HostId,
        network: Arc<dyn NetworkAttacher>,
        hypervisor: Arc<dyn Hypervisor>,
        inventory: Arc<dyn Inventory>,
    ) -> Self {
        Self {
            host,
            network,
            hypervisor,
            inventory,
            instances_path: PathBuf::from(DEFAULT_INSTANCES_PATH),
            integration_bridge: DEFAULT_INTEGRATION_BRIDGE.to_string(),
            policy: StepFailurePolicy::default(),
        }
    }

    pub fn with_instances_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.instances_path = path.into();
        self
    }

    pub fn with_integration_bridge(mut self, bridge: &str) -> Self {
        self.integration_bridge = bridge.to_string();
        self
    }

    pub fn with_policy(mut self, policy: StepFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn host(&self) -> &HostId {
        &self.host
    }

    pub fn policy(&self) -> StepFailurePolicy {
        self.policy
    }

    /// Recover the VM described by `request` onto this host.
    #[instrument(skip(self, request), fields(vm_uuid = %request.vm_uuid, vm_name = %request.vm_name))]
    pub async fn run(&self, request: &RecoverVmRequest) -> RecoveryReport {
        let mut report = RecoveryReport {
            vm_uuid: request.vm_uuid,
            vm_name: request.vm_name.clone(),
            destination: self.host.clone(),
            state: RecoveryState::PendingNetwork,
            attempted: Vec::new(),
            failures: Vec::new(),
        };

        info!(policy = ?self.policy, "Recovery started");

        for step in RecoveryStep::ALL {
            if matches!(report.state, RecoveryState::Failed { .. })
                && self.policy == StepFailurePolicy::Abort
            {
                break;
            }

            report.attempted.push(step);
            match self.execute(step, request).await {
                Ok(()) => {
                    if !matches!(report.state, RecoveryState::Failed { .. }) {
                        report.state = step.completes();
                    }
                    info!(step = %step, "Recovery step complete");
                }
                Err(error) => {
                    warn!(step = %step, error = %error, "Recovery step failed");
                    if !matches!(report.state, RecoveryState::Failed { .. }) {
                        report.state = RecoveryState::Failed { step };
                    }
                    report.failures.push(StepFailure { step, error });
                }
            }
        }

        if report.is_success() {
            info!(host = %self.host, "Recovery complete");
        } else {
            error!(
                state = %report.state,
                failures = report.failures.len(),
                "Recovery failed"
            );
        }

        report
    }

    async fn execute(&self, step: RecoveryStep, request: &RecoverVmRequest) -> Result<(), StepError> {
        match step {
            RecoveryStep::AttachNetwork => {
                let attachment =
                    NetworkAttachment::new(request.port_id, request.port_mac.clone());
                let plan =
                    VifPlan::for_attachment(&attachment, request.vm_uuid, &self.integration_bridge);
                self.network.attach(&plan).await
            }
            RecoveryStep::DefineDomain => {
                let descriptor =
                    DomainDescriptor::for_instance(&self.instances_path, &request.vm_name);
                descriptor.strip_filter_refs().await?;
                self.hypervisor.define_domain(descriptor.path()).await
            }
            RecoveryStep::StartDomain => self.hypervisor.start_domain(&request.vm_name).await,
            RecoveryStep::CommitLocation => {
                self.inventory
                    .update_instance_host(&request.vm_uuid, &self.host)
                    .await?;
                Ok(())
            }
        }
    }
}
