//! revive recovery agent library
//!
//! The agent runs on every compute host. It reports the host's liveness to
//! the inventory and rebuilds VMs from dead hosts when the monitor picks
//! this host as their destination.
//!
//! ## Architecture
//!
//! ```text
//! ingress (POST /v1/cast/recover.<host>)
//!     └── queue ──> RecoverManager ──> VmRecovery
//!                                        ├── NetworkAttacher  (bridge, veth, switch port)
//!                                        ├── Hypervisor       (define, start)
//!                                        └── Inventory        (commit location)
//! heartbeat loop ──> Inventory (recover / compute topics)
//! ```
//!
//! ## Modules
//!
//! - `command`: host command execution (system, dry-run, mock)
//! - `network`: VIF plumbing
//! - `domain`: domain descriptor rewriting and hypervisor control
//! - `recovery`: the per-VM recovery state machine
//! - `manager`: message handling loop
//! - `heartbeat`: liveness reporting
//! - `api`: HTTP ingress

pub mod api;
pub mod command;
pub mod config;
pub mod domain;
pub mod driver;
pub mod error;
pub mod heartbeat;
pub mod manager;
pub mod network;
pub mod recovery;

pub use command::{CommandRunner, HostCommand, MockCommandRunner};
pub use error::StepError;
pub use manager::RecoverManager;
pub use recovery::{RecoveryReport, RecoveryState, RecoveryStep, StepFailurePolicy, VmRecovery};
