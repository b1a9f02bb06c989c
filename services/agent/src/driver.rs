//! Execution driver selection.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::command::{CommandRunner, DryRunRunner, SystemCommandRunner};

/// How host commands are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriverKind {
    /// Run commands against the local hypervisor and network stack.
    #[default]
    Libvirt,
    /// Log commands without running them.
    DryRun,
}

impl FromStr for DriverKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "libvirt" => Ok(Self::Libvirt),
            "dry-run" | "dryrun" | "dry_run" => Ok(Self::DryRun),
            other => Err(format!("unknown driver '{other}' (expected libvirt or dry-run)")),
        }
    }
}

impl fmt::Display for DriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Libvirt => write!(f, "libvirt"),
            Self::DryRun => write!(f, "dry-run"),
        }
    }
}

/// Build the command runner for `kind`.
pub fn command_runner(kind: DriverKind, use_sudo: bool) -> Arc<dyn CommandRunner> {
    match kind {
        DriverKind::Libvirt => Arc::new(SystemCommandRunner::new(use_sudo)),
        DriverKind::DryRun => Arc::new(DryRunRunner),
    }
}
