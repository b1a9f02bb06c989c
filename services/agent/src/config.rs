//! Configuration for the recovery agent.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use revive_id::HostId;

use crate::driver::DriverKind;
use crate::recovery::{StepFailurePolicy, DEFAULT_INSTANCES_PATH, DEFAULT_INTEGRATION_BRIDGE};

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name this host reports and is addressed by.
    pub host_id: HostId,

    /// Path of the shared inventory database.
    pub inventory_path: String,

    /// Ingress listen address.
    pub listen_addr: SocketAddr,

    /// Topic this agent heartbeats and listens under.
    pub recover_topic: String,

    /// Topic reported when the host can run VMs.
    pub compute_topic: String,

    /// Whether this host is a valid recovery destination.
    pub compute_capable: bool,

    /// Heartbeat interval.
    pub heartbeat_interval: Duration,

    /// How host commands are executed.
    pub driver: DriverKind,

    /// Prefix host commands with `sudo -n`.
    pub use_sudo: bool,

    pub step_failure_policy: StepFailurePolicy,

    /// Directory holding `{vm_name}/libvirt.xml`.
    pub instances_path: PathBuf,

    /// Virtual switch recovered ports attach to.
    pub integration_bridge: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let host_id = host_id()?;

        let inventory_path = std::env::var("REVIVE_INVENTORY_PATH")
            .unwrap_or_else(|_| "/var/lib/revive/inventory.db".to_string());

        let listen_addr = std::env::var("REVIVE_LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8470".to_string())
            .parse::<SocketAddr>()
            .context("REVIVE_LISTEN_ADDR must be a socket address")?;

        let recover_topic =
            std::env::var("REVIVE_RECOVER_TOPIC").unwrap_or_else(|_| "recover".to_string());
        let compute_topic =
            std::env::var("REVIVE_COMPUTE_TOPIC").unwrap_or_else(|_| "compute".to_string());
        let compute_capable = env_bool("REVIVE_COMPUTE_CAPABLE", true)?;

        let heartbeat_interval_secs: u64 = match std::env::var("REVIVE_HEARTBEAT_INTERVAL") {
            Ok(value) => value
                .parse::<u64>()
                .with_context(|| format!("REVIVE_HEARTBEAT_INTERVAL must be seconds, got '{value}'"))?,
            Err(_) => 10,
        };

        let driver = match std::env::var("REVIVE_RECOVER_DRIVER") {
            Ok(value) => value.parse::<DriverKind>().map_err(|e| anyhow!(e))?,
            Err(_) => DriverKind::default(),
        };
        let use_sudo = env_bool("REVIVE_USE_SUDO", true)?;

        let step_failure_policy = match std::env::var("REVIVE_STEP_FAILURE_POLICY") {
            Ok(value) => value
                .parse::<StepFailurePolicy>()
                .map_err(|e| anyhow!(e))?,
            Err(_) => StepFailurePolicy::default(),
        };

        let instances_path: PathBuf = std::env::var("REVIVE_INSTANCES_PATH")
            .unwrap_or_else(|_| DEFAULT_INSTANCES_PATH.to_string())
            .into();
        let integration_bridge = std::env::var("REVIVE_INTEGRATION_BRIDGE")
            .unwrap_or_else(|_| DEFAULT_INTEGRATION_BRIDGE.to_string());

        let log_level = std::env::var("REVIVE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            host_id,
            inventory_path,
            listen_addr,
            recover_topic,
            compute_topic,
            compute_capable,
            heartbeat_interval: Duration::from_secs(heartbeat_interval_secs),
            driver,
            use_sudo,
            step_failure_policy,
            instances_path,
            integration_bridge,
            log_level,
        })
    }
}

/// `REVIVE_HOST_ID`, else the system host name.
fn host_id() -> Result<HostId> {
    let name = std::env::var("REVIVE_HOST_ID")
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .or_else(|| std::env::var("HOSTNAME").ok())
        .ok_or_else(|| anyhow!("cannot determine host name; set REVIVE_HOST_ID"))?;

    HostId::parse(&name).with_context(|| format!("invalid host name '{name}'"))
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match std::env::var(name) {
        Ok(value) => parse_bool(&value).with_context(|| format!("{name} must be true or false")),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("'{other}' is not a boolean")),
    }
}
