//! Configuration for the monitor.

use std::time::Duration;

use anyhow::{Context, Result};

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path of the shared inventory database.
    pub inventory_path: String,

    /// A host silent for longer than this is dead.
    pub service_down_time: Duration,

    /// Interval between polls.
    pub poll_interval: Duration,

    /// Topic agents heartbeat and listen under.
    pub recover_topic: String,

    /// Topic of services that can host VMs.
    pub compute_topic: String,

    /// Agent ingress URL, with `{host}` standing for the destination host.
    pub agent_url_template: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let inventory_path = std::env::var("REVIVE_INVENTORY_PATH")
            .unwrap_or_else(|_| "/var/lib/revive/inventory.db".to_string());

        let service_down_time = env_secs("REVIVE_SERVICE_DOWN_TIME", 60)?;
        let poll_interval = env_secs("REVIVE_POLL_INTERVAL", 10)?;

        let recover_topic =
            std::env::var("REVIVE_RECOVER_TOPIC").unwrap_or_else(|_| "recover".to_string());
        let compute_topic =
            std::env::var("REVIVE_COMPUTE_TOPIC").unwrap_or_else(|_| "compute".to_string());

        let agent_url_template = std::env::var("REVIVE_AGENT_URL_TEMPLATE")
            .unwrap_or_else(|_| "http://{host}:8470".to_string());

        let log_level = std::env::var("REVIVE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            inventory_path,
            service_down_time,
            poll_interval,
            recover_topic,
            compute_topic,
            agent_url_template,
            log_level,
        })
    }
}

fn env_secs(name: &str, default: u64) -> Result<Duration> {
    match std::env::var(name) {
        Ok(value) => {
            let secs: u64 = value
                .parse::<u64>()
                .with_context(|| format!("{name} must be a number of seconds, got '{value}'"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default)),
    }
}
