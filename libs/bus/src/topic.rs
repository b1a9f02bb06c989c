//! Topic addressing.

use revive_id::HostId;

/// Base topic agents listen under.
pub const DEFAULT_RECOVER_TOPIC: &str = "recover";

/// Topic addressing the agent on `host`.
pub fn host_topic(base: &str, host: &HostId) -> String {
    format!("{base}.{host}")
}

/// Host part of a host-addressed topic, if `topic` is under `base`.
pub fn topic_host(base: &str, topic: &str) -> Option<HostId> {
    let host = topic.strip_prefix(base)?.strip_prefix('.')?;
    HostId::parse(host).ok()
}
