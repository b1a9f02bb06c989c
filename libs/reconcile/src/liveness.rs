//! Heartbeat staleness classification.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use revive_id::HostId;
use serde::{Deserialize, Serialize};

/// The last-seen record of one monitored service on one host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostHeartbeat {
    /// Host the service runs on.
    pub host: HostId,
    /// Service kind (topic) the record belongs to.
    pub topic: String,
    /// When the service first registered.
    pub created_at: DateTime<Utc>,
    /// When the service last reported, if ever.
    pub updated_at: Option<DateTime<Utc>>,
}

impl HostHeartbeat {
    /// Last time the host was seen: the last report, or registration if it
    /// never reported.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.updated_at.unwrap_or(self.created_at)
    }
}

/// Liveness of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Seen within the threshold.
    Alive,
    /// Not seen within the threshold.
    Dead,
}

impl Liveness {
    /// Classify a host last seen at `last_seen`.
    ///
    /// Staleness is the absolute distance between `now` and `last_seen`, so
    /// a timestamp slightly ahead of the local clock counts the same as one
    /// slightly behind. The boundary is inclusive: staleness equal to the
    /// threshold is still alive.
    pub fn classify(now: DateTime<Utc>, last_seen: DateTime<Utc>, threshold: Duration) -> Self {
        let threshold = TimeDelta::from_std(threshold).unwrap_or(TimeDelta::MAX);
        let staleness = (now - last_seen).abs();
        if staleness <= threshold {
            Self::Alive
        } else {
            Self::Dead
        }
    }

    /// Returns true if alive.
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }
}
