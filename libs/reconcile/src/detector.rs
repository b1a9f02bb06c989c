//! Cross-poll host failure detection.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use revive_id::HostId;

use crate::liveness::{HostHeartbeat, Liveness};

/// Result of one detector poll.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    /// Hosts seen within the threshold: feed order, then hosts missing
    /// from the feed.
    pub alive: Vec<HostId>,
    /// Hosts not seen within the threshold, ordered like `alive`.
    pub dead: Vec<HostId>,
    /// Dead hosts that were not already known dead. Only these need
    /// recovery processing this cycle.
    pub newly_dead: Vec<HostId>,
}

/// Failure detector holding the set of hosts currently believed dead.
///
/// The detector also remembers when each host was last seen, so a host
/// that drops out of the feed is judged by its last known report.
///
/// Both live in memory only; after a restart every stale host is
/// reported as newly dead once more.
#[derive(Debug)]
pub struct FailureDetector {
    threshold: Duration,
    dead: BTreeSet<HostId>,
    last_seen: BTreeMap<HostId, DateTime<Utc>>,
}

impl FailureDetector {
    /// Create a detector with an empty dead-host set.
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            dead: BTreeSet::new(),
            last_seen: BTreeMap::new(),
        }
    }

    /// Staleness threshold.
    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Classify the heartbeat feed and update the dead-host set.
    ///
    /// A host listed more than once is judged by its freshest record. A
    /// host seen in an earlier feed but absent from this one is judged by
    /// the last time it was seen.
    pub fn observe<'a, I>(&mut self, heartbeats: I, now: DateTime<Utc>) -> PollOutcome
    where
        I: IntoIterator<Item = &'a HostHeartbeat>,
    {
        let mut order: Vec<(HostId, DateTime<Utc>)> = Vec::new();
        let mut index: HashMap<HostId, usize> = HashMap::new();

        for hb in heartbeats {
            let seen = hb.last_seen();
            match index.get(&hb.host) {
                Some(&i) => {
                    if seen > order[i].1 {
                        order[i].1 = seen;
                    }
                }
                None => {
                    index.insert(hb.host.clone(), order.len());
                    order.push((hb.host.clone(), seen));
                }
            }
        }

        for (host, seen) in &order {
            self.last_seen.insert(host.clone(), *seen);
        }
        let missing: Vec<(HostId, DateTime<Utc>)> = self
            .last_seen
            .iter()
            .filter(|(host, _)| !index.contains_key(*host))
            .map(|(host, seen)| (host.clone(), *seen))
            .collect();

        let mut outcome = PollOutcome::default();
        for (host, last_seen) in order.into_iter().chain(missing) {
            match Liveness::classify(now, last_seen, self.threshold) {
                Liveness::Alive => outcome.alive.push(host),
                Liveness::Dead => outcome.dead.push(host),
            }
        }

        for host in &outcome.dead {
            if self.dead.insert(host.clone()) {
                outcome.newly_dead.push(host.clone());
            }
        }

        for host in &outcome.alive {
            self.dead.remove(host);
        }

        outcome
    }

    /// Drop a host from the dead-host set so the next poll that finds it
    /// dead reports it as newly dead again.
    pub fn forget(&mut self, host: &HostId) -> bool {
        self.dead.remove(host)
    }

    /// Returns true if the host is in the dead-host set.
    pub fn is_known_dead(&self, host: &HostId) -> bool {
        self.dead.contains(host)
    }

    /// Hosts currently believed dead.
    pub fn known_dead(&self) -> impl Iterator<Item = &HostId> {
        self.dead.iter()
    }
}
