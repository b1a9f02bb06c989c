//! Round-robin selection of recovery destinations.

use std::collections::HashSet;

use revive_id::HostId;
use thiserror::Error;

/// Scheduling errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    /// No alive host is a valid compute target.
    #[error("no eligible host among {alive} alive hosts")]
    NoEligibleHost { alive: usize },
}

/// Picks destination hosts by rotating a cursor over the alive hosts.
///
/// The cursor only ever moves forward and is shared by every call, so over
/// many calls recovered VMs spread evenly over alive eligible hosts. Load,
/// capacity and affinity are not considered.
#[derive(Debug, Default)]
pub struct RecoveryScheduler {
    cursor: u64,
}

impl RecoveryScheduler {
    /// Create a scheduler with the cursor at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scheduler starting at a given cursor.
    pub fn with_cursor(cursor: u64) -> Self {
        Self { cursor }
    }

    /// Current cursor position.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Select the next alive host that is also eligible.
    ///
    /// At most `alive.len()` candidates are examined; the cursor advances
    /// once per candidate, including on failure.
    pub fn select_destination(
        &mut self,
        alive: &[HostId],
        eligible: &HashSet<HostId>,
    ) -> Result<HostId, ScheduleError> {
        let len = alive.len() as u64;

        for _ in 0..len {
            let candidate = &alive[(self.cursor % len) as usize];
            self.cursor = self.cursor.wrapping_add(1);
            if eligible.contains(candidate) {
                return Ok(candidate.clone());
            }
        }

        Err(ScheduleError::NoEligibleHost { alive: alive.len() })
    }
}
