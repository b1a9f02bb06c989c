//! Recovery decision primitives.
//!
//! This library holds the pure, synchronous parts of the recovery loop:
//!
//! - **Liveness**: classifying a heartbeat as alive or dead against a
//!   staleness threshold.
//! - **Failure detection**: remembering which hosts are already known dead
//!   so an outage is acted on once, not on every poll.
//! - **Scheduling**: choosing a destination host for a VM by rotating over
//!   the alive hosts.
//!
//! # Invariants
//!
//! - Decisions are deterministic given the same inputs and state
//! - A host is either alive or dead after each poll, never both
//! - State is owned by the detector/scheduler values; there are no globals

mod detector;
mod liveness;
mod scheduler;

pub use detector::{FailureDetector, PollOutcome};
pub use liveness::{HostHeartbeat, Liveness};
pub use scheduler::{RecoveryScheduler, ScheduleError};
