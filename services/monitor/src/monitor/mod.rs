//! Host failure monitoring and recovery dispatch.
//!
//! Each poll:
//! - Reads the heartbeat feed and classifies hosts as alive or dead
//! - Picks out hosts that died since the previous poll
//! - For every VM placed on such a host, selects an alive compute host
//!   and casts a `recover_vm` request to it
//!
//! Recovery itself runs on the destination's agent; nothing here waits
//! for it.

mod poller;
mod worker;

pub use poller::{MonitorError, PollStats, RecoveryMonitor, VmDispatchError};
pub use worker::MonitorWorker;
