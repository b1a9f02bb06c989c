//! # revive-id
//!
//! Typed identifiers shared by the monitor and the agent.
//!
//! ## Identifier kinds
//!
//! - `HostId`: the name a compute host registers its services under
//!   (e.g. `compute-07.rack2`). Host names are operator-controlled labels,
//!   so they are validated but never generated.
//! - `InstanceUuid`: the inventory UUID of a virtual machine.
//! - `PortId`: the UUID of the network port a VM is attached through.
//!
//! UUID-based identifiers always render in canonical hyphenated lowercase
//! form, which is what device naming and the inventory store rely on.

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export uuid for consumers that need raw UUID operations
pub use uuid::Uuid;
