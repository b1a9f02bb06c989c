//! Network path reconstruction for recovered VMs.
//!
//! A recovered VM gets the same hybrid plumbing it had on its old host:
//!
//! ```text
//! VM tap ── qbr<port> (Linux bridge) ── qvb<port> ══ qvo<port> ── br-int (virtual switch)
//! ```
//!
//! The bridge carries the per-port filtering; the veth pair links it to the
//! integration switch, where the port is tagged with its port id, MAC and
//! VM so the network service can claim it.

mod vif;

pub use vif::{render_link_op, HostNetworkAttacher, NetworkAttacher};
