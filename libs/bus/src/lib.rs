//! Messaging between the monitor and the recovery agents.
//!
//! Delivery is a *cast*: a message is addressed to a topic, handed to the
//! transport, and forgotten. There is no acknowledgement of execution and
//! no retry; a message is delivered at most once.
//!
//! Each agent listens on `{base}.{host}` (see [`host_topic`]).
//!
//! Two transports are provided:
//! - [`HttpCaster`]: POSTs the message to the agent's ingress, which
//!   accepts it before doing any work.
//! - [`LocalBus`]: an in-process topic registry backed by channels.

mod caster;
mod http;
mod local;
mod message;
mod topic;

pub use caster::{Caster, DispatchError};
pub use http::HttpCaster;
pub use local::LocalBus;
pub use message::{CastMessage, RecoverVmRequest, RECOVER_VM, RPC_API_VERSION};
pub use topic::{host_topic, topic_host, DEFAULT_RECOVER_TOPIC};
