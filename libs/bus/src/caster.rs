//! The cast capability.

use async_trait::async_trait;
use thiserror::Error;

use crate::message::CastMessage;

/// Errors from handing a message to the transport.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The transport could not take the message.
    #[error("dispatch to '{topic}' unavailable: {reason}")]
    Unavailable { topic: String, reason: String },

    /// The topic is not addressed to a host.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
}

/// Fire-and-forget delivery of a message to a topic.
#[async_trait]
pub trait Caster: Send + Sync {
    /// Hand `message` to the transport for `topic`.
    ///
    /// Returning `Ok` means the transport accepted the message, not that it
    /// was executed.
    async fn cast(&self, topic: &str, message: CastMessage) -> Result<(), DispatchError>;
}
