//! In-process transport.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

use crate::caster::{Caster, DispatchError};
use crate::message::CastMessage;

/// Per-topic queue depth.
const QUEUE_DEPTH: usize = 64;

/// Topic registry delivering casts over channels within one process.
#[derive(Default)]
pub struct LocalBus {
    routes: RwLock<HashMap<String, mpsc::Sender<CastMessage>>>,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start consuming `topic`. A later subscription to the same topic
    /// replaces the earlier one.
    pub async fn subscribe(&self, topic: &str) -> mpsc::Receiver<CastMessage> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        self.routes.write().await.insert(topic.to_string(), tx);
        debug!(topic = %topic, "Subscribed to topic");
        rx
    }
}

#[async_trait]
impl Caster for LocalBus {
    async fn cast(&self, topic: &str, message: CastMessage) -> Result<(), DispatchError> {
        let routes = self.routes.read().await;
        let Some(tx) = routes.get(topic) else {
            return Err(DispatchError::Unavailable {
                topic: topic.to_string(),
                reason: "no subscriber".to_string(),
            });
        };

        tx.try_send(message).map_err(|e| DispatchError::Unavailable {
            topic: topic.to_string(),
            reason: e.to_string(),
        })
    }
}
