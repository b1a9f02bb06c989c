//! Message handling loop.
//!
//! Consumes casts addressed to this host and runs recoveries one at a
//! time. A bad message or a failed recovery is logged and the loop moves
//! on to the next message.

use revive_bus::{CastMessage, RecoverVmRequest, RECOVER_VM, RPC_API_VERSION};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::domain::is_valid_vm_name;
use crate::recovery::{RecoveryReport, VmRecovery};

/// Reasons a message is not acted on.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    #[error("unsupported version '{0}'")]
    UnsupportedVersion(String),

    #[error("invalid arguments: {0}")]
    InvalidArgs(#[from] serde_json::Error),

    #[error("invalid vm name '{0}'")]
    InvalidVmName(String),
}

/// Dispatches incoming casts to the recovery executor.
pub struct RecoverManager {
    recovery: VmRecovery,
}

impl RecoverManager {
    pub fn new(recovery: VmRecovery) -> Self {
        Self { recovery }
    }

    /// Decode a cast into a recovery request.
    pub fn decode(message: CastMessage) -> Result<RecoverVmRequest, MessageError> {
        if message.method != RECOVER_VM {
            return Err(MessageError::UnknownMethod(message.method));
        }
        if major(&message.version) != major(RPC_API_VERSION) {
            return Err(MessageError::UnsupportedVersion(message.version));
        }

        let request: RecoverVmRequest = serde_json::from_value(message.args)?;
        if !is_valid_vm_name(&request.vm_name) {
            return Err(MessageError::InvalidVmName(request.vm_name));
        }
        Ok(request)
    }

    /// Handle one message. Returns the report if a recovery ran.
    pub async fn handle(&self, message: CastMessage) -> Option<RecoveryReport> {
        let method = message.method.clone();
        match Self::decode(message) {
            Ok(request) => Some(self.recovery.run(&request).await),
            Err(e) => {
                warn!(method = %method, error = %e, "Discarding message");
                None
            }
        }
    }

    /// Process messages until the queue closes or shutdown is signaled.
    pub async fn run(
        self,
        mut messages: mpsc::Receiver<CastMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(host = %self.recovery.host(), "Starting recover manager");

        loop {
            tokio::select! {
                message = messages.recv() => {
                    let Some(message) = message else {
                        debug!("Message queue closed");
                        break;
                    };
                    if let Some(report) = self.handle(message).await {
                        debug!(
                            vm_uuid = %report.vm_uuid,
                            state = %report.state,
                            "Recovery finished"
                        );
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Recover manager shutting down");
                        break;
                    }
                }
            }
        }
    }
}

fn major(version: &str) -> &str {
    version.split('.').next().unwrap_or(version)
}
