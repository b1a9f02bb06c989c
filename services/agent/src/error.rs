//! Errors from recovery steps.

use std::io;
use std::path::PathBuf;

use revive_inventory::InventoryError;
use thiserror::Error;

/// Failure of a single recovery step.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("`{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to execute `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("domain descriptor {}: {source}", path.display())]
    Descriptor {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("inventory update failed: {0}")]
    Inventory(#[from] InventoryError),
}
