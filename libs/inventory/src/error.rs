//! Inventory errors.

use thiserror::Error;

/// Errors from inventory operations.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    Invalid(String),

    #[error("inventory connection lock poisoned")]
    Poisoned,

    #[error("inventory task failed: {0}")]
    Task(String),
}
