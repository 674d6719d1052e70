//! Ledger error types

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger layer errors
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Concurrent update lost: {0}")]
    ConcurrentUpdate(String),

    /// An invariant violation was detected on read. Fatal: the engine
    /// halts rather than risk a double-spend.
    #[error("Ledger corruption: {0}")]
    Corruption(String),
}
