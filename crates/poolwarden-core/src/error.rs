use thiserror::Error;

/// Chain gateway errors
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Submission rejected: {0}")]
    Submission(String),

    #[error("Transaction not found: {0}")]
    TxNotFound(String),
}

/// Liquidity provisioning errors
#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Pool has no reserves")]
    EmptyPool,

    #[error("Token approval failed: {0}")]
    Approval(String),

    #[error("Broadcast failed: {0}")]
    Submission(String),

    #[error("No receipt within {timeout_secs}s for {tx_ref}")]
    ConfirmationTimeout { tx_ref: String, timeout_secs: u64 },

    #[error("Transaction reverted: {0}")]
    Reverted(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
