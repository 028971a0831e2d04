use thiserror::Error;

/// Errors raised by sessions, factories and the lifecycle around them.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid tenant code: {0}")]
    InvalidTenant(String),

    #[error("Failed to open session for tenant {tenant}: {message}")]
    Open { tenant: String, message: String },

    #[error("Session for tenant {0} is closed")]
    Closed(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Failed to close session: {0}")]
    Close(String),

    #[error("Failed to dispose session: {0}")]
    Dispose(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Failed to log error: {0}")]
    Logging(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}
