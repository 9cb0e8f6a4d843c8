//! Error types for PartScout

use thiserror::Error;

use crate::DbRole;

/// Core error type for PartScout operations
///
/// Connection failures are classified at the driver boundary so that callers
/// pattern-match on kind instead of probing driver-specific codes or message
/// strings.
#[derive(Error, Debug)]
pub enum PartScoutError {
    #[error("server unreachable: {0}")]
    Unreachable(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("database missing: {0}")]
    DatabaseMissing(String),

    #[error("no connection configured for {0}")]
    NotConfigured(DbRole),

    #[error("a connection attempt is already in progress for {0}")]
    AlreadyConnecting(DbRole),

    #[error("liveness probe failed: {0}")]
    ProbeFailed(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PartScoutError {
    /// Whether this error means the underlying connection is gone (as opposed
    /// to a bad statement or bad input) and a reconnect may help.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            PartScoutError::Unreachable(_)
                | PartScoutError::Timeout(_)
                | PartScoutError::ProbeFailed(_)
                | PartScoutError::Io(_)
        )
    }
}

/// Result type alias for PartScout operations
pub type Result<T> = std::result::Result<T, PartScoutError>;
