//! Error types for Tollgate

use thiserror::Error;

/// Main error type for Tollgate operations
#[derive(Error, Debug)]
pub enum TollgateError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request log storage errors (SQLite, file system, etc.)
    #[error("Storage error: {0}")]
    Storage(String),

    /// No usable provider for a request (unknown provider, no fallback)
    #[error("Routing error: {0}")]
    Routing(String),

    /// Transport-level failure talking to an upstream provider
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Conversion between the canonical and a provider dialect failed
    #[error("Translation error: {0}")]
    Translation(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// General errors
    #[error("{0}")]
    General(String),
}

impl From<serde_json::Error> for TollgateError {
    fn from(err: serde_json::Error) -> Self {
        TollgateError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for TollgateError {
    fn from(err: rusqlite::Error) -> Self {
        TollgateError::Storage(err.to_string())
    }
}

/// Result type alias for Tollgate operations
pub type Result<T> = std::result::Result<T, TollgateError>;
