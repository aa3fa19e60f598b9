//! Error types for the handoff broker

use std::io;

use thiserror::Error;

/// Result type alias for the handoff broker
pub type Result<T> = std::result::Result<T, Error>;

/// Handoff broker errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ephemeral store error
    #[error("Store error: {0}")]
    Store(String),

    /// Opaque token missing or expired
    #[error("Token not found")]
    TokenNotFound,

    /// Assertion rejected by the identity verifier
    #[error("Assertion rejected: {0}")]
    Verifier(String),

    /// Activity statement could not be built or delivered
    #[error("Statement error: {0}")]
    Statement(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<redis::RedisError> for Error {
    fn from(e: redis::RedisError) -> Self {
        Self::Store(e.to_string())
    }
}
