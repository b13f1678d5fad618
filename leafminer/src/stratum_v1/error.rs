//! Error types for Stratum v1 protocol.

use thiserror::Error;

/// Stratum protocol errors.
#[derive(Error, Debug)]
pub enum StratumError {
    /// Network I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing or serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Message from the pool didn't have the expected shape
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Missing required field in message
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Network link or TCP connect retries exhausted
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Subscribe reply carried unusable session parameters
    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    /// Invalid pool address
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Operation needs a connected transport
    #[error("Not connected")]
    NotConnected,

    /// Connection lost
    #[error("Connection lost")]
    Disconnected,

    /// Timeout waiting for the pool
    #[error("Timeout waiting for response")]
    Timeout,
}

/// Convenient Result type for Stratum operations.
pub type StratumResult<T> = Result<T, StratumError>;
