//! Common error types for leafminer.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from the error types of the layers below.

use thiserror::Error;

use crate::stratum_v1::StratumError;

/// Main error type for leafminer operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pool communication errors
    #[error("Pool error: {0}")]
    Stratum(#[from] StratumError),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
