//! Common error types for linkguard.
//!
//! This module provides a centralized Error enum using thiserror,
//! with conversions from underlying error types used throughout the crate.

use thiserror::Error;

/// Main error type for linkguard operations.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors from tokio or std
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serial port errors
    #[error("Serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Link engine errors (failed to start or talk to the PPP engine)
    #[error("Link engine error: {0}")]
    Link(String),

    /// Access point collaborator errors
    #[error("Access point error: {0}")]
    AccessPoint(String),

    /// Liveness timer errors
    #[error("Liveness timer error: {0}")]
    Liveness(String),

    /// Errors from the underlying OS interface
    #[error("System error: {0}")]
    Errno(#[from] nix::errno::Errno),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// Convenience type alias for Results using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
