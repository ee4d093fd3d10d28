//! Error types.

use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration failed validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
