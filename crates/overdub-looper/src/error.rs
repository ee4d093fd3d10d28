//! Error types.

use std::path::PathBuf;
use thiserror::Error;

/// Error type.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Hound error.
    #[error("Hound error: {0}")]
    HoundError(#[from] hound::Error),

    /// Configuration or primitive error from the core crate.
    #[error(transparent)]
    Core(#[from] overdub_core::Error),

    /// Trigger identifier outside the slot range.
    #[error("Invalid loop note {0} (expected 0-127)")]
    InvalidNote(u8),

    /// Path does not fit into a fixed-size control message.
    #[error("Recording path too long: {}", .0.display())]
    PathTooLong(PathBuf),

    /// Path cannot be carried as UTF-8.
    #[error("Recording path is not valid UTF-8: {}", .0.display())]
    PathEncoding(PathBuf),

    /// A control message could not be enqueued.
    #[error("Message queue full, dropped {0}")]
    QueueFull(&'static str),

    /// Recording error.
    #[error("Recording error: {0}")]
    Recording(String),

    /// Worker thread error.
    #[error("Worker error: {0}")]
    Worker(String),

    /// Time stretch error.
    #[error("Time stretch error: {0}")]
    TimeStretch(String),
}

/// Result type.
pub type Result<T> = std::result::Result<T, Error>;
