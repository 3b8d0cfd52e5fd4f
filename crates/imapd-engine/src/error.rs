//! Error types for the engine.

use thiserror::Error;

/// Errors that can occur while serving a connection.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during network operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level failure (framing or grammar).
    #[error("protocol error: {0}")]
    Protocol(#[from] imapd_proto::Error),
}

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;
