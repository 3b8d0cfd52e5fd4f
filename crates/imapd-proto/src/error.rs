//! Error types for the protocol layer.

use thiserror::Error;

/// Errors produced while framing or parsing client commands.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed command grammar. Recoverable; the session continues after
    /// a BAD response.
    #[error("parse error at position {position}: {message}")]
    Parse {
        /// Byte position within the command frame where parsing failed.
        position: usize,
        /// Description of what went wrong.
        message: String,
        /// Tag of the offending command, when one was recognizable.
        tag: Option<String>,
    },

    /// A physical line exceeded the configured maximum length.
    #[error("line exceeds maximum length of {limit} bytes")]
    LineTooLong {
        /// The configured line length limit.
        limit: usize,
    },

    /// A literal was declared larger than the configured maximum.
    #[error("literal of {declared} bytes exceeds maximum of {limit} bytes")]
    LiteralTooLarge {
        /// The announced literal length.
        declared: usize,
        /// The configured literal length limit.
        limit: usize,
    },
}

impl Error {
    /// Creates a parse error at the given position, with no tag attached.
    #[must_use]
    pub fn parse(position: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            position,
            message: message.into(),
            tag: None,
        }
    }

    /// Returns `true` if byte framing can no longer be trusted and the
    /// connection must be closed.
    ///
    /// Once a line or literal limit is exceeded, the remaining input cannot
    /// be re-synchronized: the buffer no longer knows where the oversized
    /// command ends.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LineTooLong { .. } | Self::LiteralTooLarge { .. }
        )
    }
}

/// Result type alias using our [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_errors_are_recoverable() {
        assert!(!Error::parse(0, "bad atom").is_fatal());
    }

    #[test]
    fn limit_errors_are_fatal() {
        assert!(Error::LineTooLong { limit: 8192 }.is_fatal());
        assert!(
            Error::LiteralTooLarge {
                declared: 1 << 30,
                limit: 1 << 20,
            }
            .is_fatal()
        );
    }
}
