//! Error types for dispatcher-side operations.
//!
//! Handler errors never cross the wire as errors: the dispatcher turns them
//! into an `error` result carrying this type's message. Only [`Error::Protocol`]
//! and [`Error::Io`] on the pipe itself end the dispatcher.

use thiserror::Error;

/// Errors that can occur while executing a command on the host.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Framing or decoding failure on the command pipe
    #[error("protocol error: {0}")]
    Protocol(#[from] protocol::Error),

    /// An OS tool (apt-get, systemctl, ...) failed
    #[error("{message}: {stderr}")]
    CommandFailed {
        /// What was being attempted
        message: String,
        /// Trimmed error output of the tool
        stderr: String,
    },

    /// Package is not known to the package index
    #[error("package not found")]
    PackageNotFound(String),

    /// File does not exist (or is not a regular file)
    #[error("file not found")]
    FileNotFound(String),

    /// No such user on the host
    #[error("unknown user: {0}")]
    UnknownUser(String),

    /// No such group on the host
    #[error("unknown group: {0}")]
    UnknownGroup(String),
}

/// Result type for dispatcher operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_wire_text() {
        assert_eq!(
            Error::PackageNotFound("nope".into()).to_string(),
            "package not found"
        );
        assert_eq!(
            Error::FileNotFound("/etc/x".into()).to_string(),
            "file not found"
        );
        assert_eq!(
            Error::CommandFailed {
                message: "apt-get install failed".into(),
                stderr: "E: broken".into(),
            }
            .to_string(),
            "apt-get install failed: E: broken"
        );
    }
}
