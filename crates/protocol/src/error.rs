//! Error types for the stagehand wire protocol.
//!
//! Every variant here is a protocol-level failure: once one is observed the
//! byte stream can no longer be trusted, so callers treat them as fatal to the
//! current host.

use thiserror::Error;

/// Errors raised while framing, decoding, or pairing protocol messages.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying pipe failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload was not a valid message document
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Header was not ten (optionally space-padded) ASCII digits
    #[error("invalid frame header: {0:?}")]
    BadHeader(String),

    /// Stream ended in the middle of a header or payload
    #[error("frame truncated: expected {expected} bytes, got {got}")]
    Truncated {
        /// Bytes the header (or header itself) promised
        expected: u64,
        /// Bytes actually received before EOF
        got: u64,
    },

    /// Stream ended cleanly on a frame boundary without an end-of-stream header
    #[error("stream closed by peer")]
    Closed,

    /// Payload length does not fit in a ten digit header
    #[error("payload too large for frame header: {0} bytes")]
    TooLarge(u64),

    /// Readiness or stop acknowledgement did not match
    #[error("bad acknowledgement: expected \"OK\", got {0:?}")]
    BadAck(String),

    /// A response arrived that does not answer the command in flight
    #[error("unexpected response '{got}' to command '{sent}'")]
    UnexpectedResponse {
        /// Name of the command that was sent
        sent: String,
        /// Name of the response that came back
        got: String,
    },
}

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, Error>;
