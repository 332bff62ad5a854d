//! Error taxonomy for store interactions.
//!
//! The variants separate the caller's retry decisions: usage and validation
//! errors are never retried, transport errors may be retried by the caller,
//! and concurrency errors require re-reading state before re-deciding. The
//! client itself never retries.

use thiserror::Error;

/// Errors raised by [`crate::Client`] implementations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client was used incorrectly, e.g. an option unsupported by the
    /// requested operation. Fails locally, before any request is issued.
    #[error("invalid client usage: {0}")]
    InvalidUsage(String),

    /// Network or connection failure, including an `observe` stream ending,
    /// which never happens under normal operation.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with an unexpected HTTP status.
    #[error("server responded with status {status}: {message}")]
    Http {
        /// The HTTP status code.
        status: u16,
        /// The response body, if any.
        message: String,
    },

    /// The store rejected a write because a precondition failed.
    #[error("concurrency violation: {0}")]
    Concurrency(String),

    /// Local integrity verification failed, e.g. an event hash mismatch.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A request or response body could not be encoded or decoded.
    #[error("marshalling failed: {0}")]
    Marshalling(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_descriptive() {
        let err = ClientError::InvalidUsage("unsupported option(s) used: [Order]".into());
        assert_eq!(
            err.to_string(),
            "invalid client usage: unsupported option(s) used: [Order]"
        );

        let err = ClientError::Http {
            status: 401,
            message: "missing token".into(),
        };
        assert_eq!(err.to_string(), "server responded with status 401: missing token");

        let err = ClientError::Transport("event observation stopped unexpectedly".into());
        assert!(err.to_string().contains("stopped unexpectedly"));
    }
}
