//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A session that reached its error state, including signature
    /// mismatches and errors the server reported in-band.
    #[error("protocol error: {0}")]
    Protocol(#[from] rndc_protocol::ProtocolError),

    #[error("request timeout")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("server returned an empty response")]
    EmptyResponse,
}

impl ClientError {
    /// Returns whether retrying the command could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}
