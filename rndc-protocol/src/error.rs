//! Protocol error types.

use thiserror::Error;

/// Errors raised while encoding or decoding control-channel messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown value tag: {0:#04x}")]
    UnknownTag(u8),

    #[error("truncated input: need {needed} more bytes")]
    Truncated { needed: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("table key too long: {0} bytes (max 255)")]
    KeyTooLong(usize),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("key is not valid base64")]
    BadKey,

    #[error("Couldn't validate response with provided key")]
    SignatureMismatch,

    #[error("server error: {0}")]
    ServerError(String),
}
