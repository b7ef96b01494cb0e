//! Length-prefixed framing for the control channel.
//!
//! Every message on the socket is a single self-delimiting frame:
//!
//! ```text
//! +----------------+------------------+---------------------------+
//! | length (4, BE) | version (4, BE)  | auth table | payload table|
//! +----------------+------------------+---------------------------+
//! ```
//!
//! `length` counts everything after itself. The tables are serialized in
//! header-less form; this module only deals with the outer prefix and
//! leaves the body to [`crate::packet`].

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Sanity cap on a single frame. Control-channel messages are a few hundred
/// bytes; anything near this is garbage.
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Wraps a frame body (version word plus tables) in the length prefix.
pub fn encode_frame(body: &[u8]) -> Result<BytesMut, ProtocolError> {
    if body.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge {
            size: body.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    buf.put_u32(body.len() as u32);
    buf.put_slice(body);
    Ok(buf)
}

/// Incremental frame decoder.
///
/// Reads may arrive in arbitrary chunks; feed them with [`extend`] and poll
/// [`decode_frame`], which yields the body of the next complete frame or
/// `None` until enough bytes are buffered.
///
/// [`extend`]: Decoder::extend
/// [`decode_frame`]: Decoder::decode_frame
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: BytesMut,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(512),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Attempts to decode the next frame, returning its body (everything
    /// after the length prefix).
    pub fn decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        // The body must at least hold the version word.
        if len < 4 {
            return Err(ProtocolError::Truncated { needed: 4 - len });
        }
        if self.buffer.len() < LENGTH_PREFIX_SIZE + len {
            return Ok(None);
        }
        self.buffer.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }
}
