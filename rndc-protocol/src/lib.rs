//! # rndc-protocol
//!
//! Wire protocol implementation for the BIND remote control channel
//! (RNDC version 1).
//!
//! This crate provides:
//! - The ISCCC typed value tree (binary/table/list) and its serialization
//! - Length-prefixed framing with incremental decoding
//! - Signed packets: HMAC-MD5 over the canonical table serialization
//! - Error types and protocol constants

pub mod error;
pub mod frame;
pub mod packet;
pub mod value;

pub use error::ProtocolError;
pub use frame::{Decoder, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};
pub use packet::Packet;
pub use value::{TableMap, Value};

/// Protocol version spoken on the wire.
pub const PROTOCOL_VERSION: u32 = 1;

/// Default control-channel port.
pub const DEFAULT_PORT: u16 = 953;
