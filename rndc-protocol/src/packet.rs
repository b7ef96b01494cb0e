//! Signed control-channel packets.
//!
//! A packet is a top-level table with three sub-tables: `_auth` carries the
//! signature, `_ctrl` the serial/timestamps/nonce, `_data` the command and
//! its result. On the wire the `_auth` table comes first; the signature is
//! HMAC-MD5 over the header-less canonical serialization of everything
//! after it.

use crate::error::ProtocolError;
use crate::frame;
use crate::value::{self, TableMap, Value};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use bytes::{BufMut, BytesMut};
use hmac::{Hmac, Mac};
use md5::Md5;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacMd5 = Hmac<Md5>;

/// Seconds a packet stays valid after it is stamped.
const VALIDITY_WINDOW_SECS: u64 = 60;

/// Secrets appear both padded and unpadded in the wild; decoding accepts
/// either form and ignores stray trailing bits.
const KEY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Process-wide packet serial: seeded randomly once, incremented per packet,
/// wrapping mod 2^32. Only uniqueness within a live session matters, so
/// relaxed ordering suffices.
static SERIAL: OnceLock<AtomicU32> = OnceLock::new();

fn next_serial() -> u32 {
    SERIAL
        .get_or_init(|| AtomicU32::new(rand::random()))
        .fetch_add(1, Ordering::Relaxed)
}

/// One control-channel message.
///
/// Outbound packets are built with [`Packet::new`] and the `with_*`
/// builders, then serialized with [`Packet::to_bytes`]. Inbound frames are
/// verified and lifted with [`Packet::parse`].
#[derive(Debug, Clone)]
pub struct Packet {
    key: String,
    serial: u32,
    ctrl: TableMap,
    data: TableMap,
}

impl Packet {
    /// Creates an outbound packet signed with `key`. `_data.type` starts as
    /// the `null` placeholder and `_ctrl._ser` is drawn from the process
    /// serial counter.
    pub fn new(key: impl Into<String>) -> Self {
        let serial = next_serial();
        let mut ctrl = TableMap::new();
        ctrl.insert("_ser".to_string(), Value::number(serial as u64));
        let mut data = TableMap::new();
        data.insert("type".to_string(), Value::null());
        Self {
            key: key.into(),
            serial,
            ctrl,
            data,
        }
    }

    /// Sets the command name. An empty command keeps the `null` placeholder.
    pub fn with_command(mut self, command: &str) -> Self {
        if !command.is_empty() {
            self.data.insert(
                "type".to_string(),
                Value::binary(command.as_bytes().to_vec()),
            );
        }
        self
    }

    /// Sets the nonce echoed back to (or issued by) the peer.
    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.ctrl
            .insert("_nonce".to_string(), Value::number(nonce as u64));
        self
    }

    /// Sets the result text.
    pub fn with_text(mut self, text: &str) -> Self {
        self.data
            .insert("text".to_string(), Value::binary(text.as_bytes().to_vec()));
        self
    }

    /// Sets the error string reported to the peer.
    pub fn with_err(mut self, err: &str) -> Self {
        self.data
            .insert("err".to_string(), Value::binary(err.as_bytes().to_vec()));
        self
    }

    /// Serializes the packet into a complete frame, stamping `_tim`/`_exp`
    /// and signing the canonical payload.
    pub fn to_bytes(&mut self) -> Result<BytesMut, ProtocolError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.ctrl.insert("_tim".to_string(), Value::number(now));
        self.ctrl.insert(
            "_exp".to_string(),
            Value::number(now + VALIDITY_WINDOW_SECS),
        );

        let mut payload = TableMap::new();
        payload.insert("_ctrl".to_string(), Value::Table(self.ctrl.clone()));
        payload.insert("_data".to_string(), Value::Table(self.data.clone()));
        let payload_bytes = value::encode_table(&payload)?;

        let mut auth_inner = TableMap::new();
        auth_inner.insert(
            "hmd5".to_string(),
            Value::binary(sign(&self.key, &payload_bytes)?.into_bytes()),
        );
        let mut auth = TableMap::new();
        auth.insert("_auth".to_string(), Value::Table(auth_inner));
        let auth_bytes = value::encode_table(&auth)?;

        let mut body = BytesMut::with_capacity(4 + auth_bytes.len() + payload_bytes.len());
        body.put_u32(crate::PROTOCOL_VERSION);
        body.put_slice(&auth_bytes);
        body.put_slice(&payload_bytes);
        frame::encode_frame(&body)
    }

    /// Parses and verifies one frame body (everything after the length
    /// prefix) received from the peer.
    ///
    /// The signed region is delimited by the auth table's own serialized
    /// length rather than a fixed offset, so a malformed auth block fails
    /// parsing instead of shifting the signature check. Every packet
    /// carries `_ctrl._ser`; a reply without one is malformed.
    pub fn parse(key: &str, body: &[u8]) -> Result<Self, ProtocolError> {
        if body.len() < 4 {
            return Err(ProtocolError::Truncated {
                needed: 4 - body.len(),
            });
        }
        let version = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        if version != crate::PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(version));
        }

        let mut cursor = &body[4..];
        let (auth_key, auth_value) = value::decode_entry(&mut cursor)?;
        // Everything after the auth table entry is the signed region.
        let signed = cursor;
        if auth_key != "_auth" {
            return Err(ProtocolError::MissingField("_auth"));
        }
        let hmd5 = auth_value
            .as_table()
            .and_then(|table| table.get("hmd5"))
            .and_then(Value::as_binary)
            .ok_or(ProtocolError::MissingField("hmd5"))?;
        verify(key, signed, hmd5)?;

        let payload = value::decode_table(signed)?;
        let ctrl = payload
            .get("_ctrl")
            .and_then(Value::as_table)
            .ok_or(ProtocolError::MissingField("_ctrl"))?
            .clone();
        let data = payload
            .get("_data")
            .and_then(Value::as_table)
            .cloned()
            .unwrap_or_default();

        if let Some(err) = data.get("err").and_then(Value::as_str) {
            if !err.is_empty() {
                return Err(ProtocolError::ServerError(err.to_string()));
            }
        }

        let serial = ctrl
            .get("_ser")
            .and_then(Value::as_str)
            .and_then(|digits| digits.parse().ok())
            .ok_or(ProtocolError::MissingField("_ser"))?;

        Ok(Self {
            key: key.to_string(),
            serial,
            ctrl,
            data,
        })
    }

    fn ctrl_number(&self, field: &str) -> Option<u32> {
        self.ctrl.get(field)?.as_str()?.parse().ok()
    }

    /// The packet serial.
    pub fn serial(&self) -> u32 {
        self.serial
    }

    /// The nonce, if present and numeric.
    pub fn nonce(&self) -> Option<u32> {
        self.ctrl_number("_nonce")
    }

    /// The command name from `_data.type`.
    pub fn command(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }

    /// The result text from `_data.text`.
    pub fn text(&self) -> Option<&str> {
        self.data.get("text").and_then(Value::as_str)
    }

    /// The error string from `_data.err`.
    pub fn err(&self) -> Option<&str> {
        self.data.get("err").and_then(Value::as_str)
    }
}

fn decode_key(key: &str) -> Result<Vec<u8>, ProtocolError> {
    KEY_ENGINE
        .decode(key.trim())
        .map_err(|_| ProtocolError::BadKey)
}

/// Base64 HMAC-MD5 of `payload` under the Base64-encoded `key`. Unpadded:
/// an MD5 digest encodes to exactly 22 characters, which is what puts the
/// payload at a fixed offset in a well-formed frame.
fn sign(key: &str, payload: &[u8]) -> Result<String, ProtocolError> {
    let key_bytes = decode_key(key)?;
    let mut mac = HmacMd5::new_from_slice(&key_bytes).map_err(|_| ProtocolError::BadKey)?;
    mac.update(payload);
    Ok(STANDARD_NO_PAD.encode(mac.finalize().into_bytes()))
}

fn verify(key: &str, payload: &[u8], hmd5: &[u8]) -> Result<(), ProtocolError> {
    let expected = sign(key, payload)?;
    let received = std::str::from_utf8(hmd5).map_err(|_| ProtocolError::SignatureMismatch)?;
    if expected != received.trim_end_matches('=') {
        return Err(ProtocolError::SignatureMismatch);
    }
    Ok(())
}
