//! ISCCC typed values and their wire serialization.
//!
//! Every value is serialized as a 1-byte type tag, a 4-byte big-endian
//! length, then that many bytes of body:
//!
//! ```text
//! +-----+----------------+--------------------+
//! | tag | length (4, BE) | body (length bytes)|
//! +-----+----------------+--------------------+
//! ```
//!
//! A table body is a concatenation of entries, each a 1-byte key length,
//! the key bytes, then a value. A list body is a concatenation of values.
//! Tables also have a header-less form (entries only, no tag or length),
//! used for the packet envelope regions and as the HMAC input.

use crate::error::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Tag for a string value. Never emitted by this codec; decoded as binary.
const TAG_STRING: u8 = 0x00;
/// Tag for a binary value.
const TAG_BINARY: u8 = 0x01;
/// Tag for a table.
const TAG_TABLE: u8 = 0x02;
/// Tag for a list.
const TAG_LIST: u8 = 0x03;

/// Maximum length of a table key on the wire (the key length is one byte).
pub const MAX_KEY_LEN: usize = 255;

/// Ordered mapping from short keys to values. `BTreeMap` keeps keys in
/// ascending byte order, which is the canonical form required for signing.
pub type TableMap = BTreeMap<String, Value>;

/// A value in the control-channel data model.
///
/// There are no integers on this wire: numbers travel as the ASCII decimal
/// digits of their value inside a `Binary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Opaque octet string; the leaf type.
    Binary(Bytes),
    /// Mapping with string keys of at most 255 bytes.
    Table(TableMap),
    /// Ordered sequence of values.
    List(Vec<Value>),
}

impl Value {
    /// A binary value from anything byte-like.
    pub fn binary(bytes: impl Into<Bytes>) -> Self {
        Value::Binary(bytes.into())
    }

    /// A binary value holding the ASCII decimal form of `n`.
    pub fn number(n: u64) -> Self {
        Value::Binary(Bytes::from(n.to_string()))
    }

    /// The placeholder for an absent binary value: the four ASCII bytes
    /// `null`.
    pub fn null() -> Self {
        Value::Binary(Bytes::from_static(b"null"))
    }

    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// The value as UTF-8 text, if it is binary and decodes cleanly.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_binary()?).ok()
    }

    pub fn as_table(&self) -> Option<&TableMap> {
        match self {
            Value::Table(table) => Some(table),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Encodes the value with its tag and length header.
    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            Value::Binary(bytes) => {
                buf.put_u8(TAG_BINARY);
                buf.put_u32(bytes.len() as u32);
                buf.put_slice(bytes);
            }
            Value::Table(table) => {
                let body = encode_table(table)?;
                buf.put_u8(TAG_TABLE);
                buf.put_u32(body.len() as u32);
                buf.put_slice(&body);
            }
            Value::List(items) => {
                let mut body = BytesMut::new();
                for item in items {
                    item.encode(&mut body)?;
                }
                buf.put_u8(TAG_LIST);
                buf.put_u32(body.len() as u32);
                buf.put_slice(&body);
            }
        }
        Ok(())
    }
}

/// Encodes a table in header-less form: entries only, keys in ascending
/// byte order.
pub fn encode_table(table: &TableMap) -> Result<BytesMut, ProtocolError> {
    let mut buf = BytesMut::new();
    for (key, value) in table {
        if key.len() > MAX_KEY_LEN {
            return Err(ProtocolError::KeyTooLong(key.len()));
        }
        buf.put_u8(key.len() as u8);
        buf.put_slice(key.as_bytes());
        value.encode(&mut buf)?;
    }
    Ok(buf)
}

fn need(buf: &[u8], n: usize) -> Result<(), ProtocolError> {
    if buf.len() < n {
        Err(ProtocolError::Truncated {
            needed: n - buf.len(),
        })
    } else {
        Ok(())
    }
}

/// Decodes one table entry, advancing `buf` past its serialized form.
pub fn decode_entry(buf: &mut &[u8]) -> Result<(String, Value), ProtocolError> {
    need(buf, 1)?;
    let key_len = buf[0] as usize;
    *buf = &buf[1..];
    need(buf, key_len)?;
    let key = String::from_utf8_lossy(&buf[..key_len]).into_owned();
    *buf = &buf[key_len..];
    let value = decode_value(buf)?;
    Ok((key, value))
}

/// Decodes a header-less table from the whole of `buf`.
pub fn decode_table(mut buf: &[u8]) -> Result<TableMap, ProtocolError> {
    let mut table = TableMap::new();
    while !buf.is_empty() {
        let (key, value) = decode_entry(&mut buf)?;
        table.insert(key, value);
    }
    Ok(table)
}

/// Decodes one tagged value, advancing `buf` past its serialized form.
pub fn decode_value(buf: &mut &[u8]) -> Result<Value, ProtocolError> {
    need(buf, 5)?;
    let tag = buf[0];
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    *buf = &buf[5..];
    need(buf, len)?;
    let (body, rest) = buf.split_at(len);
    *buf = rest;
    match tag {
        TAG_STRING | TAG_BINARY => Ok(Value::Binary(Bytes::copy_from_slice(body))),
        TAG_TABLE => Ok(Value::Table(decode_table(body)?)),
        TAG_LIST => {
            let mut body = body;
            let mut items = Vec::new();
            while !body.is_empty() {
                items.push(decode_value(&mut body)?);
            }
            Ok(Value::List(items))
        }
        other => Err(ProtocolError::UnknownTag(other)),
    }
}
