//! Fixed header, message types, property maps, and wire status.
//!
//! Frame layout (1 header byte + varint remaining length + body):
//!
//! ```text
//! +-----------------------------+------------------------+
//! | type_flags : 1 byte         | remaining_length       |
//! | (type<<4 | dup<<2           | varint, 1..4 bytes     |
//! |  | ackReq<<1 | compressed)  | max value 2^28 - 1     |
//! +-----------------------------+------------------------+
//! | body : remaining_length bytes                        |
//! +------------------------------------------------------+
//! ```

use crate::error::CodecError;
use crate::wire;
use bytes::{Bytes, BytesMut};
use std::collections::hash_map;
use std::collections::HashMap;

/// Message type codes carried in the high nibble of the header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PingReq = 5,
    PingResp = 6,
    Disconnect = 7,
}

impl MessageType {
    /// Parses a type code, validating it is in [1, 7].
    pub fn from_u8(value: u8) -> Result<Self, CodecError> {
        match value {
            1 => Ok(MessageType::Connect),
            2 => Ok(MessageType::ConnAck),
            3 => Ok(MessageType::Publish),
            4 => Ok(MessageType::PubAck),
            5 => Ok(MessageType::PingReq),
            6 => Ok(MessageType::PingResp),
            7 => Ok(MessageType::Disconnect),
            other => Err(CodecError::InvalidMessageType(other)),
        }
    }
}

/// Common attributes of all messages. Some flags are not applicable to some
/// message types; they round-trip regardless.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Header {
    pub dup: bool,
    pub ack_required: bool,
    pub compressed: bool,
}

impl Header {
    /// Packs the message type and flag bits into the header byte.
    pub(crate) fn type_flags(&self, msg_type: MessageType) -> u8 {
        let mut b = (msg_type as u8) << 4;
        if self.dup {
            b |= 0x04;
        }
        if self.ack_required {
            b |= 0x02;
        }
        if self.compressed {
            b |= 0x01;
        }
        b
    }

    /// Splits a header byte into its message type and flags.
    pub(crate) fn decode_byte(b: u8) -> Result<(MessageType, Header), CodecError> {
        let msg_type = MessageType::from_u8(b >> 4)?;
        let header = Header {
            dup: b & 0x04 != 0,
            ack_required: b & 0x02 != 0,
            compressed: b & 0x01 != 0,
        };
        Ok((msg_type, header))
    }
}

/// Delivery guarantee for Publish frames. Only at-most-once and at-least-once
/// are defined; there is no exactly-once handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum QosLevel {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

impl QosLevel {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QosLevel::AtMostOnce),
            1 => Some(QosLevel::AtLeastOnce),
            _ => None,
        }
    }

    /// Whether this level carries a message id on the wire.
    pub fn requires_id(self) -> bool {
        matches!(self, QosLevel::AtLeastOnce)
    }
}

/// A string -> list-of-strings property map carried in some message bodies.
///
/// Wire layout: varint entry count, then per entry a string key, a varint
/// value count, and that many strings. Duplicate keys collapse on decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Props(HashMap<String, Vec<String>>);

impl Props {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the values for `key`.
    pub fn insert(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.0.insert(key.into(), values);
    }

    /// Appends a single value to `key`.
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.entry(key.into()).or_default().push(value.into());
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.0.get(key).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Vec<String>> {
        self.0.iter()
    }

    /// Merges `other` into self, appending values for existing keys.
    pub fn merge(&mut self, other: Props) {
        for (key, values) in other.0 {
            self.0.entry(key).or_default().extend(values);
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        wire::put_varint(self.0.len() as u32, buf);
        for (key, values) in &self.0 {
            wire::put_string(key, buf)?;
            wire::put_varint(values.len() as u32, buf);
            for value in values {
                wire::put_string(value, buf)?;
            }
        }
        Ok(())
    }

    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let (count, _) = wire::get_varint(buf)?;
        let mut map = HashMap::new();
        for _ in 0..count {
            let key = wire::get_string(buf)?;
            let (value_count, _) = wire::get_varint(buf)?;
            let mut values = Vec::new();
            for _ in 0..value_count {
                values.push(wire::get_string(buf)?);
            }
            map.insert(key, values);
        }
        Ok(Props(map))
    }
}

impl FromIterator<(String, Vec<String>)> for Props {
    fn from_iter<I: IntoIterator<Item = (String, Vec<String>)>>(iter: I) -> Self {
        Props(iter.into_iter().collect())
    }
}

impl IntoIterator for Props {
    type Item = (String, Vec<String>);
    type IntoIter = hash_map::IntoIter<String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Compact status: one code byte whose high bit marks a trailing message
/// string. Only the low 7 bits of the code are transmitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    pub code: u8,
    pub message: String,
}

impl Status {
    pub fn new(code: crate::status::Code) -> Self {
        Status {
            code: code as u8,
            message: String::new(),
        }
    }

    pub fn with_message(code: crate::status::Code, message: impl Into<String>) -> Self {
        Status {
            code: code as u8,
            message: message.into(),
        }
    }

    pub fn ok() -> Self {
        Status::default()
    }

    pub fn is_ok(&self) -> bool {
        self.code == 0
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        if self.message.is_empty() {
            wire::put_u8(self.code & 0x7f, buf);
        } else {
            wire::put_u8(self.code | 0x80, buf);
            wire::put_string(&self.message, buf)?;
        }
        Ok(())
    }

    pub(crate) fn decode(buf: &mut Bytes) -> Result<Self, CodecError> {
        let b = wire::get_u8(buf)?;
        let message = if b & 0x80 != 0 {
            wire::get_string(buf)?
        } else {
            String::new()
        };
        Ok(Status {
            code: b & 0x7f,
            message,
        })
    }
}
