//! Primitive wire encoding: bounded varints, integers, and length-prefixed
//! strings.
//!
//! Every read consumes from the frame's body buffer; reading past the end of
//! the buffer fails with [`CodecError::DataExceedsPacket`]. This counter
//! discipline is the codec's structural integrity check and is observed by
//! every field read.

use crate::error::CodecError;
use crate::MAX_STRING_LEN;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Maximum number of bytes in a varint remaining-length field.
pub const VARINT_MAX_BYTES: usize = 4;

/// Maximum value of a varint remaining-length field (2^28 - 1).
pub const MAX_REMAINING_LENGTH: u32 = (1 << 28) - 1;

pub fn get_u8(buf: &mut Bytes) -> Result<u8, CodecError> {
    if buf.remaining() < 1 {
        return Err(CodecError::DataExceedsPacket);
    }
    Ok(buf.get_u8())
}

pub fn get_u16(buf: &mut Bytes) -> Result<u16, CodecError> {
    if buf.remaining() < 2 {
        return Err(CodecError::DataExceedsPacket);
    }
    Ok(buf.get_u16())
}

pub fn get_string(buf: &mut Bytes) -> Result<String, CodecError> {
    let len = get_u16(buf)? as usize;
    if buf.remaining() < len {
        return Err(CodecError::DataExceedsPacket);
    }
    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

pub fn put_u8(val: u8, buf: &mut BytesMut) {
    buf.put_u8(val);
}

pub fn put_u16(val: u16, buf: &mut BytesMut) {
    buf.put_u16(val);
}

pub fn put_string(val: &str, buf: &mut BytesMut) -> Result<(), CodecError> {
    if val.len() > MAX_STRING_LEN {
        return Err(CodecError::StringTooLong(val.len()));
    }
    buf.put_u16(val.len() as u16);
    buf.put_slice(val.as_bytes());
    Ok(())
}

/// Encodes a varint: low 7 bits per byte, high bit marks continuation.
/// Zero encodes as a single 0x00 byte. Returns the number of bytes written.
pub fn put_varint(mut value: u32, buf: &mut BytesMut) -> usize {
    if value == 0 {
        buf.put_u8(0);
        return 1;
    }
    let mut written = 0;
    while value > 0 {
        let mut digit = (value & 0x7f) as u8;
        value >>= 7;
        if value > 0 {
            digit |= 0x80;
        }
        buf.put_u8(digit);
        written += 1;
    }
    written
}

/// Decodes a varint from a body buffer. Returns the value and the number of
/// bytes consumed (1..=4).
pub fn get_varint(buf: &mut Bytes) -> Result<(u32, usize), CodecError> {
    let mut value = 0u32;
    let mut shift = 0;
    for i in 0..VARINT_MAX_BYTES {
        if buf.remaining() < 1 {
            return Err(CodecError::DataExceedsPacket);
        }
        let b = buf.get_u8();
        value |= u32::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    Err(CodecError::BadLengthEncoding)
}

/// Reads a varint remaining-length field directly from the transport.
pub(crate) async fn read_varint<R>(r: &mut R) -> Result<u32, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut value = 0u32;
    let mut shift = 0;
    for _ in 0..VARINT_MAX_BYTES {
        let b = r.read_u8().await?;
        value |= u32::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
    Err(CodecError::BadLengthEncoding)
}
