//! Payload encoding above the frame codec.
//!
//! When a frame's compressed bit is set its payload carries a two-byte
//! reserved prefix (0x00 0x00) followed by a gzip stream. The frame codec
//! never looks inside payloads; this layer is where compression happens.

use crate::error::CodecError;
use crate::payload::Payload;
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Reserved prefix preceding the gzip stream in compressed payloads.
const COMPRESSED_PREFIX: [u8; 2] = [0x00, 0x00];

/// Serialises an outgoing body into a payload, compressing when asked.
/// Empty bodies produce no payload.
pub fn encode_payload(data: &[u8], compressed: bool) -> Result<Option<Payload>, CodecError> {
    if data.is_empty() {
        return Ok(None);
    }
    if !compressed {
        return Ok(Some(Payload::from_bytes(Bytes::copy_from_slice(data))));
    }

    let mut out = Vec::with_capacity(COMPRESSED_PREFIX.len() + data.len() / 2);
    out.extend_from_slice(&COMPRESSED_PREFIX);
    let mut encoder = GzEncoder::new(out, Compression::default());
    encoder.write_all(data)?;
    let out = encoder.finish()?;
    Ok(Some(Payload::from_bytes(Bytes::from(out))))
}

/// Consumes an inbound payload and yields the plain body bytes, gunzipping
/// when the frame was compressed. The payload is released on return.
pub fn decode_payload(payload: Option<Payload>, compressed: bool) -> Result<Bytes, CodecError> {
    let Some(payload) = payload else {
        return Ok(Bytes::new());
    };
    if payload.is_empty() {
        return Ok(Bytes::new());
    }
    if !compressed {
        return Ok(payload.to_bytes());
    }

    let data = payload.as_slice();
    if data.len() < COMPRESSED_PREFIX.len() {
        return Err(CodecError::TruncatedPayload);
    }
    let mut decoder = GzDecoder::new(&data[COMPRESSED_PREFIX.len()..]);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(Bytes::from(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_passthrough() {
        let payload = encode_payload(b"raw bytes", false).unwrap().unwrap();
        assert_eq!(payload.as_slice(), b"raw bytes");
        let body = decode_payload(Some(payload), false).unwrap();
        assert_eq!(&body[..], b"raw bytes");
    }

    #[test]
    fn test_compressed_roundtrip() {
        let input = b"The quick brown fox jumps over the lazy dog. ".repeat(20);
        let payload = encode_payload(&input, true).unwrap().unwrap();
        assert_eq!(&payload.as_slice()[..2], &COMPRESSED_PREFIX);
        assert!(payload.len() < input.len());

        let body = decode_payload(Some(payload), true).unwrap();
        assert_eq!(&body[..], &input[..]);
    }

    #[test]
    fn test_empty_body_yields_no_payload() {
        assert!(encode_payload(b"", false).unwrap().is_none());
        assert!(encode_payload(b"", true).unwrap().is_none());
    }

    #[test]
    fn test_missing_payload_decodes_empty() {
        let body = decode_payload(None, true).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn test_truncated_compressed_payload_fails() {
        let payload = Payload::from_bytes(Bytes::from_static(&[0x00]));
        let result = decode_payload(Some(payload), true);
        assert!(matches!(result, Err(CodecError::TruncatedPayload)));
    }

    #[test]
    fn test_garbage_gzip_fails() {
        let payload = Payload::from_bytes(Bytes::from_static(b"\x00\x00not gzip at all"));
        let result = decode_payload(Some(payload), true);
        assert!(matches!(result, Err(CodecError::Io(_))));
    }
}
