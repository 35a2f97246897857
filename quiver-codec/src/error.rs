//! Codec error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding messages.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("remaining length field exceeded maximum of 4 bytes")]
    BadLengthEncoding,

    #[error("data exceeds packet length")]
    DataExceedsPacket,

    #[error("message is too long")]
    MessageTooLong,

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("string exceeds maximum length: {0} bytes")]
    StringTooLong(usize),

    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    #[error("truncated compressed payload")]
    TruncatedPayload,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
