//! Client error types.

use quiver_codec::CodecError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("operation timed out")]
    Timeout,

    #[error("connection closed")]
    ConnectionClosed,

    #[error("unexpected message kind: {0}")]
    UnexpectedMessage(&'static str),

    #[error("message id mismatch: expected {expected}, got {got}")]
    MessageIdMismatch { expected: u16, got: u16 },

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}
