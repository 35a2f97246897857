//! Server error types.

use quiver_codec::CodecError;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    #[error("service '{0}' is already registered")]
    DuplicateService(String),

    #[error("reply too large: {size} bytes (max {max})")]
    ReplyTooLarge { size: usize, max: usize },

    #[error("handler failed: {0}")]
    Handler(String),

    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
}
