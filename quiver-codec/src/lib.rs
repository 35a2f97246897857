//! # quiver-codec
//!
//! Wire protocol implementation for quiver.
//!
//! This crate provides:
//! - Binary message framing with a 1-byte fixed header and varint remaining length
//! - Seven message kinds: Connect, ConnAck, Publish, PubAck, PingReq, PingResp, Disconnect
//! - String/multi-value property maps and a compact status encoding
//! - Opaque payload carriers with a pluggable builder for pooled buffers
//! - Payload compression (gzip) above the frame layer

pub mod encoding;
pub mod error;
pub mod frame;
pub mod message;
pub mod payload;
pub mod status;
pub mod wire;

pub use error::CodecError;
pub use frame::{Header, MessageType, Props, QosLevel, Status};
pub use message::{
    read_message, write_message, ConnAck, Connect, Disconnect, Message, PingReq, PingResp, PubAck,
    Publish,
};
pub use payload::{Payload, PayloadBuilder, SlicePayloadBuilder};
pub use status::Code;
pub use wire::MAX_REMAINING_LENGTH;

/// Protocol name carried in Connect.
pub const PROTOCOL_NAME: &str = "QUIVER";

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u8 = 1;

/// Default port for quiver servers.
pub const DEFAULT_PORT: u16 = 7414;

/// Default ALPN identifier; embedders may override it.
pub const DEFAULT_ALPN: &[u8] = b"quiver";

/// Maximum length of a length-prefixed string (u16 prefix).
pub const MAX_STRING_LEN: usize = u16::MAX as usize;
