//! # quiver-client
//!
//! QUIC RPC client for quiver.
//!
//! This crate provides:
//! - Connection setup over quinn with root-store or insecure TLS
//! - The Connect handshake carrying client identity and credentials
//! - Unary calls (Publish in, PubAck out) with a status surface
//! - Client-side bidirectional streaming calls
//! - Ping and graceful disconnect

pub mod client;
pub mod error;
pub mod stream;
pub mod tls;

pub use client::{Client, ClientConfig, TlsClientConfig, UnaryResponse};
pub use error::ClientError;
pub use stream::ClientStream;
