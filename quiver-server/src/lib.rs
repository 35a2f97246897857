//! # quiver-server
//!
//! QUIC RPC server core for quiver.
//!
//! This crate provides:
//! - A service registry with unary and bidirectional-streaming handlers
//! - A listener accept loop with exponential backoff on transient errors
//! - A per-connection state machine with keepalive and close-once discipline
//! - Bounded handler execution: a fixed worker pool plus a per-connection
//!   stream quota
//! - A streaming adapter exposing one QUIC stream as a message channel
//! - A size-tiered buffer pool for inbound payloads

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod pool;
pub mod server;
pub mod service;
pub mod stream;
pub mod tls;
mod worker;

pub use config::Config;
pub use connection::CloseReason;
pub use error::ServerError;
pub use event::Event;
pub use pool::{BufferPool, PooledPayloadBuilder};
pub use server::{Server, ServerOptions};
pub use service::{CallContext, ServiceDesc};
pub use stream::RpcStream;
