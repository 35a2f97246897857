//! Service descriptors and handler types.

use crate::error::ServerError;
use crate::stream::RpcStream;
use bytes::Bytes;
use futures::future::BoxFuture;
use quiver_codec::Props;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// Per-call context handed to handlers.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Request path of the form `/service/method`.
    pub path: String,
    /// Property map of the first Publish frame.
    pub props: Props,
    /// Remote address of the calling connection.
    pub remote_addr: SocketAddr,
    /// Whether the request payload was compressed; replies mirror it.
    pub compressed: bool,
}

/// A unary handler: one decoded request body in, one optional reply body out.
pub type UnaryHandler =
    Arc<dyn Fn(CallContext, Bytes) -> BoxFuture<'static, Result<Option<Bytes>, ServerError>> + Send + Sync>;

/// A streaming handler: drives a bidirectional message stream until done.
pub type StreamingHandler = Arc<
    dyn for<'a> Fn(CallContext, &'a mut RpcStream) -> BoxFuture<'a, Result<(), ServerError>>
        + Send
        + Sync,
>;

/// Describes one service: a fully-qualified name plus its unary and
/// streaming method tables.
pub struct ServiceDesc {
    pub(crate) name: String,
    pub(crate) methods: HashMap<String, UnaryHandler>,
    pub(crate) streams: HashMap<String, StreamingHandler>,
}

impl ServiceDesc {
    pub fn new(name: impl Into<String>) -> Self {
        ServiceDesc {
            name: name.into(),
            methods: HashMap::new(),
            streams: HashMap::new(),
        }
    }

    /// Registers a unary method. A repeated name replaces the previous
    /// handler.
    pub fn unary<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(CallContext, Bytes) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Bytes>, ServerError>> + Send + 'static,
    {
        self.methods.insert(
            name.into(),
            Arc::new(move |ctx, body| Box::pin(handler(ctx, body))),
        );
        self
    }

    /// Registers a streaming method. Handlers are written as
    /// `|ctx, stream| Box::pin(async move { ... })`.
    pub fn streaming<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: for<'a> Fn(CallContext, &'a mut RpcStream) -> BoxFuture<'a, Result<(), ServerError>>
            + Send
            + Sync
            + 'static,
    {
        self.streams.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for ServiceDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceDesc")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("streams", &self.streams.keys().collect::<Vec<_>>())
            .finish()
    }
}
