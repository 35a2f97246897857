//! Server: service registration, listener accept loop, and dispatch.

use crate::connection::{BiStream, ServerConn};
use crate::error::ServerError;
use crate::event::Event;
use crate::pool::{BufferPool, PooledPayloadBuilder};
use crate::service::{CallContext, ServiceDesc, StreamingHandler, UnaryHandler};
use crate::stream::RpcStream;
use crate::worker::WorkerPool;
use quiver_codec::encoding::{decode_payload, encode_payload};
use quiver_codec::payload::PayloadBuilder;
use quiver_codec::{write_message, Code, Header, Message, PubAck, Publish, Status};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

const DEFAULT_MAX_RECEIVE_MESSAGE_SIZE: usize = 4 * 1024 * 1024;
const DEFAULT_MAX_SEND_MESSAGE_SIZE: usize = (1 << 31) - 1;
const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;
const DEFAULT_MAX_CONNECTION_IDLE: Duration = Duration::from_secs(3);

/// Tunables for a [`Server`]. All fields have defaults.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub max_receive_message_size: usize,
    pub max_send_message_size: usize,
    /// Worker count; zero runs each handler on an ad-hoc task.
    pub num_server_workers: u32,
    /// In-flight handler bound per connection.
    pub max_concurrent_streams: u32,
    pub max_connection_idle: Duration,
    pub buffer_pool: Arc<BufferPool>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            max_receive_message_size: DEFAULT_MAX_RECEIVE_MESSAGE_SIZE,
            max_send_message_size: DEFAULT_MAX_SEND_MESSAGE_SIZE,
            num_server_workers: 0,
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            max_connection_idle: DEFAULT_MAX_CONNECTION_IDLE,
            buffer_pool: BufferPool::shared(),
        }
    }
}

impl ServerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_receive_message_size(mut self, size: usize) -> Self {
        self.max_receive_message_size = size;
        self
    }

    pub fn with_max_send_message_size(mut self, size: usize) -> Self {
        self.max_send_message_size = size;
        self
    }

    pub fn with_num_server_workers(mut self, workers: u32) -> Self {
        self.num_server_workers = workers;
        self
    }

    pub fn with_max_concurrent_streams(mut self, streams: u32) -> Self {
        self.max_concurrent_streams = streams;
        self
    }

    pub fn with_max_connection_idle(mut self, idle: Duration) -> Self {
        self.max_connection_idle = idle;
        self
    }

    pub fn with_buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.buffer_pool = pool;
        self
    }
}

enum Route {
    Unary(UnaryHandler),
    Streaming(StreamingHandler),
}

/// The RPC server.
pub struct Server {
    opts: ServerOptions,
    services: RwLock<HashMap<String, ServiceDesc>>,
    quit: Arc<Event>,
    done: Arc<Event>,
    workers: Option<WorkerPool>,
    builder: Arc<dyn PayloadBuilder>,
}

impl Server {
    pub fn new(opts: ServerOptions) -> Self {
        let workers = match opts.num_server_workers {
            0 => None,
            n => Some(WorkerPool::new(n)),
        };
        let builder: Arc<dyn PayloadBuilder> =
            Arc::new(PooledPayloadBuilder::new(Arc::clone(&opts.buffer_pool)));
        Server {
            opts,
            services: RwLock::new(HashMap::new()),
            quit: Arc::new(Event::new()),
            done: Arc::new(Event::new()),
            workers,
            builder,
        }
    }

    /// Registers a service. Fails when the name is already taken. The
    /// registry is frozen once serving starts.
    pub fn register_service(&self, desc: ServiceDesc) -> Result<(), ServerError> {
        let mut services = self.services.write().unwrap();
        if services.contains_key(desc.name()) {
            return Err(ServerError::DuplicateService(desc.name().to_string()));
        }
        tracing::info!(service = %desc.name(), "registered service");
        services.insert(desc.name().to_string(), desc);
        Ok(())
    }

    pub fn options(&self) -> &ServerOptions {
        &self.opts
    }

    pub(crate) fn quit_event(&self) -> Arc<Event> {
        Arc::clone(&self.quit)
    }

    pub(crate) fn payload_builder(&self) -> Arc<dyn PayloadBuilder> {
        Arc::clone(&self.builder)
    }

    /// Initiates shutdown: the accept loop exits, no further streams are
    /// accepted, in-flight handlers run to completion.
    pub fn shutdown(&self) {
        self.quit.fire();
    }

    /// Resolves once the accept loop has returned.
    pub async fn done(&self) {
        self.done.fired().await
    }

    /// Accepts connections until the endpoint closes or shutdown is
    /// initiated. Handshake failures back off exponentially (5 ms doubling
    /// to 1 s) and the backoff is interruptible by shutdown.
    pub async fn serve(self: &Arc<Self>, endpoint: quinn::Endpoint) -> Result<(), ServerError> {
        tracing::info!(addr = %endpoint.local_addr()?, "server listening");
        let mut backoff = Duration::ZERO;

        loop {
            if self.quit.has_fired() {
                break;
            }
            let incoming = tokio::select! {
                incoming = endpoint.accept() => incoming,
                _ = self.quit.fired() => break,
            };
            let Some(incoming) = incoming else {
                // Endpoint closed.
                break;
            };

            match incoming.await {
                Ok(connection) => {
                    backoff = Duration::ZERO;
                    tracing::info!(remote = %connection.remote_address(), "connection accepted");
                    let conn = ServerConn::new(connection, self);
                    let srv = Arc::clone(self);
                    tokio::spawn(async move {
                        let remote = conn.remote_addr;
                        if let Err(e) = conn.serve(srv).await {
                            tracing::debug!(%remote, error = %e, "connection ended with error");
                        } else {
                            tracing::info!(%remote, "connection closed");
                        }
                    });
                }
                Err(e) => {
                    backoff = if backoff.is_zero() {
                        Duration::from_millis(5)
                    } else {
                        (backoff * 2).min(Duration::from_secs(1))
                    };
                    tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "handshake failed, backing off");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = self.quit.fired() => break,
                    }
                }
            }
        }

        self.done.fire();
        Ok(())
    }

    /// Routes a Publish under the connection's stream quota, through the
    /// worker pool when one is configured.
    pub(crate) async fn handle_publish(
        self: &Arc<Self>,
        conn: &Arc<ServerConn>,
        request: Publish,
        stream: BiStream,
    ) {
        let Ok(permit) = Arc::clone(&conn.stream_quota).acquire_owned().await else {
            return;
        };

        if let Some(pool) = &self.workers {
            if !pool.reserve() {
                drop(permit);
                reject_resource_exhausted(request, stream).await;
                return;
            }
        }

        let srv = Arc::clone(self);
        let remote = conn.remote_addr;
        let job = async move {
            let _permit = permit;
            if let Err(e) = srv.handle_stream(remote, request, stream).await {
                tracing::debug!(%remote, error = %e, "stream handler failed");
            }
        };

        match &self.workers {
            Some(pool) => pool.submit(Box::pin(job)),
            None => {
                tokio::spawn(job);
            }
        }
    }

    /// Parses the request path and runs the unary or streaming path.
    async fn handle_stream(
        self: Arc<Self>,
        remote: SocketAddr,
        request: Publish,
        stream: BiStream,
    ) -> Result<(), ServerError> {
        let route = split_path(&request.path).and_then(|(service, method)| {
            let services = self.services.read().unwrap();
            let desc = services.get(service)?;
            desc.methods
                .get(method)
                .cloned()
                .map(Route::Unary)
                .or_else(|| desc.streams.get(method).cloned().map(Route::Streaming))
        });

        match route {
            None => self.reply_unimplemented(request, stream).await,
            Some(Route::Unary(handler)) => {
                self.process_unary(handler, remote, request, stream).await
            }
            Some(Route::Streaming(handler)) => {
                self.process_streaming(handler, remote, request, stream)
                    .await
            }
        }
    }

    async fn reply_unimplemented(
        &self,
        request: Publish,
        mut stream: BiStream,
    ) -> Result<(), ServerError> {
        tracing::debug!(path = %request.path, "no handler registered");
        let ack = Message::PubAck(PubAck {
            header: Header {
                ack_required: request.header.ack_required,
                ..Default::default()
            },
            message_id: request.message_id,
            status: Status::new(Code::Unimplemented),
            payload: None,
        });
        write_message(&mut stream.send, &ack).await?;
        let _ = stream.send.finish();
        Ok(())
    }

    async fn process_unary(
        &self,
        handler: UnaryHandler,
        remote: SocketAddr,
        mut request: Publish,
        mut stream: BiStream,
    ) -> Result<(), ServerError> {
        let compressed = request.header.compressed;
        let ctx = CallContext {
            path: request.path.clone(),
            props: std::mem::take(&mut request.props),
            remote_addr: remote,
            compressed,
        };
        // The request payload is freed here, whatever the handler does.
        let body = decode_payload(request.take_payload(), compressed)?;

        match handler(ctx, body).await {
            Ok(reply) => {
                let payload = match reply.as_deref() {
                    Some(body) if body.len() > self.opts.max_send_message_size => {
                        return Err(ServerError::ReplyTooLarge {
                            size: body.len(),
                            max: self.opts.max_send_message_size,
                        });
                    }
                    Some(body) => encode_payload(body, compressed)?,
                    None => None,
                };
                let ack = Message::PubAck(PubAck {
                    header: Header {
                        ack_required: request.header.ack_required,
                        compressed,
                        dup: false,
                    },
                    message_id: request.message_id,
                    status: Status::ok(),
                    payload,
                });
                write_message(&mut stream.send, &ack).await?;
            }
            Err(e) => {
                // The handler owns its error signalling; no PubAck here.
                tracing::warn!(path = %request.path, error = %e, "unary handler failed");
            }
        }

        let _ = stream.send.finish();
        Ok(())
    }

    async fn process_streaming(
        &self,
        handler: StreamingHandler,
        remote: SocketAddr,
        request: Publish,
        stream: BiStream,
    ) -> Result<(), ServerError> {
        let ctx = CallContext {
            path: request.path.clone(),
            props: request.props.clone(),
            remote_addr: remote,
            compressed: request.header.compressed,
        };
        let mut rpc = RpcStream::new(
            stream,
            request,
            Arc::clone(&self.builder),
            self.opts.max_receive_message_size,
            self.opts.max_send_message_size,
        );

        if let Err(e) = handler(ctx, &mut rpc).await {
            tracing::warn!(remote = %remote, error = %e, "streaming handler failed");
        }
        rpc.finish();
        Ok(())
    }
}

/// Writes a ResourceExhausted ack and finishes the stream. The request is
/// dropped with its payload.
async fn reject_resource_exhausted(request: Publish, mut stream: BiStream) {
    tracing::warn!(path = %request.path, "worker pool saturated, rejecting");
    let ack = Message::PubAck(PubAck {
        header: Header {
            ack_required: request.header.ack_required,
            ..Default::default()
        },
        message_id: request.message_id,
        status: Status::new(Code::ResourceExhausted),
        payload: None,
    });
    if let Err(e) = write_message(&mut stream.send, &ack).await {
        tracing::debug!(error = %e, "failed to write rejection ack");
    }
    let _ = stream.send.finish();
}

/// Splits `/service/method` at the last slash; a leading slash is tolerated.
fn split_path(path: &str) -> Option<(&str, &str)> {
    let path = path.strip_prefix('/').unwrap_or(path);
    let pos = path.rfind('/')?;
    let (service, method) = (&path[..pos], &path[pos + 1..]);
    if service.is_empty() || method.is_empty() {
        return None;
    }
    Some((service, method))
}
