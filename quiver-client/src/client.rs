//! Connection management and call entry points.

use crate::error::ClientError;
use crate::stream::ClientStream;
use crate::tls;
use bytes::Bytes;
use quiver_codec::encoding::{decode_payload, encode_payload};
use quiver_codec::{
    read_message, write_message, Connect, Disconnect, Header, Message, PingReq, Props, Publish,
    SlicePayloadBuilder, Status, PROTOCOL_NAME, PROTOCOL_VERSION,
};
use rustls::RootCertStore;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

/// TLS configuration for client connections.
#[derive(Debug, Clone, Default)]
pub struct TlsClientConfig {
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If unset, system roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// A prebuilt root store; takes precedence over `ca_cert_path`.
    pub root_store: Option<RootCertStore>,
    /// Skip server certificate verification (INSECURE - development only).
    pub insecure: bool,
}

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server name for SNI and certificate verification.
    pub server_name: String,
    /// ALPN identifier; must match the server's.
    pub alpn: Vec<u8>,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Per-call timeout.
    pub request_timeout: Duration,
    /// Largest frame body accepted from the server, in bytes.
    pub max_receive_message_size: usize,
    /// Client id sent in the Connect handshake.
    pub client_id: String,
    /// Credentials sent in the Connect handshake, if any.
    pub authorization: Option<String>,
    /// Keepalive interval advertised in the Connect handshake.
    pub keep_alive: u16,
    /// TLS configuration.
    pub tls: TlsClientConfig,
}

impl ClientConfig {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
            alpn: quiver_codec::DEFAULT_ALPN.to_vec(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_receive_message_size: 4 * 1024 * 1024,
            client_id: String::new(),
            authorization: None,
            keep_alive: 0,
            tls: TlsClientConfig::default(),
        }
    }

    pub fn with_alpn(mut self, alpn: impl Into<Vec<u8>>) -> Self {
        self.alpn = alpn.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = id.into();
        self
    }

    pub fn with_authorization(mut self, token: impl Into<String>) -> Self {
        self.authorization = Some(token.into());
        self
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_root_store(mut self, store: RootCertStore) -> Self {
        self.tls.root_store = Some(store);
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.tls.insecure = true;
        self
    }
}

/// A unary call result: the ack status and the decoded reply body.
#[derive(Debug)]
pub struct UnaryResponse {
    pub status: Status,
    pub body: Bytes,
    pub message_id: u16,
}

/// A connection to a quiver server.
pub struct Client {
    endpoint: quinn::Endpoint,
    connection: quinn::Connection,
    config: ClientConfig,
    next_message_id: AtomicU16,
}

impl Client {
    /// Connects to the server and performs the Connect handshake.
    pub async fn connect(addr: SocketAddr, config: ClientConfig) -> Result<Self, ClientError> {
        tracing::debug!(%addr, server_name = %config.server_name, "connecting");

        let quinn_config = tls::client_config(&config)?;
        let mut endpoint = quinn::Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))?;
        endpoint.set_default_client_config(quinn_config);

        let connecting = endpoint.connect(addr, &config.server_name)?;
        let connection = tokio::time::timeout(config.connect_timeout, connecting)
            .await
            .map_err(|_| ClientError::Timeout)??;

        tracing::debug!(%addr, "connected");
        let client = Client {
            endpoint,
            connection,
            config,
            next_message_id: AtomicU16::new(1),
        };
        client.handshake().await?;
        Ok(client)
    }

    /// Sends the Connect frame carrying client identity and credentials.
    async fn handshake(&self) -> Result<(), ClientError> {
        let connect = Connect {
            header: Header::default(),
            protocol_name: PROTOCOL_NAME.to_string(),
            protocol_version: PROTOCOL_VERSION,
            clean_session: true,
            keep_alive: self.config.keep_alive,
            client_id: self.config.client_id.clone(),
            authorization: self.config.authorization.clone(),
            client_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            os_type: Some(std::env::consts::OS.to_string()),
            props: Props::new(),
        };
        let (mut send, _recv) = self.connection.open_bi().await?;
        write_message(&mut send, &Message::Connect(connect)).await?;
        let _ = send.finish();
        Ok(())
    }

    fn next_id(&self) -> u16 {
        self.next_message_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Performs a unary call: one Publish out, one PubAck back, stream
    /// closed. The reply status distinguishes failures.
    pub async fn unary(&self, path: &str, body: &[u8]) -> Result<UnaryResponse, ClientError> {
        self.unary_with(path, body, Props::new(), false).await
    }

    /// Unary call with explicit properties and compression.
    pub async fn unary_with(
        &self,
        path: &str,
        body: &[u8],
        props: Props,
        compressed: bool,
    ) -> Result<UnaryResponse, ClientError> {
        let message_id = self.next_id();
        let request = Publish {
            header: Header {
                ack_required: true,
                compressed,
                dup: false,
            },
            message_id,
            path: path.to_string(),
            props,
            payload: encode_payload(body, compressed)?,
        };

        let (mut send, mut recv) = self.connection.open_bi().await?;
        write_message(&mut send, &Message::Publish(request)).await?;
        let _ = send.finish();

        let reply = tokio::time::timeout(
            self.config.request_timeout,
            read_message(
                &mut recv,
                &SlicePayloadBuilder,
                self.config.max_receive_message_size,
            ),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;

        match reply {
            Some(Message::PubAck(mut ack)) => {
                if ack.message_id != message_id {
                    return Err(ClientError::MessageIdMismatch {
                        expected: message_id,
                        got: ack.message_id,
                    });
                }
                let compressed = ack.header.compressed;
                let body = decode_payload(ack.take_payload(), compressed)?;
                Ok(UnaryResponse {
                    status: ack.status,
                    body,
                    message_id: ack.message_id,
                })
            }
            Some(_) => Err(ClientError::UnexpectedMessage("expected PubAck")),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Opens a bidirectional streaming call. The path is carried on the
    /// first frame sent.
    pub async fn streaming(&self, path: &str) -> Result<ClientStream, ClientError> {
        let (send, recv) = self.connection.open_bi().await?;
        Ok(ClientStream::new(
            send,
            recv,
            path.to_string(),
            self.config.max_receive_message_size,
        ))
    }

    /// Probes liveness; also resets the server's idle timer.
    pub async fn ping(&self) -> Result<(), ClientError> {
        let (mut send, mut recv) = self.connection.open_bi().await?;
        write_message(&mut send, &Message::PingReq(PingReq::default())).await?;
        let _ = send.finish();

        let reply = tokio::time::timeout(
            self.config.request_timeout,
            read_message(
                &mut recv,
                &SlicePayloadBuilder,
                self.config.max_receive_message_size,
            ),
        )
        .await
        .map_err(|_| ClientError::Timeout)??;

        match reply {
            Some(Message::PingResp(_)) => Ok(()),
            Some(_) => Err(ClientError::UnexpectedMessage("expected PingResp")),
            None => Err(ClientError::ConnectionClosed),
        }
    }

    /// Asks the server for a graceful close.
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        let (mut send, _recv) = self.connection.open_bi().await?;
        let disconnect = Disconnect {
            header: Header::default(),
            reason_code: 0,
        };
        write_message(&mut send, &Message::Disconnect(disconnect)).await?;
        let _ = send.finish();
        Ok(())
    }

    /// Resolves when the connection ends, with the reason.
    pub async fn closed(&self) -> quinn::ConnectionError {
        self.connection.closed().await
    }

    /// The underlying QUIC connection.
    pub fn connection(&self) -> &quinn::Connection {
        &self.connection
    }

    /// Closes the connection and endpoint immediately.
    pub fn close(&self) {
        self.connection.close(quinn::VarInt::from_u32(0), b"");
        self.endpoint.close(quinn::VarInt::from_u32(0), b"");
    }
}
