//! Per-connection state machine.
//!
//! Each accepted QUIC connection gets its own stream-accept loop and a
//! keepalive timer. The first frame on every bidirectional stream classifies
//! it: control frames (Connect, PingReq, Disconnect) are handled inline,
//! Publish frames are handed to the dispatcher, anything else closes the
//! connection. Closing is mediated by a single-shot event so exactly one
//! close reaches the transport, carrying the first reason supplied.

use crate::error::ServerError;
use crate::event::Event;
use crate::server::Server;
use quiver_codec::payload::PayloadBuilder;
use quiver_codec::{read_message, write_message, Message, PingResp};
use quinn::VarInt;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Application error codes the core transmits at QUIC close time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Graceful close.
    NoError,
    /// The connection exceeded its idle budget.
    SessionTimeout,
    /// The first frame on a stream was not a recognised kind.
    UnsupportedMessage,
    /// The server is shutting down or the connection failed.
    ServiceUnavailable,
}

impl CloseReason {
    pub fn code(self) -> u32 {
        match self {
            CloseReason::NoError => 0x0000,
            CloseReason::SessionTimeout => 0xFF00,
            CloseReason::UnsupportedMessage => 0xFF01,
            CloseReason::ServiceUnavailable => 0xFF02,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            CloseReason::NoError => "no error",
            CloseReason::SessionTimeout => "session timeout",
            CloseReason::UnsupportedMessage => "unsupported message type",
            CloseReason::ServiceUnavailable => "service unavailable",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Both halves of an accepted bidirectional stream.
pub(crate) struct BiStream {
    pub(crate) send: quinn::SendStream,
    pub(crate) recv: quinn::RecvStream,
}

/// Server-side connection state.
pub(crate) struct ServerConn {
    conn: quinn::Connection,
    pub(crate) remote_addr: SocketAddr,
    quit: Arc<Event>,
    closed: Event,
    close_lock: Mutex<()>,
    idle: Mutex<Option<Instant>>,
    max_connection_idle: Duration,
    pub(crate) stream_quota: Arc<Semaphore>,
    builder: Arc<dyn PayloadBuilder>,
    max_receive: usize,
}

impl ServerConn {
    pub(crate) fn new(conn: quinn::Connection, srv: &Server) -> Arc<Self> {
        let remote_addr = conn.remote_address();
        Arc::new(ServerConn {
            conn,
            remote_addr,
            quit: srv.quit_event(),
            closed: Event::new(),
            close_lock: Mutex::new(()),
            idle: Mutex::new(None),
            max_connection_idle: srv.options().max_connection_idle,
            stream_quota: Arc::new(Semaphore::new(srv.options().max_concurrent_streams as usize)),
            builder: srv.payload_builder(),
            max_receive: srv.options().max_receive_message_size,
        })
    }

    fn touch_idle(&self) {
        *self.idle.lock().unwrap() = Some(Instant::now());
    }

    /// Emits exactly one transport close, with the first reason supplied.
    pub(crate) fn close_with_reason(&self, reason: CloseReason) {
        let _guard = self.close_lock.lock().unwrap();
        if self.closed.fire() {
            tracing::debug!(remote = %self.remote_addr, %reason, "closing connection");
            self.conn
                .close(VarInt::from_u32(reason.code()), reason.message().as_bytes());
        }
    }

    /// Idle watchdog. Rearms for the residual budget after each observed
    /// frame; closes the connection once the budget is exhausted.
    async fn keepalive(self: Arc<Self>) {
        let mut wait = self.max_connection_idle;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    let idle = *self.idle.lock().unwrap();
                    match idle {
                        None => wait = self.max_connection_idle,
                        Some(last) => match self.max_connection_idle.checked_sub(last.elapsed()) {
                            Some(residual) => wait = residual,
                            None => {
                                self.close_with_reason(CloseReason::SessionTimeout);
                                return;
                            }
                        },
                    }
                }
                _ = self.closed.fired() => return,
                _ = self.quit.fired() => return,
            }
        }
    }

    /// Runs the connection until either endpoint closes it, the idle timer
    /// expires, or the server shuts down.
    pub(crate) async fn serve(self: Arc<Self>, srv: Arc<Server>) -> Result<(), ServerError> {
        if self.quit.has_fired() {
            self.close_with_reason(CloseReason::ServiceUnavailable);
            return Ok(());
        }

        tokio::spawn(Arc::clone(&self).keepalive());

        let result = self.accept_streams(&srv).await;
        // No-op when a reason was already recorded (Disconnect, idle timer).
        self.close_with_reason(CloseReason::ServiceUnavailable);
        result
    }

    async fn accept_streams(self: &Arc<Self>, srv: &Arc<Server>) -> Result<(), ServerError> {
        loop {
            if self.quit.has_fired() {
                return Ok(());
            }

            let stream = tokio::select! {
                stream = self.conn.accept_bi() => stream,
                _ = self.quit.fired() => return Ok(()),
            };
            let (send, recv) = match stream {
                Ok(parts) => parts,
                Err(e) => return connection_end(e),
            };
            let mut stream = BiStream { send, recv };

            let msg =
                match read_message(&mut stream.recv, self.builder.as_ref(), self.max_receive).await
                {
                    Ok(Some(msg)) => msg,
                    Ok(None) => {
                        tracing::debug!(remote = %self.remote_addr, "peer opened an empty stream");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

            match msg {
                Message::Disconnect(d) => {
                    tracing::debug!(remote = %self.remote_addr, reason = d.reason_code, "client disconnect");
                    self.close_with_reason(CloseReason::NoError);
                    return Ok(());
                }
                Message::Connect(c) => {
                    self.touch_idle();
                    tracing::debug!(remote = %self.remote_addr, client_id = %c.client_id, "client connect");
                }
                Message::PingReq(_) => {
                    self.touch_idle();
                    write_message(&mut stream.send, &Message::PingResp(PingResp::default()))
                        .await?;
                    let _ = stream.send.finish();
                }
                Message::Publish(publish) => {
                    self.touch_idle();
                    srv.handle_publish(self, publish, stream).await;
                }
                mut other => {
                    drop(other.take_payload());
                    tracing::warn!(remote = %self.remote_addr, msg_type = ?other.message_type(), "unsupported first message");
                    self.close_with_reason(CloseReason::UnsupportedMessage);
                    return Ok(());
                }
            }
        }
    }
}

/// Maps the end of a connection to a result: a peer close with NoError and a
/// local close are both clean ends; everything else propagates.
fn connection_end(err: quinn::ConnectionError) -> Result<(), ServerError> {
    match err {
        quinn::ConnectionError::ApplicationClosed(ref close)
            if close.error_code == VarInt::from_u32(CloseReason::NoError.code()) =>
        {
            Ok(())
        }
        quinn::ConnectionError::LocallyClosed => Ok(()),
        other => Err(ServerError::Connection(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_codes() {
        assert_eq!(CloseReason::NoError.code(), 0x0000);
        assert_eq!(CloseReason::SessionTimeout.code(), 0xFF00);
        assert_eq!(CloseReason::UnsupportedMessage.code(), 0xFF01);
        assert_eq!(CloseReason::ServiceUnavailable.code(), 0xFF02);
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::SessionTimeout.to_string(), "session timeout");
        assert_eq!(
            CloseReason::UnsupportedMessage.to_string(),
            "unsupported message type"
        );
    }
}
