//! Streaming adapter: one QUIC stream as a bidirectional message channel.
//!
//! The dispatcher has already read the first Publish to route the call, so
//! the adapter holds it as a pre-loaded slot consumed by the first `recv`.
//! Sends are serialised by the send-side lock; a concurrent `recv` proceeds
//! independently on the recv-side lock.

use crate::connection::BiStream;
use crate::error::ServerError;
use bytes::Bytes;
use quiver_codec::encoding::{decode_payload, encode_payload};
use quiver_codec::payload::PayloadBuilder;
use quiver_codec::{read_message, write_message, Header, Message, Props, Publish};
use std::sync::Arc;
use tokio::sync::Mutex;

struct SendHalf {
    stream: quinn::SendStream,
    pending_md: Props,
}

struct RecvHalf {
    stream: quinn::RecvStream,
    first: Option<Publish>,
}

/// Bidirectional message stream handed to streaming handlers.
///
/// The adapter never closes the underlying stream; the dispatcher finishes
/// it after the handler returns.
pub struct RpcStream {
    send: Mutex<SendHalf>,
    recv: Mutex<RecvHalf>,
    compressed: bool,
    builder: Arc<dyn PayloadBuilder>,
    max_receive: usize,
    max_send: usize,
}

impl RpcStream {
    pub(crate) fn new(
        stream: BiStream,
        first: Publish,
        builder: Arc<dyn PayloadBuilder>,
        max_receive: usize,
        max_send: usize,
    ) -> Self {
        RpcStream {
            compressed: first.header.compressed,
            send: Mutex::new(SendHalf {
                stream: stream.send,
                pending_md: Props::new(),
            }),
            recv: Mutex::new(RecvHalf {
                stream: stream.recv,
                first: Some(first),
            }),
            builder,
            max_receive,
            max_send,
        }
    }

    /// Receives the next inbound message body. Returns `None` at end of
    /// stream. Non-Publish frames are drained, their payloads released, and
    /// reading continues.
    pub async fn recv(&self) -> Result<Option<Bytes>, ServerError> {
        let mut recv = self.recv.lock().await;

        if let Some(mut first) = recv.first.take() {
            let compressed = first.header.compressed;
            let body = decode_payload(first.take_payload(), compressed)?;
            return Ok(Some(body));
        }

        loop {
            match read_message(&mut recv.stream, self.builder.as_ref(), self.max_receive).await? {
                None => return Ok(None),
                Some(Message::Publish(mut publish)) => {
                    let compressed = publish.header.compressed;
                    let body = decode_payload(publish.take_payload(), compressed)?;
                    return Ok(Some(body));
                }
                Some(mut other) => {
                    drop(other.take_payload());
                }
            }
        }
    }

    /// Sends a message body, or a bare metadata frame when `body` is `None`.
    /// Uses the compression policy of the first inbound frame; pending
    /// metadata is flushed with the frame and then cleared.
    pub async fn send(&self, body: Option<&[u8]>) -> Result<(), ServerError> {
        let mut send = self.send.lock().await;

        if let Some(body) = body {
            if body.len() > self.max_send {
                return Err(ServerError::ReplyTooLarge {
                    size: body.len(),
                    max: self.max_send,
                });
            }
        }

        let payload = match body {
            Some(body) => encode_payload(body, self.compressed)?,
            None => None,
        };
        let publish = Publish {
            header: Header {
                ack_required: false,
                compressed: self.compressed,
                dup: false,
            },
            message_id: 0,
            path: String::new(),
            props: std::mem::take(&mut send.pending_md),
            payload,
        };
        write_message(&mut send.stream, &Message::Publish(publish)).await?;
        Ok(())
    }

    /// Accumulates metadata to be flushed with the next send.
    pub async fn set_header(&self, md: Props) {
        let mut send = self.send.lock().await;
        send.pending_md.merge(md);
    }

    /// Flushes pending metadata without a body.
    pub async fn send_header(&self) -> Result<(), ServerError> {
        self.send(None).await
    }

    /// Accepted and ignored (reserved).
    pub fn set_trailer(&self, _md: Props) {}

    /// Finishes the send half. Called by the dispatcher once the handler
    /// returns.
    pub(crate) fn finish(&mut self) {
        let _ = self.send.get_mut().stream.finish();
    }
}
