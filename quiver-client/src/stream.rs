//! Client side of a bidirectional streaming call.
//!
//! The request path is carried on the first frame sent; the server reads it
//! to route the call before the streaming handler starts.

use crate::error::ClientError;
use bytes::Bytes;
use quiver_codec::encoding::{decode_payload, encode_payload};
use quiver_codec::{
    read_message, write_message, Header, Message, Props, Publish, SlicePayloadBuilder,
};

/// A streaming call in progress.
pub struct ClientStream {
    send: quinn::SendStream,
    recv: quinn::RecvStream,
    path: String,
    first_sent: bool,
    compressed: bool,
    pending_md: Props,
    max_receive: usize,
}

impl ClientStream {
    pub(crate) fn new(
        send: quinn::SendStream,
        recv: quinn::RecvStream,
        path: String,
        max_receive: usize,
    ) -> Self {
        ClientStream {
            send,
            recv,
            path,
            first_sent: false,
            compressed: false,
            pending_md: Props::new(),
            max_receive,
        }
    }

    /// Enables payload compression for subsequent sends. Must be set before
    /// the first send to take effect server-side.
    pub fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }

    /// Sends a message body, or a bare metadata frame when `body` is `None`.
    pub async fn send(&mut self, body: Option<&[u8]>) -> Result<(), ClientError> {
        let payload = match body {
            Some(body) => encode_payload(body, self.compressed)?,
            None => None,
        };
        let path = if self.first_sent {
            String::new()
        } else {
            self.first_sent = true;
            self.path.clone()
        };
        let publish = Publish {
            header: Header {
                ack_required: false,
                compressed: self.compressed,
                dup: false,
            },
            message_id: 0,
            path,
            props: std::mem::take(&mut self.pending_md),
            payload,
        };
        write_message(&mut self.send, &Message::Publish(publish)).await?;
        Ok(())
    }

    /// Receives the next inbound message body. Returns `None` once the
    /// server finishes its half of the stream.
    pub async fn recv(&mut self) -> Result<Option<Bytes>, ClientError> {
        loop {
            match read_message(&mut self.recv, &SlicePayloadBuilder, self.max_receive).await? {
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

    /// Accumulates metadata to be flushed with the next send.
    pub fn set_header(&mut self, md: Props) {
        self.pending_md.merge(md);
    }

    /// Finishes the send half, signalling end of input to the server.
    pub fn finish(&mut self) {
        let _ = self.send.finish();
    }
}
