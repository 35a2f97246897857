//! Message variants and frame-level encode/decode.
//!
//! Each variant encodes its body into a scratch buffer; the total remaining
//! length accounts for the trailing payload separately so payload bytes are
//! never copied into the scratch. On the wire a frame goes out as one write
//! for header + body and a second for the payload.

use crate::error::CodecError;
use crate::frame::{Header, MessageType, Props, Status};
use crate::payload::{Payload, PayloadBuilder};
use crate::wire;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One decoded message frame.
#[derive(Debug, PartialEq)]
pub enum Message {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    PubAck(PubAck),
    PingReq(PingReq),
    PingResp(PingResp),
    Disconnect(Disconnect),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Connect(_) => MessageType::Connect,
            Message::ConnAck(_) => MessageType::ConnAck,
            Message::Publish(_) => MessageType::Publish,
            Message::PubAck(_) => MessageType::PubAck,
            Message::PingReq(_) => MessageType::PingReq,
            Message::PingResp(_) => MessageType::PingResp,
            Message::Disconnect(_) => MessageType::Disconnect,
        }
    }

    pub fn header(&self) -> &Header {
        match self {
            Message::Connect(m) => &m.header,
            Message::ConnAck(m) => &m.header,
            Message::Publish(m) => &m.header,
            Message::PubAck(m) => &m.header,
            Message::PingReq(m) => &m.header,
            Message::PingResp(m) => &m.header,
            Message::Disconnect(m) => &m.header,
        }
    }

    /// Takes the payload out of a Publish or PubAck; `None` for other kinds.
    /// Dropping the returned payload releases it.
    pub fn take_payload(&mut self) -> Option<Payload> {
        match self {
            Message::Publish(m) => m.payload.take(),
            Message::PubAck(m) => m.payload.take(),
            _ => None,
        }
    }

    /// Encodes the full frame (header, body, and payload) into one buffer.
    pub fn encode(&self) -> Result<BytesMut, CodecError> {
        let (mut head, payload) = self.encode_parts()?;
        if let Some(payload) = payload {
            head.extend_from_slice(payload.as_slice());
        }
        Ok(head)
    }

    /// Encodes header + body, returning the trailing payload separately.
    fn encode_parts(&self) -> Result<(BytesMut, Option<&Payload>), CodecError> {
        match self {
            Message::Connect(m) => Ok((m.encode_frame()?, None)),
            Message::ConnAck(m) => Ok((m.encode_frame()?, None)),
            Message::Publish(m) => Ok((m.encode_frame()?, m.payload.as_ref())),
            Message::PubAck(m) => Ok((m.encode_frame()?, m.payload.as_ref())),
            Message::PingReq(m) => {
                Ok((encode_frame(MessageType::PingReq, &m.header, &[], 0)?, None))
            }
            Message::PingResp(m) => {
                Ok((encode_frame(MessageType::PingResp, &m.header, &[], 0)?, None))
            }
            Message::Disconnect(m) => Ok((m.encode_frame()?, None)),
        }
    }

    /// Decodes one complete frame from a buffer.
    pub fn decode(buf: &mut Bytes, builder: &dyn PayloadBuilder) -> Result<Message, CodecError> {
        let first = wire::get_u8(buf)?;
        let (msg_type, header) = Header::decode_byte(first)?;
        let (remaining, _) = wire::get_varint(buf)?;
        let remaining = remaining as usize;
        if buf.remaining() < remaining {
            return Err(CodecError::DataExceedsPacket);
        }
        let mut body = buf.split_to(remaining);
        decode_body(msg_type, header, &mut body, builder)
    }
}

/// Writes the frame header and body, validating the remaining-length bound.
fn encode_frame(
    msg_type: MessageType,
    header: &Header,
    body: &[u8],
    extra_payload_len: usize,
) -> Result<BytesMut, CodecError> {
    let total = body.len() + extra_payload_len;
    if total > wire::MAX_REMAINING_LENGTH as usize {
        return Err(CodecError::MessageTooLong);
    }
    let mut out = BytesMut::with_capacity(1 + wire::VARINT_MAX_BYTES + body.len());
    out.put_u8(header.type_flags(msg_type));
    wire::put_varint(total as u32, &mut out);
    out.extend_from_slice(body);
    Ok(out)
}

fn decode_body(
    msg_type: MessageType,
    header: Header,
    body: &mut Bytes,
    builder: &dyn PayloadBuilder,
) -> Result<Message, CodecError> {
    match msg_type {
        MessageType::Connect => Connect::decode_body(header, body).map(Message::Connect),
        MessageType::ConnAck => ConnAck::decode_body(header, body).map(Message::ConnAck),
        MessageType::Publish => {
            Publish::decode_body(header, body, builder).map(Message::Publish)
        }
        MessageType::PubAck => PubAck::decode_body(header, body, builder).map(Message::PubAck),
        MessageType::PingReq => {
            if !body.is_empty() {
                return Err(CodecError::MessageTooLong);
            }
            Ok(Message::PingReq(PingReq { header }))
        }
        MessageType::PingResp => {
            if !body.is_empty() {
                return Err(CodecError::MessageTooLong);
            }
            Ok(Message::PingResp(PingResp { header }))
        }
        MessageType::Disconnect => Disconnect::decode_body(header, body).map(Message::Disconnect),
    }
}

/// Reads one message frame from the transport.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first header
/// byte. A remaining length above `max_body` fails with `FrameTooLarge`
/// before any body bytes are read.
pub async fn read_message<R>(
    r: &mut R,
    builder: &dyn PayloadBuilder,
    max_body: usize,
) -> Result<Option<Message>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut first = [0u8; 1];
    if r.read(&mut first).await? == 0 {
        return Ok(None);
    }
    let (msg_type, header) = Header::decode_byte(first[0])?;
    let remaining = wire::read_varint(r).await? as usize;
    if remaining > max_body {
        return Err(CodecError::FrameTooLarge {
            size: remaining,
            max: max_body,
        });
    }
    let mut body = vec![0u8; remaining];
    r.read_exact(&mut body).await?;
    let mut body = Bytes::from(body);
    decode_body(msg_type, header, &mut body, builder).map(Some)
}

/// Writes one message frame to the transport: header + body in one write,
/// payload in a second.
pub async fn write_message<W>(w: &mut W, msg: &Message) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let (head, payload) = msg.encode_parts()?;
    w.write_all(&head).await?;
    if let Some(payload) = payload {
        w.write_all(payload.as_slice()).await?;
    }
    Ok(())
}

/// Connection request. Credentials and client metadata are carried only when
/// the corresponding flag bit is set.
#[derive(Debug, Default, PartialEq)]
pub struct Connect {
    pub header: Header,
    pub protocol_name: String,
    pub protocol_version: u8,
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: String,
    pub authorization: Option<String>,
    pub client_version: Option<String>,
    pub os_type: Option<String>,
    pub props: Props,
}

impl Connect {
    fn encode_frame(&self) -> Result<BytesMut, CodecError> {
        let mut body = BytesMut::new();

        let mut flags = 0u8;
        if self.os_type.is_some() {
            flags |= 0x10;
        }
        if self.client_version.is_some() {
            flags |= 0x08;
        }
        if self.authorization.is_some() {
            flags |= 0x04;
        }
        if self.clean_session {
            flags |= 0x02;
        }

        wire::put_string(&self.protocol_name, &mut body)?;
        wire::put_u8(self.protocol_version, &mut body);
        wire::put_u8(flags, &mut body);
        wire::put_u16(self.keep_alive, &mut body);
        wire::put_string(&self.client_id, &mut body)?;
        if let Some(auth) = &self.authorization {
            wire::put_string(auth, &mut body)?;
        }
        if let Some(version) = &self.client_version {
            wire::put_string(version, &mut body)?;
        }
        if let Some(os) = &self.os_type {
            wire::put_string(os, &mut body)?;
        }
        self.props.encode(&mut body)?;

        encode_frame(MessageType::Connect, &self.header, &body, 0)
    }

    fn decode_body(header: Header, body: &mut Bytes) -> Result<Self, CodecError> {
        let protocol_name = wire::get_string(body)?;
        let protocol_version = wire::get_u8(body)?;
        let flags = wire::get_u8(body)?;
        let keep_alive = wire::get_u16(body)?;
        let client_id = wire::get_string(body)?;

        let authorization = if flags & 0x04 != 0 {
            Some(wire::get_string(body)?)
        } else {
            None
        };
        let client_version = if flags & 0x08 != 0 {
            Some(wire::get_string(body)?)
        } else {
            None
        };
        let os_type = if flags & 0x10 != 0 {
            Some(wire::get_string(body)?)
        } else {
            None
        };
        let props = Props::decode(body)?;

        Ok(Connect {
            header,
            protocol_name,
            protocol_version,
            clean_session: flags & 0x02 != 0,
            keep_alive,
            client_id,
            authorization,
            client_version,
            os_type,
            props,
        })
    }
}

/// Connection acknowledgement. The optional strings are gated by flag bits;
/// decoders mirror the bit assignment exactly (bit 0 is SessionPresent).
#[derive(Debug, Default, PartialEq)]
pub struct ConnAck {
    pub header: Header,
    pub session_present: bool,
    pub return_code: u8,
    pub keep_alive: u16,
    pub auth_schema: Option<String>,
    pub domain: Option<String>,
    pub opt_domains: Option<String>,
}

impl ConnAck {
    fn encode_frame(&self) -> Result<BytesMut, CodecError> {
        let mut body = BytesMut::new();

        let mut flags = 0u8;
        if self.opt_domains.is_some() {
            flags |= 0x08;
        }
        if self.domain.is_some() {
            flags |= 0x04;
        }
        if self.auth_schema.is_some() {
            flags |= 0x02;
        }
        if self.session_present {
            flags |= 0x01;
        }

        wire::put_u8(flags, &mut body);
        wire::put_u8(self.return_code, &mut body);
        wire::put_u16(self.keep_alive, &mut body);
        if let Some(schema) = &self.auth_schema {
            wire::put_string(schema, &mut body)?;
        }
        if let Some(domain) = &self.domain {
            wire::put_string(domain, &mut body)?;
        }
        if let Some(domains) = &self.opt_domains {
            wire::put_string(domains, &mut body)?;
        }

        encode_frame(MessageType::ConnAck, &self.header, &body, 0)
    }

    fn decode_body(header: Header, body: &mut Bytes) -> Result<Self, CodecError> {
        let flags = wire::get_u8(body)?;
        let return_code = wire::get_u8(body)?;
        let keep_alive = wire::get_u16(body)?;

        let auth_schema = if flags & 0x02 != 0 {
            Some(wire::get_string(body)?)
        } else {
            None
        };
        let domain = if flags & 0x04 != 0 {
            Some(wire::get_string(body)?)
        } else {
            None
        };
        let opt_domains = if flags & 0x08 != 0 {
            Some(wire::get_string(body)?)
        } else {
            None
        };

        Ok(ConnAck {
            header,
            session_present: flags & 0x01 != 0,
            return_code,
            keep_alive,
            auth_schema,
            domain,
            opt_domains,
        })
    }
}

/// Application request or streamed message. The message id is serialised only
/// when the header's ack-required flag is set; the rest of the body after the
/// property map is the opaque payload.
#[derive(Debug, Default, PartialEq)]
pub struct Publish {
    pub header: Header,
    pub message_id: u16,
    pub path: String,
    pub props: Props,
    pub payload: Option<Payload>,
}

impl Publish {
    /// Takes the payload out; dropping it releases it.
    pub fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    fn encode_frame(&self) -> Result<BytesMut, CodecError> {
        let mut body = BytesMut::new();
        wire::put_string(&self.path, &mut body)?;
        if self.header.ack_required {
            wire::put_u16(self.message_id, &mut body);
        }
        self.props.encode(&mut body)?;

        let payload_len = self.payload.as_ref().map_or(0, Payload::len);
        encode_frame(MessageType::Publish, &self.header, &body, payload_len)
    }

    fn decode_body(
        header: Header,
        body: &mut Bytes,
        builder: &dyn PayloadBuilder,
    ) -> Result<Self, CodecError> {
        let path = wire::get_string(body)?;
        let message_id = if header.ack_required {
            wire::get_u16(body)?
        } else {
            0
        };
        let props = Props::decode(body)?;
        let payload = builder.make(body, body.remaining())?;

        Ok(Publish {
            header,
            message_id,
            path,
            props,
            payload,
        })
    }
}

/// Acknowledgement for an ack-required Publish, carrying a status and an
/// optional reply payload.
#[derive(Debug, Default, PartialEq)]
pub struct PubAck {
    pub header: Header,
    pub message_id: u16,
    pub status: Status,
    pub payload: Option<Payload>,
}

impl PubAck {
    /// Takes the payload out; dropping it releases it.
    pub fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }

    fn encode_frame(&self) -> Result<BytesMut, CodecError> {
        let mut body = BytesMut::new();
        wire::put_u16(self.message_id, &mut body);
        self.status.encode(&mut body)?;

        let payload_len = self.payload.as_ref().map_or(0, Payload::len);
        encode_frame(MessageType::PubAck, &self.header, &body, payload_len)
    }

    fn decode_body(
        header: Header,
        body: &mut Bytes,
        builder: &dyn PayloadBuilder,
    ) -> Result<Self, CodecError> {
        let message_id = wire::get_u16(body)?;
        let status = Status::decode(body)?;
        let payload = builder.make(body, body.remaining())?;

        Ok(PubAck {
            header,
            message_id,
            status,
            payload,
        })
    }
}

/// Liveness probe; header only.
#[derive(Debug, Default, PartialEq)]
pub struct PingReq {
    pub header: Header,
}

/// Liveness response; header only.
#[derive(Debug, Default, PartialEq)]
pub struct PingResp {
    pub header: Header,
}

/// Graceful teardown carrying a one-byte reason code.
#[derive(Debug, Default, PartialEq)]
pub struct Disconnect {
    pub header: Header,
    pub reason_code: u8,
}

impl Disconnect {
    fn encode_frame(&self) -> Result<BytesMut, CodecError> {
        let mut body = BytesMut::new();
        wire::put_u8(self.reason_code, &mut body);
        encode_frame(MessageType::Disconnect, &self.header, &body, 0)
    }

    fn decode_body(header: Header, body: &mut Bytes) -> Result<Self, CodecError> {
        let reason_code = wire::get_u8(body)?;
        if !body.is_empty() {
            return Err(CodecError::MessageTooLong);
        }
        Ok(Disconnect {
            header,
            reason_code,
        })
    }
}
