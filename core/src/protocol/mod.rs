//! # RelayMQ Wire Protocol
//!
//! This module defines the single message type that travels between clients
//! and the broker, its binary serialization, and the length-prefixed stream
//! framing used on every transport in both directions.
//!
//! ## Wire Format
//!
//! Each frame on the wire is `[len: u32 BE][body: len bytes]`. The body is a
//! self-describing record with the fields in fixed order:
//!
//! 1. `id` - u32 BE byte length + UTF-8 bytes (32 lowercase hex chars)
//! 2. `topic` - u32 BE byte length + UTF-8 bytes
//! 3. `payload` - u32 BE byte length + raw bytes (length 0 allowed)
//! 4. `timestamp` - u64 BE milliseconds since the Unix epoch, followed by a
//!    tag byte whose low bit marks the timezone (0 = UTC)
//!
//! The encoding is an internal contract: publisher, broker, and subscriber
//! must produce byte-identical output, which is why the client crate reuses
//! this module rather than carrying its own copy.
//!
//! ## Control Topics
//!
//! Topics under the `$SYS/` prefix are consumed by the broker and never
//! forwarded to subscribers. See [`REGISTER_TOPIC`], [`SUBSCRIBE_TOPIC`] and
//! [`UNSUBSCRIBE_TOPIC`].

use crate::{RelaymqError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_util::codec::{Decoder, Encoder};
use uuid::Uuid;

/// Namespace prefix reserved for broker control traffic.
pub const CONTROL_PREFIX: &str = "$SYS/";

/// Control topic carrying a role registration (`PUBLISHER` or `SUBSCRIBER`).
pub const REGISTER_TOPIC: &str = "$SYS/REGISTER";

/// Control topic carrying a topic name to subscribe to.
pub const SUBSCRIBE_TOPIC: &str = "$SYS/SUBSCRIBE";

/// Control topic carrying a topic name to unsubscribe from.
pub const UNSUBSCRIBE_TOPIC: &str = "$SYS/UNSUBSCRIBE";

/// Registration payload marking the sender as a publisher.
pub const ROLE_PUBLISHER: &str = "PUBLISHER";

/// Registration payload marking the sender as a subscriber.
pub const ROLE_SUBSCRIBER: &str = "SUBSCRIBER";

/// Upper bound on a single frame body. A length prefix beyond this is treated
/// as a protocol violation rather than an allocation request.
pub const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

const TIMEZONE_UTC: u8 = 0;

/// An immutable broker message: a topic, an opaque payload, and identity
/// stamped at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    id: String,
    topic: String,
    payload: Bytes,
    timestamp: u64,
}

impl Message {
    /// Create a message with a fresh random id and the current wall-clock
    /// timestamp.
    pub fn new<T: Into<String>, P: Into<Bytes>>(topic: T, payload: P) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            topic: topic.into(),
            payload: payload.into(),
            timestamp: now_millis(),
        }
    }

    /// Message id: 32 lowercase hex characters, no separators.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Routing topic.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Opaque payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Milliseconds since the Unix epoch, UTC, at creation.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// True for `$SYS/*` topics, which the broker consumes itself.
    pub fn is_control(&self) -> bool {
        self.topic.starts_with(CONTROL_PREFIX)
    }

    /// Serialize the message body (without the frame length prefix).
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(
            4 + self.id.len() + 4 + self.topic.len() + 4 + self.payload.len() + 9,
        );
        put_string(&mut buf, &self.id);
        put_string(&mut buf, &self.topic);
        put_bytes(&mut buf, &self.payload);
        buf.put_u64(self.timestamp);
        buf.put_u8(TIMEZONE_UTC);
        buf.freeze()
    }

    /// Reconstruct a message from a serialized body, preserving the original
    /// id and timestamp.
    pub fn decode(mut body: &[u8]) -> Result<Self> {
        let id = get_string(&mut body)?;
        let topic = get_string(&mut body)?;
        let payload = get_bytes(&mut body)?;
        if body.remaining() < 9 {
            return Err(RelaymqError::Protocol(
                "truncated timestamp in message body".into(),
            ));
        }
        let timestamp = body.get_u64();
        let _timezone_tag = body.get_u8() & 1;
        if topic.is_empty() {
            return Err(RelaymqError::Protocol("empty topic in message".into()));
        }
        Ok(Self {
            id,
            topic,
            payload,
            timestamp,
        })
    }

    /// Serialize and wrap in a length-prefixed frame, ready for the wire.
    pub fn to_frame(&self) -> Bytes {
        let body = self.encode();
        let mut buf = BytesMut::with_capacity(4 + body.len());
        buf.put_u32(body.len() as u32);
        buf.put_slice(&body);
        buf.freeze()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Write a length-prefixed UTF-8 string.
fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

/// Read a length-prefixed UTF-8 string.
fn get_string(buf: &mut &[u8]) -> Result<String> {
    if buf.remaining() < 4 {
        return Err(RelaymqError::Protocol(
            "insufficient bytes for string length".into(),
        ));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(RelaymqError::Protocol("truncated string field".into()));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    String::from_utf8(bytes).map_err(|_| RelaymqError::Protocol("invalid UTF-8 string".into()))
}

/// Write a length-prefixed byte sequence.
fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) {
    buf.put_u32(bytes.len() as u32);
    buf.put_slice(bytes);
}

/// Read a length-prefixed byte sequence.
fn get_bytes(buf: &mut &[u8]) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(RelaymqError::Protocol(
            "insufficient bytes for payload length".into(),
        ));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(RelaymqError::Protocol("truncated payload field".into()));
    }
    let mut bytes = vec![0u8; len];
    buf.copy_to_slice(&mut bytes);
    Ok(Bytes::from(bytes))
}

/// Stateless, symmetric stream codec for framed messages.
///
/// `encode` writes `[len][body]`; `decode` returns `Ok(None)` while a frame is
/// incomplete and one `Message` per satisfied frame. A body that fails to
/// deserialize after its length prefix is satisfied is a protocol error, and
/// the codec does not advance past the damaged frame.
#[derive(Debug, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        Self
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = RelaymqError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<()> {
        let body = item.encode();
        dst.reserve(4 + body.len());
        dst.put_u32(body.len() as u32);
        dst.put_slice(&body);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = RelaymqError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>> {
        if src.len() < 4 {
            return Ok(None);
        }

        let body_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if body_len > MAX_FRAME_SIZE {
            return Err(RelaymqError::Protocol(format!(
                "frame length {} exceeds maximum {}",
                body_len, MAX_FRAME_SIZE
            )));
        }
        if src.len() < 4 + body_len {
            src.reserve(4 + body_len - src.len());
            return Ok(None);
        }

        // Parse before advancing so a damaged frame stays at the head of the
        // buffer and the connection can be torn down with state intact.
        let message = Message::decode(&src[4..4 + body_len])?;
        src.advance(4 + body_len);
        Ok(Some(message))
    }
}

/// Per-connection reassembly buffer.
///
/// Bytes arrive from the transport in arbitrary chunks; `feed` appends them
/// and drains every complete frame in arrival order. `clear` drops partial
/// bytes and is used by clients when a connection is re-established.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
    codec: MessageCodec,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append incoming bytes and return every whole message now available,
    /// in order. A damaged frame yields an error and leaves the buffer
    /// positioned at the damaged frame.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Message>> {
        self.buffer.extend_from_slice(data);
        let mut messages = Vec::new();
        while let Some(message) = self.codec.decode(&mut self.buffer)? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Discard any buffered partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Number of buffered bytes not yet forming a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}
