//! Wire format for streaming messages.
//!
//! Each message is framed as a fixed five-byte header followed by a body:
//!
//! ```text
//! +--------+----------------------+------------------+
//! | tag u8 | body length u32 (BE) | body             |
//! +--------+----------------------+------------------+
//! ```
//!
//! Bodies are encoded with bincode's standard configuration. An
//! [`StreamMessage::Incoming`] body holds the encoded
//! [`StreamMessageHeader`] followed by the raw payload bytes.

use std::io;

use bincode::{config, decode_from_slice, encode_to_vec};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;

use crate::{
    error::{FramingError, InboundError, Result},
    input::{BufferedInput, ShortRead},
    message::{
        IncomingStreamMessage,
        MessageKind,
        ReceivedMessage,
        StreamInitMessage,
        StreamMessage,
        StreamMessageHeader,
    },
};

/// Size of the frame header preceding every message body.
pub const HEADER_LEN: usize = 5;

/// Oldest protocol version this build can read.
pub const MIN_VERSION: u32 = 1;

/// Protocol version spoken by this build.
pub const CURRENT_VERSION: u32 = 2;

/// Reject protocol versions outside [`MIN_VERSION`]..=[`CURRENT_VERSION`].
///
/// # Errors
///
/// Returns [`InboundError::UnsupportedVersion`] for any other version.
pub fn check_version(version: u32) -> Result<()> {
    if (MIN_VERSION..=CURRENT_VERSION).contains(&version) {
        Ok(())
    } else {
        Err(InboundError::UnsupportedVersion(version))
    }
}

/// Parsed frame header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    /// Kind of the message that follows.
    pub kind: MessageKind,
    /// Length of the body in bytes.
    pub body_len: usize,
}

impl FrameHeader {
    /// Parse a header from exactly [`HEADER_LEN`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::UnknownMessageType`] for an unknown tag and
    /// [`FramingError::OversizedMessage`] when the body exceeds `max_len`.
    pub fn parse(mut raw: &[u8], max_len: usize) -> std::result::Result<Self, FramingError> {
        if raw.len() < HEADER_LEN {
            return Err(FramingError::Truncated {
                context: "frame header",
                needed: HEADER_LEN - raw.len(),
            });
        }
        let tag = raw.get_u8();
        let body_len = raw.get_u32() as usize;
        let kind = MessageKind::from_tag(tag).ok_or(FramingError::UnknownMessageType(tag))?;
        if body_len > max_len {
            return Err(FramingError::OversizedMessage {
                len: body_len,
                max: max_len,
            });
        }
        Ok(Self { kind, body_len })
    }
}

/// Read the next message from `input`.
///
/// Suspends until a complete message is buffered. Returns `Ok(None)` when the
/// source closes on a message boundary.
///
/// # Errors
///
/// Returns [`FramingError::Truncated`] if the source closes partway through a
/// message, and framing or decode errors for malformed input.
pub async fn read_message(input: &BufferedInput, max_len: usize) -> Result<Option<StreamMessage>> {
    if !input.wait_readable().await {
        return Ok(None);
    }
    let raw = input
        .read_exact(HEADER_LEN)
        .await
        .map_err(|e| truncated("frame header", &e, HEADER_LEN))?;
    let header = FrameHeader::parse(&raw, max_len)?;
    let body = input
        .read_exact(header.body_len)
        .await
        .map_err(|e| truncated("message body", &e, header.body_len))?;
    trace!(
        "message framed: kind={}, body_len={}",
        header.kind, header.body_len
    );
    decode_body(header.kind, body).map(Some)
}

fn truncated(context: &'static str, err: &io::Error, requested: usize) -> InboundError {
    let needed = ShortRead::from_io(err).map_or(requested, |short| short.missing());
    FramingError::Truncated { context, needed }.into()
}

/// Decode a message body of the given kind.
///
/// # Errors
///
/// Returns a decode error if the body is malformed and
/// [`FramingError::TrailingBytes`] if it is longer than its contents.
pub fn decode_body(kind: MessageKind, body: Bytes) -> Result<StreamMessage> {
    let message = match kind {
        MessageKind::Init => StreamMessage::Init(decode_whole::<StreamInitMessage>(kind, &body)?),
        MessageKind::Incoming => {
            let (header, used) =
                decode_from_slice::<StreamMessageHeader, _>(&body, config::standard())?;
            StreamMessage::Incoming(IncomingStreamMessage::new(header, body.slice(used..)))
        }
        MessageKind::Received => {
            StreamMessage::Received(decode_whole::<ReceivedMessage>(kind, &body)?)
        }
        MessageKind::Complete | MessageKind::SessionFailed | MessageKind::KeepAlive => {
            if !body.is_empty() {
                return Err(FramingError::TrailingBytes {
                    kind,
                    extra: body.len(),
                }
                .into());
            }
            match kind {
                MessageKind::Complete => StreamMessage::Complete,
                MessageKind::SessionFailed => StreamMessage::SessionFailed,
                _ => StreamMessage::KeepAlive,
            }
        }
    };
    Ok(message)
}

fn decode_whole<T: bincode::Decode<()>>(kind: MessageKind, body: &[u8]) -> Result<T> {
    let (value, used) = decode_from_slice::<T, _>(body, config::standard())?;
    if used != body.len() {
        return Err(FramingError::TrailingBytes {
            kind,
            extra: body.len() - used,
        }
        .into());
    }
    Ok(value)
}

/// Encode `message` as a complete frame.
///
/// # Errors
///
/// Returns an encode error if a body fails to serialise and
/// [`FramingError::OversizedMessage`] if it does not fit the length prefix.
pub fn encode_message(message: &StreamMessage) -> Result<Bytes> {
    let body = match message {
        StreamMessage::Init(init) => encode_to_vec(init, config::standard())?,
        StreamMessage::Incoming(incoming) => {
            let mut body = encode_to_vec(&incoming.header, config::standard())?;
            body.extend_from_slice(&incoming.payload);
            body
        }
        StreamMessage::Received(received) => encode_to_vec(received, config::standard())?,
        StreamMessage::Complete | StreamMessage::SessionFailed | StreamMessage::KeepAlive => {
            Vec::new()
        }
    };
    let body_len = u32::try_from(body.len()).map_err(|_| FramingError::OversizedMessage {
        len: body.len(),
        max: u32::MAX as usize,
    })?;

    let mut frame = BytesMut::with_capacity(HEADER_LEN + body.len());
    frame.put_u8(message.kind().tag());
    frame.put_u32(body_len);
    frame.extend_from_slice(&body);
    Ok(frame.freeze())
}
