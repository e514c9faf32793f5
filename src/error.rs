//! Error types for the inbound pipeline.
//!
//! [`InboundError`] is what a deserialising task returns when it stops
//! early. Framing and decode failures mean the byte stream can no longer be
//! trusted; [`NoSessionError`] means a message arrived for a session this
//! node does not know about. Both end the connection.

use std::{fmt, io};

use thiserror::Error;

use crate::message::{MessageKind, SessionId};

/// Wire-level problems found while splitting the byte stream into messages.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The connection closed partway through a message.
    #[error("stream ended inside {context}: needed {needed} more bytes")]
    Truncated {
        /// Part of the message being read.
        context: &'static str,
        /// Bytes still required to complete that part.
        needed: usize,
    },

    /// The length prefix exceeds the configured limit.
    #[error("message exceeds max length: {len} > {max}")]
    OversizedMessage {
        /// Length announced by the frame header.
        len: usize,
        /// Maximum accepted length.
        max: usize,
    },

    /// The type tag does not name a known message kind.
    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// The body decoded without consuming every byte.
    #[error("{kind} message has {extra} trailing bytes")]
    TrailingBytes {
        /// Kind of the message.
        kind: MessageKind,
        /// Unconsumed bytes.
        extra: usize,
    },
}

/// A non-initiating message could not be routed to a session.
///
/// This is a state error between the peers and is never retried.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub struct NoSessionError {
    /// Kind of the unroutable message.
    pub kind: MessageKind,
    /// Session named by the message, if it carried one.
    pub id: Option<SessionId>,
}

impl fmt::Display for NoSessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "no session found for {} message (session {id})", self.kind),
            None => write!(f, "no session found for {} message", self.kind),
        }
    }
}

/// Errors that terminate a deserialising task.
#[derive(Debug, Error)]
pub enum InboundError {
    /// Reading from the input source failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),

    /// The byte stream is not correctly framed.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),

    /// A message body failed to decode.
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// A message failed to encode.
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// The message could not be routed to a session.
    #[error(transparent)]
    NoSession(#[from] NoSessionError),

    /// The connection negotiated a protocol version this build cannot read.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u32),
}

impl InboundError {
    /// Returns `true` for session-resolution failures.
    #[must_use]
    pub fn is_state_error(&self) -> bool { matches!(self, Self::NoSession(_)) }

    /// Returns `true` when the stream ended partway through a message.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Framing(FramingError::Truncated { .. }))
    }
}

/// Canonical result alias for the inbound pipeline.
pub type Result<T> = std::result::Result<T, InboundError>;
