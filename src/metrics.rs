//! Metric helpers for `tablestream`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. Without the `metrics` feature
//! every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

use crate::message::MessageKind;

/// Name of the gauge tracking open inbound connections.
pub const CONNECTIONS_ACTIVE: &str = "tablestream_inbound_connections_active";
/// Name of the counter tracking buffers accepted from the network.
pub const BUFFERS_RECEIVED: &str = "tablestream_buffers_received_total";
/// Name of the counter tracking decoded messages.
pub const MESSAGES_RECEIVED: &str = "tablestream_messages_received_total";
/// Name of the counter tracking error occurrences.
pub const ERRORS_TOTAL: &str = "tablestream_errors_total";

/// Pipeline stage at which an error was observed.
#[derive(Clone, Copy, Debug)]
pub enum Stage {
    /// Framing or decoding the byte stream.
    Decode,
    /// Resolving a message to a session.
    Resolve,
    /// A session rejecting a message.
    Session,
    /// The deserialising task panicked.
    Panic,
}

impl Stage {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Stage::Decode => "decode",
            Stage::Resolve => "resolve",
            Stage::Session => "session",
            Stage::Panic => "panic",
        }
    }
}

/// Increment the open connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the open connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a buffer accepted into an input source.
pub fn inc_buffers() {
    #[cfg(feature = "metrics")]
    counter!(BUFFERS_RECEIVED).increment(1);
}

/// Record a decoded message of the given kind.
pub fn inc_messages(kind: MessageKind) {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_RECEIVED, "kind" => kind.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = kind;
}

/// Record an error at the given stage.
pub fn inc_errors(stage: Stage) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "stage" => stage.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = stage;
}
