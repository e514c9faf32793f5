#![doc(html_root_url = "https://docs.rs/tablestream/latest")]
//! Inbound side of a table streaming protocol.
//!
//! Bytes received from a peer are queued as [`FramedBuffer`]s on a
//! [`BufferedInput`]. A single [`DeserializingTask`] per connection turns the
//! queued bytes into [`StreamMessage`]s and delivers them to the
//! [`StreamSession`] they belong to, which a [`SessionProvider`] creates or
//! looks up. [`InboundHandler`] owns that wiring for one connection.

pub mod buffer;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod input;
pub mod message;
pub mod metrics;
pub mod panic;
pub mod session;

pub use buffer::{BufferPool, BufferWatch, FramedBuffer};
pub use config::{ConfigError, InboundConfig};
pub use connection::serve_connection;
pub use error::{FramingError, InboundError, NoSessionError, Result};
pub use handler::{DeserializingTask, InboundEvent, InboundHandler};
pub use input::{BufferedInput, InputClosed, ShortRead};
pub use message::{MessageKind, PlanId, SessionId, StreamMessage};
pub use metrics::{BUFFERS_RECEIVED, CONNECTIONS_ACTIVE, ERRORS_TOTAL, MESSAGES_RECEIVED};
pub use session::{
    ConnectionId,
    ConnectionInfo,
    RegistryProvider,
    SessionError,
    SessionProvider,
    SessionRegistry,
    SharedSession,
    StreamSession,
};
