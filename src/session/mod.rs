//! Session resolution seams.
//!
//! The inbound pipeline does not own streaming sessions. It only needs to
//! create one for an initiating message and find one for every other message.
//! Both operations go through a [`SessionProvider`]; the sessions themselves
//! implement [`StreamSession`].

use std::{fmt, net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{SessionId, StreamInitMessage, StreamMessage};

mod registry;

pub use registry::{RegistryProvider, SessionRegistry};

/// Identifier assigned to an inbound connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Metadata describing the connection a message arrived on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Connection identifier, unique within the process.
    pub id: ConnectionId,
    /// Remote address of the connection.
    pub peer: SocketAddr,
    /// Protocol version negotiated for the connection.
    pub version: u32,
}

impl ConnectionInfo {
    /// Build connection metadata.
    #[must_use]
    pub const fn new(id: ConnectionId, peer: SocketAddr, version: u32) -> Self {
        Self { id, peer, version }
    }

    /// Log prefix identifying this connection.
    #[must_use]
    pub fn log_tag(&self) -> String { format!("[Stream #{} {}]", self.id.as_u64(), self.peer) }
}

/// Failure reported by, or about, a streaming session.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session refused the message.
    #[error("session {id} rejected message: {reason}")]
    Rejected {
        /// Session that refused the message.
        id: SessionId,
        /// Reason given by the session.
        reason: String,
    },
    /// The session has already finished.
    #[error("session {0} is closed")]
    Closed(SessionId),
    /// A session with this identifier is already registered.
    #[error("session {0} is already registered")]
    Duplicate(SessionId),
}

/// A streaming session that inbound messages are delivered to.
#[async_trait]
pub trait StreamSession: Send + Sync + 'static {
    /// Identifier this session is registered under.
    fn id(&self) -> SessionId;

    /// Called each time an inbound connection is resolved to this session.
    fn attach_inbound(&self, _connection: &ConnectionInfo) {}

    /// Process one message.
    ///
    /// # Errors
    ///
    /// Returns a [`SessionError`] when the session cannot apply the message.
    /// The inbound pipeline logs the failure and keeps reading.
    async fn receive(&self, message: StreamMessage) -> Result<(), SessionError>;

    /// Notification that processing a message on this session failed.
    fn on_error(&self, _error: &SessionError) {}
}

/// Shared, dynamically dispatched session handle.
pub type SharedSession = Arc<dyn StreamSession>;

/// Creates and looks up sessions on behalf of the inbound pipeline.
///
/// Implementations are shared by every connection and must tolerate
/// concurrent calls.
pub trait SessionProvider: Send + Sync + 'static {
    /// Create the session for an initiating message.
    ///
    /// If a session with `id` already exists the implementation decides
    /// whether to return it or replace it; the pipeline only requires a
    /// session back.
    fn create_session(
        &self,
        id: SessionId,
        init: &StreamInitMessage,
        connection: &ConnectionInfo,
    ) -> SharedSession;

    /// Look up an existing session.
    fn find_session(&self, id: &SessionId) -> Option<SharedSession>;

    /// Called after a terminal message has been delivered to session `id`.
    ///
    /// Providers that track sessions should stop resolving `id` here.
    fn end_session(&self, _id: &SessionId) {}
}

impl<P: SessionProvider + ?Sized> SessionProvider for Arc<P> {
    fn create_session(
        &self,
        id: SessionId,
        init: &StreamInitMessage,
        connection: &ConnectionInfo,
    ) -> SharedSession {
        (**self).create_session(id, init, connection)
    }

    fn find_session(&self, id: &SessionId) -> Option<SharedSession> { (**self).find_session(id) }

    fn end_session(&self, id: &SessionId) { (**self).end_session(id); }
}
