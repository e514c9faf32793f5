//! Streaming protocol messages as seen by the inbound pipeline.
//!
//! [`StreamMessage`] is the closed set of message kinds a peer may send on a
//! streaming connection. Only [`StreamMessage::Init`] opens a session; every
//! other kind must be routed to a session that already exists.

use std::{fmt, net::SocketAddr};

use bytes::Bytes;

mod ids;

pub use ids::{PlanId, SessionId, TableId};

/// Purpose of a streaming plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode)]
pub enum StreamOperation {
    /// Operation not covered by another variant.
    Other,
    /// Restoring replica count after a node loss.
    RestoreReplicaCount,
    /// Node leaving the cluster.
    Decommission,
    /// Token relocation.
    Relocation,
    /// Node joining the cluster.
    Bootstrap,
    /// Rebuilding a node from other replicas.
    Rebuild,
    /// Bulk loading external data.
    BulkLoad,
    /// Anti-entropy repair.
    Repair,
}

impl StreamOperation {
    /// Human readable label used in logs.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Other => "Other",
            Self::RestoreReplicaCount => "Restore replica count",
            Self::Decommission => "Unbootstrap",
            Self::Relocation => "Relocation",
            Self::Bootstrap => "Bootstrap",
            Self::Rebuild => "Rebuild",
            Self::BulkLoad => "Bulk Load",
            Self::Repair => "Repair",
        }
    }
}

/// Which data a preview (validation-only) repair stream covers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, bincode::Encode, bincode::Decode)]
pub enum PreviewKind {
    /// Not a preview stream.
    #[default]
    None,
    /// Preview all data.
    All,
    /// Preview repaired data only.
    Repaired,
    /// Preview unrepaired data only.
    Unrepaired,
}

/// First message on a streaming connection. Carries everything needed to
/// create the receiving session.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct StreamInitMessage {
    /// Node that initiated the stream.
    pub from: SocketAddr,
    /// Session ordinal within the plan.
    pub session_index: u32,
    /// Plan the session belongs to.
    pub plan_id: PlanId,
    /// Purpose of the plan.
    pub operation: StreamOperation,
    /// Pending incremental repair session, if any.
    pub pending_repair: Option<PlanId>,
    /// Preview scope.
    pub preview: PreviewKind,
}

impl StreamInitMessage {
    /// Create an init message with no pending repair and no preview.
    #[must_use]
    pub fn new(
        from: SocketAddr,
        session_index: u32,
        plan_id: PlanId,
        operation: StreamOperation,
    ) -> Self {
        Self {
            from,
            session_index,
            plan_id,
            operation,
            pending_repair: None,
            preview: PreviewKind::None,
        }
    }

    /// Attach a pending repair identifier.
    #[must_use]
    pub fn with_pending_repair(mut self, pending_repair: PlanId) -> Self {
        self.pending_repair = Some(pending_repair);
        self
    }

    /// Set the preview scope.
    #[must_use]
    pub fn with_preview(mut self, preview: PreviewKind) -> Self {
        self.preview = preview;
        self
    }
}

/// Header preceding a chunk of table data.
#[derive(Clone, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct StreamMessageHeader {
    /// Table the data belongs to.
    pub table_id: TableId,
    /// Node that sent the data.
    pub sender: SocketAddr,
    /// Plan the owning session belongs to.
    pub plan_id: PlanId,
    /// Session ordinal within the plan.
    pub session_index: u32,
    /// Position of this chunk in the session's transfer sequence.
    pub sequence_number: u32,
    /// Repair timestamp of the data, zero when unrepaired.
    pub repaired_at: i64,
    /// Pending incremental repair session, if any.
    pub pending_repair: Option<PlanId>,
}

impl StreamMessageHeader {
    /// Session this header routes to.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        SessionId::new(self.plan_id, self.session_index, self.sender)
    }
}

/// A chunk of table data addressed to an existing session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingStreamMessage {
    /// Routing and bookkeeping header.
    pub header: StreamMessageHeader,
    /// Raw table data.
    pub payload: Bytes,
}

impl IncomingStreamMessage {
    /// Pair a header with its payload.
    #[must_use]
    pub fn new(header: StreamMessageHeader, payload: impl Into<Bytes>) -> Self {
        Self {
            header,
            payload: payload.into(),
        }
    }
}

/// Acknowledges receipt of one transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub struct ReceivedMessage {
    /// Table the acknowledged transfer belonged to.
    pub table_id: TableId,
    /// Sequence number being acknowledged.
    pub sequence_number: u32,
}

/// Wire tag identifying a message kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// [`StreamMessage::Init`].
    Init = 0,
    /// [`StreamMessage::Incoming`].
    Incoming = 1,
    /// [`StreamMessage::Received`].
    Received = 2,
    /// [`StreamMessage::Complete`].
    Complete = 3,
    /// [`StreamMessage::SessionFailed`].
    SessionFailed = 4,
    /// [`StreamMessage::KeepAlive`].
    KeepAlive = 5,
}

impl MessageKind {
    /// Every kind, in tag order.
    pub const ALL: [Self; 6] = [
        Self::Init,
        Self::Incoming,
        Self::Received,
        Self::Complete,
        Self::SessionFailed,
        Self::KeepAlive,
    ];

    /// Wire tag for this kind.
    #[must_use]
    pub const fn tag(self) -> u8 { self as u8 }

    /// Look up the kind for a wire tag.
    #[must_use]
    pub fn from_tag(tag: u8) -> Option<Self> { Self::ALL.get(usize::from(tag)).copied() }

    /// Short label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Incoming => "incoming",
            Self::Received => "received",
            Self::Complete => "complete",
            Self::SessionFailed => "session_failed",
            Self::KeepAlive => "keep_alive",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// A decoded streaming message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamMessage {
    /// Opens a session; always first on a connection.
    Init(StreamInitMessage),
    /// Table data for an existing session.
    Incoming(IncomingStreamMessage),
    /// Transfer acknowledgement.
    Received(ReceivedMessage),
    /// Peer finished sending.
    Complete,
    /// Peer aborted the session.
    SessionFailed,
    /// Liveness probe, not tied to any session.
    KeepAlive,
}

impl StreamMessage {
    /// Kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Init(_) => MessageKind::Init,
            Self::Incoming(_) => MessageKind::Incoming,
            Self::Received(_) => MessageKind::Received,
            Self::Complete => MessageKind::Complete,
            Self::SessionFailed => MessageKind::SessionFailed,
            Self::KeepAlive => MessageKind::KeepAlive,
        }
    }

    /// Returns `true` for the connection-initiating kind.
    #[must_use]
    pub const fn is_initiating(&self) -> bool { matches!(self, Self::Init(_)) }

    /// Returns `true` for kinds after which the sending side considers the
    /// session finished.
    #[must_use]
    pub const fn is_terminal(&self) -> bool { matches!(self, Self::Complete | Self::SessionFailed) }

    /// Session named by the message itself, if it carries one.
    ///
    /// Only [`StreamMessage::Init`] and [`StreamMessage::Incoming`] embed
    /// session context.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        match self {
            Self::Init(init) => Some(SessionId::new(init.plan_id, init.session_index, init.from)),
            Self::Incoming(incoming) => Some(incoming.header.session_id()),
            Self::Received(_) | Self::Complete | Self::SessionFailed | Self::KeepAlive => None,
        }
    }
}

impl From<StreamInitMessage> for StreamMessage {
    fn from(value: StreamInitMessage) -> Self { Self::Init(value) }
}

impl From<IncomingStreamMessage> for StreamMessage {
    fn from(value: IncomingStreamMessage) -> Self { Self::Incoming(value) }
}

impl From<ReceivedMessage> for StreamMessage {
    fn from(value: ReceivedMessage) -> Self { Self::Received(value) }
}
