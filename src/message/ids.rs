//! Identifiers carried by streaming messages.

use std::{fmt, net::SocketAddr};

use bincode::{
    Decode,
    Encode,
    de::Decoder,
    enc::Encoder,
    error::{DecodeError, EncodeError},
};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Uuid);

        impl $name {
            /// Wrap an existing UUID.
            #[must_use]
            pub const fn from_uuid(id: Uuid) -> Self { Self(id) }

            /// Generate a fresh random identifier.
            #[must_use]
            pub fn random() -> Self { Self(Uuid::new_v4()) }

            /// Return the wrapped UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid { &self.0 }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self { Self(value) }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { self.0.fmt(f) }
        }

        impl Encode for $name {
            fn encode<E: Encoder>(&self, encoder: &mut E) -> Result<(), EncodeError> {
                self.0.as_bytes().encode(encoder)
            }
        }

        impl<Context> Decode<Context> for $name {
            fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
                let bytes = <[u8; 16]>::decode(decoder)?;
                Ok(Self(Uuid::from_bytes(bytes)))
            }
        }

        bincode::impl_borrow_decode!($name);
    };
}

uuid_id!(
    /// Identifies one streaming operation; shared by all of its sessions.
    PlanId
);

uuid_id!(
    /// Identifies the table whose data a stream carries.
    TableId
);

/// Names one streaming session between this node and a peer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionId {
    /// Streaming operation the session belongs to.
    pub plan_id: PlanId,
    /// Distinguishes concurrent sessions under the same plan.
    pub session_index: u32,
    /// Remote node.
    pub peer: SocketAddr,
}

impl SessionId {
    /// Build an identifier from its parts.
    #[must_use]
    pub const fn new(plan_id: PlanId, session_index: u32, peer: SocketAddr) -> Self {
        Self {
            plan_id,
            session_index,
            peer,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.plan_id, self.session_index, self.peer)
    }
}
