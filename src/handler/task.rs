//! Task that turns a connection's byte stream into session deliveries.

use std::sync::Arc;

use log::{debug, trace, warn};

use crate::{
    codec,
    error::{NoSessionError, Result},
    input::BufferedInput,
    message::{SessionId, StreamMessage},
    metrics::{self, Stage},
    session::{ConnectionInfo, SessionProvider, SharedSession},
};

/// Reads messages from one connection and hands them to their session.
///
/// The first message that needs a session resolves it through the
/// [`SessionProvider`]; later messages on the same connection reuse that
/// session.
pub struct DeserializingTask {
    connection: ConnectionInfo,
    input: BufferedInput,
    provider: Arc<dyn SessionProvider>,
    max_message_len: usize,
    session: Option<SharedSession>,
}

impl DeserializingTask {
    /// Create a task draining `input` for `connection`.
    #[must_use]
    pub fn new(
        connection: ConnectionInfo,
        input: BufferedInput,
        provider: Arc<dyn SessionProvider>,
        max_message_len: usize,
    ) -> Self {
        Self {
            connection,
            input,
            provider,
            max_message_len,
            session: None,
        }
    }

    /// Session the connection has been bound to, once resolved.
    #[must_use]
    pub fn session(&self) -> Option<&SharedSession> { self.session.as_ref() }

    /// Resolve the session `message` belongs to.
    ///
    /// An initiating message always creates a session for its plan and
    /// session index on the address the peer advertises in it, which is the
    /// address later messages name as their sender. Any other message must
    /// name a session the provider already knows.
    ///
    /// # Errors
    ///
    /// Returns [`NoSessionError`] when a non-initiating message carries no
    /// session context or names an unknown session.
    pub fn derive_session(
        &self,
        message: &StreamMessage,
    ) -> std::result::Result<SharedSession, NoSessionError> {
        let session = if let StreamMessage::Init(init) = message {
            let id = SessionId::new(init.plan_id, init.session_index, init.from);
            debug!(
                "{} creating session: id={id}, operation={}",
                self.connection.log_tag(),
                init.operation.description()
            );
            self.provider.create_session(id, init, &self.connection)
        } else {
            let id = message.session_id();
            id.and_then(|id| self.provider.find_session(&id))
                .ok_or(NoSessionError {
                    kind: message.kind(),
                    id,
                })?
        };
        session.attach_inbound(&self.connection);
        Ok(session)
    }

    /// Drain the input until it closes.
    ///
    /// # Errors
    ///
    /// Returns framing and decode errors for a malformed stream and
    /// [`crate::InboundError::NoSession`] when a message cannot be routed.
    /// Failures reported by the session itself are logged and skipped.
    pub async fn run(mut self) -> Result<()> {
        let tag = self.connection.log_tag();
        loop {
            let message = match codec::read_message(&self.input, self.max_message_len).await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    debug!("{tag} input closed, deserializing task exiting");
                    return Ok(());
                }
                Err(e) => {
                    metrics::inc_errors(Stage::Decode);
                    return Err(e);
                }
            };
            metrics::inc_messages(message.kind());

            // Keep-alives can race the session lifecycle and are not routed.
            if matches!(message, StreamMessage::KeepAlive) {
                trace!("{tag} keep-alive received");
                continue;
            }

            let session = match &self.session {
                Some(session) => Arc::clone(session),
                None => {
                    let session = self.derive_session(&message).inspect_err(|_| {
                        metrics::inc_errors(Stage::Resolve);
                    })?;
                    self.session = Some(Arc::clone(&session));
                    session
                }
            };

            let kind = message.kind();
            let terminal = message.is_terminal();
            trace!("{tag} delivering message: kind={kind}, session={}", session.id());
            if let Err(e) = session.receive(message).await {
                metrics::inc_errors(Stage::Session);
                warn!(
                    "{tag} session failed to process message: kind={kind}, session={}, error={e}",
                    session.id()
                );
                session.on_error(&e);
            }
            if terminal {
                debug!("{tag} session ended: kind={kind}, session={}", session.id());
                self.provider.end_session(&session.id());
            }
        }
    }
}
