//! Process-wide registry of streaming sessions.
//!
//! `SessionRegistry` maps [`SessionId`]s to live sessions. Creation is
//! first-writer-wins: when two initiating messages race for the same
//! identifier both callers receive the session that was inserted first.

use std::sync::Arc;

use dashmap::{DashMap, mapref::entry::Entry};
use log::debug;

use super::{ConnectionInfo, SessionError, SessionProvider, SharedSession, StreamSession};
use crate::message::{SessionId, StreamInitMessage};

/// Concurrent map of sessions keyed by [`SessionId`].
pub struct SessionRegistry<S>(DashMap<SessionId, Arc<S>>);

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self { Self(DashMap::new()) }
}

impl<S: StreamSession> SessionRegistry<S> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Retrieve the session registered under `id`.
    #[must_use]
    pub fn get(&self, id: &SessionId) -> Option<Arc<S>> {
        self.0.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Return the session for `id`, creating it with `create` if absent.
    ///
    /// `create` runs while the shard for `id` is locked and must not touch
    /// the registry.
    pub fn get_or_create(&self, id: SessionId, create: impl FnOnce() -> S) -> Arc<S> {
        match self.0.entry(id) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let session = Arc::new(create());
                entry.insert(Arc::clone(&session));
                debug!("session registered: id={id}");
                session
            }
        }
    }

    /// Register an already constructed session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Duplicate`] if a session with the same
    /// identifier is already present; the existing entry is kept.
    pub fn register(&self, session: Arc<S>) -> Result<(), SessionError> {
        let id = session.id();
        match self.0.entry(id) {
            Entry::Occupied(_) => Err(SessionError::Duplicate(id)),
            Entry::Vacant(entry) => {
                entry.insert(session);
                debug!("session registered: id={id}");
                Ok(())
            }
        }
    }

    /// Remove a session, typically once it has completed or failed.
    pub fn remove(&self, id: &SessionId) -> Option<Arc<S>> {
        self.0.remove(id).map(|(_, session)| session)
    }

    /// Identifiers of every registered session.
    #[must_use]
    pub fn active_ids(&self) -> Vec<SessionId> { self.0.iter().map(|e| *e.key()).collect() }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns `true` when no session is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

/// [`SessionProvider`] backed by a [`SessionRegistry`].
///
/// New sessions are built by `factory` the first time an identifier is seen.
pub struct RegistryProvider<S, F> {
    registry: Arc<SessionRegistry<S>>,
    factory: F,
}

impl<S, F> RegistryProvider<S, F>
where
    S: StreamSession,
    F: Fn(SessionId, &StreamInitMessage, &ConnectionInfo) -> S + Send + Sync + 'static,
{
    /// Wrap `registry`, building missing sessions with `factory`.
    pub fn new(registry: Arc<SessionRegistry<S>>, factory: F) -> Self { Self { registry, factory } }

    /// Registry the provider resolves against.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry<S>> { &self.registry }
}

impl<S, F> SessionProvider for RegistryProvider<S, F>
where
    S: StreamSession,
    F: Fn(SessionId, &StreamInitMessage, &ConnectionInfo) -> S + Send + Sync + 'static,
{
    fn create_session(
        &self,
        id: SessionId,
        init: &StreamInitMessage,
        connection: &ConnectionInfo,
    ) -> SharedSession {
        self.registry
            .get_or_create(id, || (self.factory)(id, init, connection))
    }

    fn find_session(&self, id: &SessionId) -> Option<SharedSession> {
        self.registry
            .get(id)
            .map(|session| -> SharedSession { session })
    }

    fn end_session(&self, id: &SessionId) { self.registry.remove(id); }
}
