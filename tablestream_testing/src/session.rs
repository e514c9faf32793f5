//! Sessions that record what the pipeline delivers to them.

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use tablestream::{
    ConnectionInfo,
    MessageKind,
    SessionError,
    SessionId,
    SessionProvider,
    SessionRegistry,
    SharedSession,
    StreamMessage,
    StreamSession,
    message::StreamInitMessage,
};
use tokio::{sync::mpsc, time::timeout};

/// A message together with the session it was delivered to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub session: SessionId,
    pub message: StreamMessage,
}

/// Session forwarding each received message to a [`Deliveries`] receiver.
pub struct RecordingSession {
    id: SessionId,
    tx: mpsc::UnboundedSender<Delivery>,
    reject: Option<MessageKind>,
    attached: AtomicUsize,
    errors: AtomicUsize,
}

impl RecordingSession {
    /// Number of times a connection was resolved to this session.
    pub fn attached(&self) -> usize { self.attached.load(Ordering::Acquire) }

    /// Number of failures reported back through `on_error`.
    pub fn errors(&self) -> usize { self.errors.load(Ordering::Acquire) }
}

#[async_trait]
impl StreamSession for RecordingSession {
    fn id(&self) -> SessionId { self.id }

    fn attach_inbound(&self, _connection: &ConnectionInfo) {
        self.attached.fetch_add(1, Ordering::AcqRel);
    }

    async fn receive(&self, message: StreamMessage) -> Result<(), SessionError> {
        let kind = message.kind();
        let _ = self.tx.send(Delivery {
            session: self.id,
            message,
        });
        if self.reject == Some(kind) {
            return Err(SessionError::Rejected {
                id: self.id,
                reason: format!("{kind} rejected by test session"),
            });
        }
        Ok(())
    }

    fn on_error(&self, _error: &SessionError) { self.errors.fetch_add(1, Ordering::AcqRel); }
}

/// Provider backed by a [`SessionRegistry`] of [`RecordingSession`]s.
#[derive(Clone)]
pub struct RecordingProvider {
    registry: Arc<SessionRegistry<RecordingSession>>,
    tx: mpsc::UnboundedSender<Delivery>,
    reject: Option<MessageKind>,
}

impl RecordingProvider {
    /// Create a provider and the receiver its sessions report to.
    #[must_use]
    pub fn new() -> (Self, Deliveries) {
        let (tx, rx) = mpsc::unbounded_channel();
        let provider = Self {
            registry: Arc::new(SessionRegistry::new()),
            tx,
            reject: None,
        };
        (provider, Deliveries(rx))
    }

    /// Make every session refuse messages of `kind` after recording them.
    #[must_use]
    pub fn rejecting(mut self, kind: MessageKind) -> Self {
        self.reject = Some(kind);
        self
    }

    /// Register a session up front, as the follower side of a plan would.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered.
    pub fn register(&self, id: SessionId) -> Arc<RecordingSession> {
        let session = Arc::new(self.session(id));
        self.registry
            .register(Arc::clone(&session))
            .expect("session id already registered");
        session
    }

    /// Registry the provider resolves against.
    pub fn registry(&self) -> &Arc<SessionRegistry<RecordingSession>> { &self.registry }

    /// The provider as the trait object handlers expect.
    pub fn shared(&self) -> Arc<dyn SessionProvider> { Arc::new(self.clone()) }

    fn session(&self, id: SessionId) -> RecordingSession {
        RecordingSession {
            id,
            tx: self.tx.clone(),
            reject: self.reject,
            attached: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }
}

impl SessionProvider for RecordingProvider {
    fn create_session(
        &self,
        id: SessionId,
        _init: &StreamInitMessage,
        _connection: &ConnectionInfo,
    ) -> SharedSession {
        self.registry.get_or_create(id, || self.session(id))
    }

    fn find_session(&self, id: &SessionId) -> Option<SharedSession> {
        self.registry
            .get(id)
            .map(|session| -> SharedSession { session })
    }

    fn end_session(&self, id: &SessionId) { self.registry.remove(id); }
}

/// Receiving end of a [`RecordingProvider`].
pub struct Deliveries(mpsc::UnboundedReceiver<Delivery>);

impl Deliveries {
    /// Wait up to one second for the next delivery.
    ///
    /// # Panics
    ///
    /// Panics if nothing arrives in time or every sender is gone.
    pub async fn next(&mut self) -> Delivery {
        timeout(Duration::from_secs(1), self.0.recv())
            .await
            .expect("delivery within timeout")
            .expect("delivery channel open")
    }

    /// Take a delivery that has already arrived, if any.
    pub fn try_next(&mut self) -> Option<Delivery> { self.0.try_recv().ok() }

    /// Drain every delivery that has already arrived.
    pub fn drain(&mut self) -> Vec<Delivery> { std::iter::from_fn(|| self.try_next()).collect() }
}
