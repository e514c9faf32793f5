//! Tests for the inbound handler and session derivation.

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use rstest::{fixture, rstest};
use tokio::{sync::mpsc, time::timeout};
use tracing_test::traced_test;

use super::{DeserializingTask, InboundEvent, InboundHandler};
use crate::{
    buffer::{BufferPool, FramedBuffer},
    codec::{self, CURRENT_VERSION},
    config::InboundConfig,
    error::InboundError,
    message::{
        IncomingStreamMessage,
        PlanId,
        PreviewKind,
        SessionId,
        StreamInitMessage,
        StreamMessage,
        StreamMessageHeader,
        StreamOperation,
        TableId,
    },
    session::{
        ConnectionId,
        ConnectionInfo,
        RegistryProvider,
        SessionError,
        SessionProvider,
        SessionRegistry,
        StreamSession,
    },
};

const REMOTE_ADDR: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::new(127, 0, 0, 2)), 0);

struct TestSession {
    id: SessionId,
    tx: mpsc::UnboundedSender<StreamMessage>,
    reject: bool,
    attached: Mutex<usize>,
}

#[async_trait]
impl StreamSession for TestSession {
    fn id(&self) -> SessionId { self.id }

    fn attach_inbound(&self, _connection: &ConnectionInfo) {
        *self.attached.lock().expect("attach lock") += 1;
    }

    async fn receive(&self, message: StreamMessage) -> Result<(), SessionError> {
        let rejected = self.reject && !message.is_initiating();
        let _ = self.tx.send(message);
        if rejected {
            return Err(SessionError::Rejected {
                id: self.id,
                reason: "test rejection".into(),
            });
        }
        Ok(())
    }
}

struct Harness {
    registry: Arc<SessionRegistry<TestSession>>,
    provider: Arc<dyn SessionProvider>,
    rx: mpsc::UnboundedReceiver<StreamMessage>,
}

fn harness_with(reject: bool) -> Harness {
    let (tx, rx) = mpsc::unbounded_channel();
    let registry = Arc::new(SessionRegistry::new());
    let provider = RegistryProvider::new(
        Arc::clone(&registry),
        move |id: SessionId, _init: &StreamInitMessage, _conn: &ConnectionInfo| TestSession {
            id,
            tx: tx.clone(),
            reject,
            attached: Mutex::new(0),
        },
    );
    Harness {
        registry,
        provider: Arc::new(provider),
        rx,
    }
}

#[fixture]
fn harness() -> Harness { harness_with(false) }

fn connection() -> ConnectionInfo { ConnectionInfo::new(ConnectionId::new(1), REMOTE_ADDR, CURRENT_VERSION) }

fn handler_for(provider: &Arc<dyn SessionProvider>) -> InboundHandler {
    InboundHandler::new(connection(), Arc::clone(provider), InboundConfig::default())
        .expect("supported version")
}

fn task_for(provider: &Arc<dyn SessionProvider>) -> DeserializingTask {
    task_on(provider, connection())
}

fn task_on(provider: &Arc<dyn SessionProvider>, connection: ConnectionInfo) -> DeserializingTask {
    DeserializingTask::new(
        connection,
        crate::input::BufferedInput::new(),
        Arc::clone(provider),
        InboundConfig::DEFAULT_MAX_MESSAGE_LEN,
    )
}

fn header(plan_id: PlanId) -> StreamMessageHeader {
    StreamMessageHeader {
        table_id: TableId::random(),
        sender: REMOTE_ADDR,
        plan_id,
        session_index: 0,
        sequence_number: 0,
        repaired_at: 0,
        pending_repair: Some(PlanId::random()),
    }
}

fn init(plan_id: PlanId) -> StreamMessage {
    StreamInitMessage::new(REMOTE_ADDR, 0, plan_id, StreamOperation::Repair)
        .with_pending_repair(PlanId::random())
        .with_preview(PreviewKind::All)
        .into()
}

fn frame(message: &StreamMessage) -> FramedBuffer {
    FramedBuffer::new(codec::encode_message(message).expect("encode"))
}

async fn next(rx: &mut mpsc::UnboundedReceiver<StreamMessage>) -> StreamMessage {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("message within timeout")
        .expect("session channel open")
}

#[rstest]
#[tokio::test]
async fn bytes_are_queued_while_open(harness: Harness) {
    let handler = handler_for(&harness.provider);
    assert_eq!(handler.available(), 0);

    let buf = BufferPool::new().allocate(8);
    let watch = buf.watch();
    handler.on_bytes_received(buf);

    assert_eq!(handler.available(), 8);
    assert_eq!(watch.ref_count(), 1);
    assert!(handler.task_armed());
}

#[rstest]
#[tokio::test]
async fn bytes_after_close_are_released(harness: Harness) {
    let handler = handler_for(&harness.provider);
    let buf = FramedBuffer::new(vec![0_u8; 8]);
    let watch = buf.watch();
    assert_eq!(watch.ref_count(), 1);

    handler.close();
    handler.on_bytes_received(buf);

    assert_eq!(handler.available(), 0);
    assert_eq!(watch.ref_count(), 0);
    assert!(!handler.task_armed());
}

#[rstest]
#[tokio::test]
async fn non_buffer_input_is_ignored(harness: Harness) {
    let handler = handler_for(&harness.provider);
    handler.on_inbound(InboundEvent::other("homer"));
    assert_eq!(handler.available(), 0);
    assert!(!handler.task_armed());
}

#[rstest]
#[tokio::test]
async fn close_releases_queued_bytes(harness: Harness) {
    let handler = handler_for(&harness.provider);
    let buf = FramedBuffer::new(vec![0_u8; 8]);
    let watch = buf.watch();
    handler.on_inbound(buf.into());

    handler.close();
    handler.close();

    assert_eq!(handler.available(), 0);
    assert!(watch.is_released());
    handler.wait().await;
}

#[rstest]
fn unsupported_version_is_rejected(harness: Harness) {
    let connection = ConnectionInfo::new(ConnectionId::new(9), REMOTE_ADDR, 0);
    let result = InboundHandler::new(connection, harness.provider, InboundConfig::default());
    assert!(matches!(result, Err(InboundError::UnsupportedVersion(0))));
}

#[rstest]
fn derive_session_creates_for_init(harness: Harness) {
    let task = task_for(&harness.provider);
    let plan_id = PlanId::random();

    let session = task.derive_session(&init(plan_id)).expect("init creates a session");

    assert_eq!(session.id(), SessionId::new(plan_id, 0, REMOTE_ADDR));
    assert_eq!(harness.registry.len(), 1);
}

#[rstest]
fn derive_session_for_init_ignores_existing_session(harness: Harness) {
    let task = task_for(&harness.provider);
    let plan_id = PlanId::random();
    let first = task.derive_session(&init(plan_id)).expect("first init");
    let second = task.derive_session(&init(plan_id)).expect("second init");
    assert_eq!(first.id(), second.id());
}

#[rstest]
fn derive_session_fails_for_complete_without_session(harness: Harness) {
    let task = task_for(&harness.provider);
    let err = task
        .derive_session(&StreamMessage::Complete)
        .err()
        .expect("no session for complete");
    assert_eq!(err.id, None);
    assert!(harness.registry.is_empty());
}

#[rstest]
fn derive_session_fails_for_unknown_incoming(harness: Harness) {
    let task = task_for(&harness.provider);
    let msg: StreamMessage = IncomingStreamMessage::new(header(PlanId::random()), Vec::new()).into();

    let err = task.derive_session(&msg).err().expect("unknown session");

    assert_eq!(err.id, msg.session_id());
    assert!(InboundError::from(err).is_state_error());
    assert!(harness.registry.is_empty(), "lookup must never create");
}

#[rstest]
fn derive_session_finds_registered_session(harness: Harness) {
    let plan_id = PlanId::random();
    let id = SessionId::new(plan_id, 0, REMOTE_ADDR);
    let (tx, _rx) = mpsc::unbounded_channel();
    let registered = Arc::new(TestSession {
        id,
        tx,
        reject: false,
        attached: Mutex::new(0),
    });
    harness
        .registry
        .register(Arc::clone(&registered))
        .expect("register follower");
    let task = task_for(&harness.provider);

    let msg: StreamMessage = IncomingStreamMessage::new(header(plan_id), Vec::new()).into();
    let session = task.derive_session(&msg).expect("registered session");

    let registered_dyn: Arc<dyn StreamSession> = registered.clone();
    assert!(Arc::ptr_eq(&session, &registered_dyn));
    assert_eq!(*registered.attached.lock().expect("attach lock"), 1);
}

#[rstest]
fn init_session_is_keyed_by_advertised_address(harness: Harness) {
    let plan_id = PlanId::random();
    let ephemeral = SocketAddr::from((Ipv4Addr::new(127, 0, 0, 2), 53_124));
    let opener = task_on(
        &harness.provider,
        ConnectionInfo::new(ConnectionId::new(1), ephemeral, CURRENT_VERSION),
    );
    let created = opener.derive_session(&init(plan_id)).expect("init creates a session");
    assert_eq!(created.id(), SessionId::new(plan_id, 0, REMOTE_ADDR));
    assert_eq!(Some(created.id()), init(plan_id).session_id());

    let other_port = SocketAddr::from((Ipv4Addr::new(127, 0, 0, 2), 53_125));
    let follower = task_on(
        &harness.provider,
        ConnectionInfo::new(ConnectionId::new(2), other_port, CURRENT_VERSION),
    );
    let msg: StreamMessage = IncomingStreamMessage::new(header(plan_id), Vec::new()).into();
    let found = follower.derive_session(&msg).expect("sender resolves to the init session");
    assert!(Arc::ptr_eq(&created, &found));
}

#[rstest]
#[tokio::test]
async fn terminal_message_evicts_session(mut harness: Harness) {
    let handler = handler_for(&harness.provider);
    let plan_id = PlanId::random();
    handler.on_bytes_received(frame(&init(plan_id)));

    assert!(next(&mut harness.rx).await.is_initiating());
    assert_eq!(harness.registry.len(), 1);

    handler.on_bytes_received(frame(&StreamMessage::Complete));
    handler.end_of_input();
    timeout(Duration::from_secs(1), handler.wait())
        .await
        .expect("task ends after draining");

    assert_eq!(next(&mut harness.rx).await, StreamMessage::Complete);
    assert!(harness.registry.is_empty());
    let id = SessionId::new(plan_id, 0, REMOTE_ADDR);
    assert!(harness.provider.find_session(&id).is_none());
}

#[rstest]
#[tokio::test]
async fn messages_are_delivered_in_order(mut harness: Harness) {
    let handler = handler_for(&harness.provider);
    let plan_id = PlanId::random();
    let data: StreamMessage = IncomingStreamMessage::new(header(plan_id), b"rows".to_vec()).into();

    handler.on_bytes_received(frame(&StreamMessage::KeepAlive));
    handler.on_bytes_received(frame(&init(plan_id)));
    let bytes = codec::encode_message(&data).expect("encode");
    let (head, tail) = bytes.split_at(7);
    handler.on_bytes_received(FramedBuffer::new(head.to_vec()));
    handler.on_bytes_received(FramedBuffer::new(tail.to_vec()));
    handler.on_bytes_received(frame(&StreamMessage::Complete));

    assert!(next(&mut harness.rx).await.is_initiating());
    assert_eq!(next(&mut harness.rx).await, data);
    assert_eq!(next(&mut harness.rx).await, StreamMessage::Complete);
    assert_eq!(handler.available(), 0);

    handler.close();
    handler.wait().await;
}

#[rstest]
#[traced_test]
#[tokio::test]
async fn unroutable_first_message_closes_connection(harness: Harness) {
    let handler = handler_for(&harness.provider);
    handler.on_bytes_received(frame(&StreamMessage::Complete));

    timeout(Duration::from_secs(1), handler.wait())
        .await
        .expect("task ends after resolution failure");

    assert!(handler.is_closed());
    assert!(harness.registry.is_empty());
    assert!(logs_contain("no session found for complete message"));
}

#[rstest]
#[traced_test]
#[tokio::test]
async fn malformed_frame_closes_connection(harness: Harness) {
    let handler = handler_for(&harness.provider);
    handler.on_bytes_received(FramedBuffer::new(vec![0xee, 0, 0, 0, 0]));

    timeout(Duration::from_secs(1), handler.wait())
        .await
        .expect("task ends after framing failure");

    assert!(handler.is_closed());
    assert!(logs_contain("unknown message type"));
}

#[rstest]
#[tokio::test]
async fn session_rejection_does_not_stop_reading() {
    let mut harness = harness_with(true);
    let handler = handler_for(&harness.provider);
    let plan_id = PlanId::random();

    handler.on_bytes_received(frame(&init(plan_id)));
    handler.on_bytes_received(frame(&StreamMessage::Complete));
    handler.on_bytes_received(frame(&StreamMessage::SessionFailed));

    assert!(next(&mut harness.rx).await.is_initiating());
    assert_eq!(next(&mut harness.rx).await, StreamMessage::Complete);
    assert_eq!(next(&mut harness.rx).await, StreamMessage::SessionFailed);
    assert!(!handler.is_closed());

    handler.close();
    handler.wait().await;
}

#[rstest]
#[tokio::test]
async fn dropping_last_handle_stops_task(harness: Harness) {
    let handler = handler_for(&harness.provider);
    let input = handler.input().clone();
    handler.on_bytes_received(FramedBuffer::new(vec![0_u8, 0]));

    drop(handler);

    assert!(input.is_closed());
    assert_eq!(input.available(), 0);
}

struct PanickingSession(SessionId);

#[async_trait]
impl StreamSession for PanickingSession {
    fn id(&self) -> SessionId { self.0 }

    async fn receive(&self, _message: StreamMessage) -> Result<(), SessionError> {
        panic!("session exploded")
    }
}

struct PanickingProvider;

impl SessionProvider for PanickingProvider {
    fn create_session(
        &self,
        id: SessionId,
        _init: &StreamInitMessage,
        _connection: &ConnectionInfo,
    ) -> crate::session::SharedSession {
        Arc::new(PanickingSession(id))
    }

    fn find_session(&self, _id: &SessionId) -> Option<crate::session::SharedSession> { None }
}

/// A panic inside a session is caught, logged, and closes the connection.
#[traced_test]
#[tokio::test]
async fn session_panic_is_caught_and_logged() {
    let provider: Arc<dyn SessionProvider> = Arc::new(PanickingProvider);
    let handler = handler_for(&provider);
    handler.on_bytes_received(frame(&init(PlanId::random())));

    timeout(Duration::from_secs(1), handler.wait())
        .await
        .expect("task ends after panic");

    assert!(handler.is_closed());
    logs_assert(|lines: &[&str]| {
        lines
            .iter()
            .find(|line| {
                line.contains("deserializing task panicked")
                    && line.contains("panic=session exploded")
            })
            .map(|_| ())
            .ok_or_else(|| "panic log not found".to_string())
    });
}

#[rstest]
#[tokio::test]
async fn end_of_input_delivers_queued_messages(mut harness: Harness) {
    let handler = handler_for(&harness.provider);
    handler.on_bytes_received(frame(&init(PlanId::random())));
    handler.on_bytes_received(frame(&StreamMessage::Complete));

    handler.end_of_input();
    assert!(!handler.is_closed(), "queued bytes are kept");
    timeout(Duration::from_secs(1), handler.wait())
        .await
        .expect("task ends after draining");

    assert!(next(&mut harness.rx).await.is_initiating());
    assert_eq!(next(&mut harness.rx).await, StreamMessage::Complete);
    assert!(handler.is_closed());
}

#[rstest]
#[tokio::test]
async fn end_of_input_without_bytes_closes(harness: Harness) {
    let handler = handler_for(&harness.provider);
    handler.end_of_input();
    assert!(handler.is_closed());
    handler.wait().await;
}
