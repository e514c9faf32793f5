//! Integration coverage for `tablestream_testing` helpers.

use std::net::SocketAddr;

use rstest::rstest;
use tablestream::{
    MessageKind,
    PlanId,
    SessionId,
    StreamMessage,
    StreamSession,
    codec::HEADER_LEN,
    message::{StreamInitMessage, StreamOperation},
};
use tablestream_testing::{
    RecordingProvider,
    drive_messages,
    encode_frames,
    frames_to_chunks,
    handler_for,
    test_peer,
};

fn init(plan_id: PlanId) -> StreamMessage {
    StreamInitMessage::new(test_peer(), 0, plan_id, StreamOperation::Bootstrap).into()
}

#[rstest]
#[case(1)]
#[case(3)]
#[case(1024)]
fn chunks_cover_the_encoded_stream(#[case] chunk: usize) {
    let messages = [StreamMessage::Complete, StreamMessage::KeepAlive];
    let encoded = encode_frames(&messages);
    assert_eq!(encoded.len(), 2 * HEADER_LEN);

    let chunks = frames_to_chunks(&messages, chunk);
    assert!(chunks.iter().all(|c| c.len() <= chunk));
    let joined: Vec<u8> = chunks.iter().flat_map(|c| c.as_slice().to_vec()).collect();
    assert_eq!(joined, encoded);
}

#[tokio::test]
async fn recording_provider_sees_driven_messages() {
    let (provider, mut deliveries) = RecordingProvider::new();
    let handler = handler_for(provider.shared(), 1);
    let plan_id = PlanId::random();

    drive_messages(&handler, &[init(plan_id), StreamMessage::Complete], 2)
        .await
        .expect("drive connection");

    let expected = SessionId::new(plan_id, 0, test_peer());
    let first = deliveries.next().await;
    assert_eq!(first.session, expected);
    assert_eq!(first.message.kind(), MessageKind::Init);
    assert_eq!(deliveries.next().await.message, StreamMessage::Complete);
    assert!(deliveries.try_next().is_none());

    assert!(
        provider.registry().get(&expected).is_none(),
        "complete ends the session"
    );
}

#[tokio::test]
async fn rejecting_provider_counts_errors() {
    let (provider, mut deliveries) = RecordingProvider::new();
    let provider = provider.rejecting(MessageKind::Complete);
    let peer: SocketAddr = test_peer();
    let session = provider.register(SessionId::new(PlanId::random(), 0, peer));
    let handler = handler_for(provider.shared(), 2);

    // Init resolves to the registered session through the registry.
    let plan_id = session.id().plan_id;
    drive_messages(&handler, &[init(plan_id), StreamMessage::Complete], 16)
        .await
        .expect("drive connection");

    assert_eq!(deliveries.drain().len(), 2);
    assert_eq!(session.errors(), 1);
}
