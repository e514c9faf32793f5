//! Helpers for producing peer byte streams.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use bytes::Bytes;
use tablestream::{
    BufferPool,
    ConnectionId,
    ConnectionInfo,
    FramedBuffer,
    InboundConfig,
    InboundHandler,
    SessionProvider,
    StreamMessage,
    codec::{self, CURRENT_VERSION},
    serve_connection,
};
use tokio::io::{AsyncWriteExt, duplex};

/// Address the test peer advertises in its messages.
#[must_use]
pub fn test_peer() -> SocketAddr { SocketAddr::from((Ipv4Addr::new(127, 0, 0, 2), 7000)) }

/// Socket address of connection `id` from the test peer.
///
/// Shares the host of [`test_peer`] but uses a client port, as an accepted
/// socket would.
#[must_use]
pub fn connection_peer(id: u64) -> SocketAddr {
    let port = 40_000 + u16::try_from(id % 20_000).unwrap_or(0);
    SocketAddr::new(test_peer().ip(), port)
}

/// Build a handler for connection `id` from [`connection_peer`].
///
/// # Panics
///
/// Panics if the default protocol version is rejected.
pub fn handler_for(provider: Arc<dyn SessionProvider>, id: u64) -> InboundHandler {
    let connection = ConnectionInfo::new(ConnectionId::new(id), connection_peer(id), CURRENT_VERSION);
    InboundHandler::new(connection, provider, InboundConfig::default()).expect("supported version")
}

/// Encode `messages` back to back as a peer would send them.
///
/// # Panics
///
/// Panics if a message cannot be encoded.
pub fn encode_frames(messages: &[StreamMessage]) -> Vec<u8> {
    messages
        .iter()
        .flat_map(|m| codec::encode_message(m).expect("encode message"))
        .collect()
}

/// Encode `messages` and split the stream into buffers of `chunk` bytes.
///
/// Chunk boundaries ignore message boundaries so the reader has to stitch
/// messages back together.
///
/// # Panics
///
/// Panics if `chunk` is zero or a message cannot be encoded.
pub fn frames_to_chunks(messages: &[StreamMessage], chunk: usize) -> Vec<FramedBuffer> {
    let bytes = Bytes::from(encode_frames(messages));
    bytes
        .chunks(chunk)
        .map(|c| FramedBuffer::new(bytes.slice_ref(c)))
        .collect()
}

/// Write `bytes` to `handler` through [`serve_connection`] over an in-memory
/// stream, reading `chunk` bytes at a time, and wait for the connection to
/// finish.
///
/// # Errors
///
/// Returns any I/O error raised by the in-memory stream.
pub async fn drive_bytes(handler: &InboundHandler, bytes: Vec<u8>, chunk: usize) -> io::Result<()> {
    let (mut client, server) = duplex(chunk.max(64));
    let config = InboundConfig::default().with_read_chunk_size(chunk);
    let pool = BufferPool::new();
    let writer = async move {
        client.write_all(&bytes).await?;
        client.shutdown().await
    };
    let (served, written) = tokio::join!(serve_connection(server, handler, &pool, &config), writer);
    served?;
    // The handler may stop reading before the peer finishes writing.
    if let Err(e) = written
        && e.kind() != io::ErrorKind::BrokenPipe
    {
        return Err(e);
    }
    Ok(())
}

/// Encode `messages` and feed them to `handler` as in [`drive_bytes`].
///
/// # Errors
///
/// Returns any I/O error raised by the in-memory stream.
pub async fn drive_messages(
    handler: &InboundHandler,
    messages: &[StreamMessage],
    chunk: usize,
) -> io::Result<()> {
    drive_bytes(handler, encode_frames(messages), chunk).await
}
