//! Reader adapters over a [`BufferedInput`].

use std::{
    future::poll_fn,
    io,
    pin::Pin,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::executor::block_on;
use tokio::io::{AsyncRead, ReadBuf};

use super::BufferedInput;

/// [`AsyncRead`] view of a [`BufferedInput`].
///
/// Reads return `Ok(0)` only once the source has ended and is drained, so
/// `read_exact` style helpers see [`io::ErrorKind::UnexpectedEof`] when the
/// connection drops mid-message.
#[derive(Debug, Clone)]
pub struct InputReader {
    input: BufferedInput,
}

impl InputReader {
    pub(super) fn new(input: BufferedInput) -> Self { Self { input } }

    /// Source backing this reader.
    #[must_use]
    pub fn input(&self) -> &BufferedInput { &self.input }
}

impl AsyncRead for InputReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let dst = buf.initialize_unfilled();
        match self.input.poll_read_into(cx, dst) {
            Poll::Ready(Ok(n)) => {
                buf.advance(n);
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(e)) => Poll::Ready(Err(e)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Thread-blocking view of a [`BufferedInput`].
///
/// Intended for decoders that run on a blocking pool (for example
/// [`tokio::task::spawn_blocking`]) and expect [`std::io::Read`].
#[derive(Debug, Clone)]
pub struct BlockingReader {
    input: BufferedInput,
}

impl BlockingReader {
    pub(super) fn new(input: BufferedInput) -> Self { Self { input } }

    /// Block until exactly `n` bytes are available and return them.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::UnexpectedEof`] if the source closes first.
    pub fn read_bytes(&mut self, n: usize) -> io::Result<Bytes> {
        block_on(self.input.read_exact(n))
    }
}

impl io::Read for BlockingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let input = &self.input;
        block_on(poll_fn(|cx| input.poll_read_into(cx, buf)))
    }
}
