//! Queue-backed byte source fed by the network and drained by a reader.
//!
//! The connection's I/O side pushes [`FramedBuffer`]s with
//! [`BufferedInput::enqueue`] and never blocks. The deserialising side reads
//! with [`BufferedInput::read_exact`], which suspends until enough bytes have
//! arrived or the source is closed. Closing releases every queued buffer and
//! wakes a suspended reader so it observes end of stream.
//!
//! Exactly one reader may drain a source at a time; the source keeps a single
//! waker slot for it.

use std::{
    collections::VecDeque,
    future::poll_fn,
    io,
    mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    task::{Context, Poll, Waker},
};

use bytes::{Buf, Bytes, BytesMut};
use log::{debug, trace};
use thiserror::Error;

use crate::buffer::FramedBuffer;

mod reader;

pub use reader::{BlockingReader, InputReader};

/// Returned by [`BufferedInput::enqueue`] once the source has been closed.
///
/// Ownership of the rejected buffer is handed back so the caller can release
/// it.
#[derive(Debug, Error)]
#[error("input source is closed; rejected {} byte buffer", .0.len())]
pub struct InputClosed(pub FramedBuffer);

impl InputClosed {
    /// Recover the rejected buffer.
    #[must_use]
    pub fn into_inner(self) -> FramedBuffer { self.0 }
}

#[derive(Default)]
struct State {
    queue: VecDeque<FramedBuffer>,
    available: usize,
    closed: bool,
    ended: bool,
    reader: Option<Waker>,
}

impl State {
    /// No more bytes will arrive, either because the source was closed or
    /// because the producer marked the end of the stream.
    fn exhausted(&self) -> bool { self.closed || self.ended }

    fn park(&mut self, cx: &Context<'_>) {
        match &self.reader {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => self.reader = Some(cx.waker().clone()),
        }
    }

    /// Remove exactly `n` bytes from the front of the queue.
    ///
    /// Fully consumed buffers are moved into `spent` so they can be released
    /// after the lock is dropped.
    fn take(&mut self, n: usize, spent: &mut Vec<FramedBuffer>) -> Bytes {
        debug_assert!(n <= self.available, "take beyond available bytes");
        self.available -= n;

        if let Some(front) = self.queue.front_mut()
            && front.len() >= n
        {
            let out = front.split_to(n);
            if front.is_empty()
                && let Some(buf) = self.queue.pop_front()
            {
                spent.push(buf);
            }
            return out;
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            let Some(front) = self.queue.front_mut() else {
                debug_assert!(false, "available count exceeded queued bytes");
                break;
            };
            let step = front.len().min(n - out.len());
            out.extend_from_slice(&front.as_slice()[..step]);
            front.advance(step);
            if front.is_empty()
                && let Some(buf) = self.queue.pop_front()
            {
                spent.push(buf);
            }
        }
        out.freeze()
    }

    fn copy_into(&mut self, dst: &mut [u8], spent: &mut Vec<FramedBuffer>) -> usize {
        let mut copied = 0;
        while copied < dst.len() {
            let Some(front) = self.queue.front_mut() else {
                break;
            };
            let step = front.len().min(dst.len() - copied);
            dst[copied..copied + step].copy_from_slice(&front.as_slice()[..step]);
            front.advance(step);
            copied += step;
            if front.is_empty()
                && let Some(buf) = self.queue.pop_front()
            {
                spent.push(buf);
            }
        }
        self.available -= copied;
        copied
    }
}

/// Per-connection byte source shared by the I/O side and the reader.
///
/// Cloning yields another handle to the same source.
#[derive(Clone, Default)]
pub struct BufferedInput {
    state: Arc<Mutex<State>>,
}

impl BufferedInput {
    /// Create an empty, open source.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `buffer` and wake a suspended reader.
    ///
    /// Empty buffers are released without being queued.
    ///
    /// # Errors
    ///
    /// Returns [`InputClosed`] carrying `buffer` if the source has been
    /// closed or its end marked. The caller is responsible for releasing it.
    pub fn enqueue(&self, buffer: FramedBuffer) -> Result<(), InputClosed> {
        let waker = {
            let mut state = self.lock();
            if state.exhausted() {
                return Err(InputClosed(buffer));
            }
            if buffer.is_empty() {
                drop(state);
                buffer.release();
                return Ok(());
            }
            state.available += buffer.len();
            state.queue.push_back(buffer);
            state.reader.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        Ok(())
    }

    /// Number of buffered, unread bytes.
    #[must_use]
    pub fn available(&self) -> usize { self.lock().available }

    /// Number of buffers currently queued.
    #[must_use]
    pub fn queued_buffers(&self) -> usize { self.lock().queue.len() }

    /// Returns `true` once [`BufferedInput::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.lock().closed }

    /// Close the source, release every queued buffer and wake the reader.
    ///
    /// Calling this more than once has no further effect.
    pub fn close(&self) {
        let (drained, waker) = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.available = 0;
            (mem::take(&mut state.queue), state.reader.take())
        };
        let released = drained.len();
        drop(drained);
        if let Some(waker) = waker {
            waker.wake();
        }
        debug!("input source closed: released_buffers={released}");
    }

    /// Mark the end of the stream without discarding queued bytes.
    ///
    /// Later buffers are rejected as if the source were closed. The reader
    /// drains what is already queued and then observes end of stream.
    pub fn mark_end(&self) {
        let waker = {
            let mut state = self.lock();
            if state.exhausted() {
                return;
            }
            state.ended = true;
            state.reader.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        trace!("input source marked end of stream");
    }

    /// Returns `true` once no more bytes will be accepted.
    #[must_use]
    pub fn is_ended(&self) -> bool { self.lock().exhausted() }

    /// Poll for exactly `n` bytes.
    ///
    /// Resolves to an [`io::ErrorKind::UnexpectedEof`] error if the source is
    /// closed before `n` bytes are buffered.
    pub fn poll_read_exact(&self, cx: &mut Context<'_>, n: usize) -> Poll<io::Result<Bytes>> {
        if n == 0 {
            return Poll::Ready(Ok(Bytes::new()));
        }
        let mut spent = Vec::new();
        let result = {
            let mut state = self.lock();
            if state.available >= n {
                Poll::Ready(Ok(state.take(n, &mut spent)))
            } else if state.exhausted() {
                Poll::Ready(Err(end_of_stream(state.available, n)))
            } else {
                state.park(cx);
                Poll::Pending
            }
        };
        if !spent.is_empty() {
            trace!("released consumed buffers: count={}", spent.len());
        }
        drop(spent);
        result
    }

    /// Read exactly `n` bytes, suspending until they arrive.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::UnexpectedEof`] if the source closes before
    /// `n` bytes are available.
    pub async fn read_exact(&self, n: usize) -> io::Result<Bytes> {
        poll_fn(|cx| self.poll_read_exact(cx, n)).await
    }

    /// Poll until at least one byte is buffered (`true`) or the source is
    /// closed (`false`).
    pub fn poll_readable(&self, cx: &mut Context<'_>) -> Poll<bool> {
        let mut state = self.lock();
        if state.available > 0 {
            Poll::Ready(true)
        } else if state.exhausted() {
            Poll::Ready(false)
        } else {
            state.park(cx);
            Poll::Pending
        }
    }

    /// Wait for the next byte or for the source to close.
    ///
    /// Returns `false` once the source is closed, letting a reader tell a
    /// clean end of stream from one that cuts a message short.
    pub async fn wait_readable(&self) -> bool { poll_fn(|cx| self.poll_readable(cx)).await }

    /// Poll for up to `dst.len()` bytes. Ready with `Ok(0)` means end of
    /// stream.
    pub(crate) fn poll_read_into(
        &self,
        cx: &mut Context<'_>,
        dst: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        if dst.is_empty() {
            return Poll::Ready(Ok(0));
        }
        let mut spent = Vec::new();
        let result = {
            let mut state = self.lock();
            if state.available > 0 {
                Poll::Ready(Ok(state.copy_into(dst, &mut spent)))
            } else if state.exhausted() {
                Poll::Ready(Ok(0))
            } else {
                state.park(cx);
                Poll::Pending
            }
        };
        drop(spent);
        result
    }

    /// Borrow the source as an [`tokio::io::AsyncRead`].
    #[must_use]
    pub fn reader(&self) -> InputReader { InputReader::new(self.clone()) }

    /// Borrow the source as a blocking [`std::io::Read`].
    ///
    /// The returned reader parks the calling thread and must not be used from
    /// inside an async task.
    #[must_use]
    pub fn blocking(&self) -> BlockingReader { BlockingReader::new(self.clone()) }
}

impl std::fmt::Debug for BufferedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("BufferedInput")
            .field("available", &state.available)
            .field("queued", &state.queue.len())
            .field("closed", &state.closed)
            .field("ended", &state.ended)
            .finish()
    }
}

/// Carried inside the [`io::ErrorKind::UnexpectedEof`] error returned when
/// the source ends before a read could be satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("input closed with {have} of {need} bytes buffered")]
pub struct ShortRead {
    /// Bytes that were buffered when the source ended.
    pub have: usize,
    /// Bytes the read asked for.
    pub need: usize,
}

impl ShortRead {
    /// Bytes the read was still missing.
    #[must_use]
    pub const fn missing(&self) -> usize { self.need.saturating_sub(self.have) }

    /// Extract the shortfall from an error returned by
    /// [`BufferedInput::read_exact`].
    #[must_use]
    pub fn from_io(err: &io::Error) -> Option<Self> {
        err.get_ref()
            .and_then(|inner| inner.downcast_ref::<Self>())
            .copied()
    }
}

fn end_of_stream(have: usize, need: usize) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, ShortRead { have, need })
}
