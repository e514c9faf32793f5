//! Per-connection inbound handler.
//!
//! [`InboundHandler`] sits where the network layer hands over received
//! chunks. It queues them on the connection's [`BufferedInput`] and, on the
//! first chunk, spawns the single [`DeserializingTask`] that drains that
//! input for the lifetime of the connection.
//!
//! ```no_run
//! use std::{net::SocketAddr, sync::Arc};
//!
//! use tablestream::{
//!     buffer::FramedBuffer,
//!     config::InboundConfig,
//!     handler::InboundHandler,
//!     session::{ConnectionId, ConnectionInfo, SessionProvider},
//! };
//!
//! # async fn demo(provider: Arc<dyn SessionProvider>, peer: SocketAddr) -> tablestream::Result<()> {
//! let config = InboundConfig::default();
//! let connection = ConnectionInfo::new(ConnectionId::new(1), peer, config.protocol_version);
//! let handler = InboundHandler::new(connection, provider, config)?;
//! handler.on_bytes_received(FramedBuffer::new(vec![0_u8; 5]));
//! handler.close();
//! handler.wait().await;
//! # Ok(())
//! # }
//! ```

use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        Weak,
        atomic::{AtomicBool, Ordering},
    },
};

use futures::FutureExt;
use log::{debug, error, trace};
use tokio_util::{
    sync::{CancellationToken, WaitForCancellationFuture},
    task::TaskTracker,
};

use crate::{
    buffer::FramedBuffer,
    codec,
    config::InboundConfig,
    error::{InboundError, Result},
    input::{BufferedInput, InputClosed},
    metrics,
    session::{ConnectionInfo, SessionProvider},
};

mod task;

pub use task::DeserializingTask;

/// Something delivered to the handler by the network layer.
#[derive(Debug)]
pub enum InboundEvent {
    /// A chunk of received bytes.
    Bytes(FramedBuffer),
    /// Any other pipeline object. Ignored.
    Other(Box<dyn Any + Send>),
}

impl InboundEvent {
    /// Wrap an arbitrary value that is not a byte buffer.
    pub fn other<T: Any + Send>(value: T) -> Self { Self::Other(Box::new(value)) }
}

impl From<FramedBuffer> for InboundEvent {
    fn from(value: FramedBuffer) -> Self { Self::Bytes(value) }
}

/// RAII guard tracking the open-connections gauge.
struct ActiveConnection;

impl ActiveConnection {
    fn new() -> Self {
        metrics::inc_connections();
        Self
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) { metrics::dec_connections(); }
}

struct Inner {
    connection: ConnectionInfo,
    input: BufferedInput,
    provider: Arc<dyn SessionProvider>,
    config: InboundConfig,
    closed: AtomicBool,
    task_armed: AtomicBool,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    _active: ActiveConnection,
}

impl Inner {
    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.input.close();
        self.tracker.close();
        self.shutdown.cancel();
        debug!("{} inbound handler closed", self.connection.log_tag());
    }
}

impl Drop for Inner {
    fn drop(&mut self) { self.close(); }
}

/// Inbound side of one streaming connection.
///
/// Cloning yields another handle to the same connection state. The
/// connection is closed when [`InboundHandler::close`] is called, when the
/// deserialising task stops, or when the last handle is dropped.
#[derive(Clone)]
pub struct InboundHandler {
    inner: Arc<Inner>,
}

impl InboundHandler {
    /// Create a handler for `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`InboundError::UnsupportedVersion`] if the connection's
    /// protocol version cannot be read by this build.
    pub fn new(
        connection: ConnectionInfo,
        provider: Arc<dyn SessionProvider>,
        config: InboundConfig,
    ) -> Result<Self> {
        Self::with_shutdown(connection, provider, config, &CancellationToken::new())
    }

    /// Create a handler that is also asked to close when `shutdown` is
    /// cancelled.
    ///
    /// Cancelling `shutdown` wakes [`InboundHandler::cancelled`]; the reader
    /// driving the handler is expected to call [`InboundHandler::close`].
    ///
    /// # Errors
    ///
    /// Returns [`InboundError::UnsupportedVersion`] if the connection's
    /// protocol version cannot be read by this build.
    pub fn with_shutdown(
        connection: ConnectionInfo,
        provider: Arc<dyn SessionProvider>,
        config: InboundConfig,
        shutdown: &CancellationToken,
    ) -> Result<Self> {
        codec::check_version(connection.version)?;
        let inner = Inner {
            connection,
            input: BufferedInput::new(),
            provider,
            config,
            closed: AtomicBool::new(false),
            task_armed: AtomicBool::new(false),
            tracker: TaskTracker::new(),
            shutdown: shutdown.child_token(),
            _active: ActiveConnection::new(),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Connection this handler serves.
    #[must_use]
    pub fn connection(&self) -> &ConnectionInfo { &self.inner.connection }

    /// Input source the handler feeds.
    #[must_use]
    pub fn input(&self) -> &BufferedInput { &self.inner.input }

    /// Bytes queued and not yet consumed by the deserialising task.
    #[must_use]
    pub fn available(&self) -> usize { self.inner.input.available() }

    /// Returns `true` once the handler has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.inner.closed.load(Ordering::Acquire) }

    /// Resolves once the handler has closed or shutdown was requested.
    ///
    /// Lets a reader blocked on the transport notice a failure detected by
    /// the deserialising task.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> { self.inner.shutdown.cancelled() }

    /// Returns `true` once the deserialising task has been spawned.
    #[must_use]
    pub fn task_armed(&self) -> bool { self.inner.task_armed.load(Ordering::Acquire) }

    /// Dispatch a pipeline event.
    ///
    /// Only [`InboundEvent::Bytes`] has an effect; anything else is dropped.
    pub fn on_inbound(&self, event: InboundEvent) {
        match event {
            InboundEvent::Bytes(buffer) => self.on_bytes_received(buffer),
            InboundEvent::Other(_) => {
                trace!(
                    "{} ignoring non-buffer inbound object",
                    self.inner.connection.log_tag()
                );
            }
        }
    }

    /// Queue a received chunk, spawning the deserialising task on the first
    /// one.
    ///
    /// Chunks delivered after [`InboundHandler::close`] are released
    /// immediately. Must be called from within a Tokio runtime.
    pub fn on_bytes_received(&self, buffer: FramedBuffer) {
        if self.is_closed() {
            trace!(
                "{} releasing {} bytes received after close",
                self.inner.connection.log_tag(),
                buffer.len()
            );
            buffer.release();
            return;
        }
        match self.inner.input.enqueue(buffer) {
            Ok(()) => {
                metrics::inc_buffers();
                self.arm_task();
            }
            Err(InputClosed(buffer)) => buffer.release(),
        }
    }

    fn arm_task(&self) {
        if self
            .inner
            .task_armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let task = DeserializingTask::new(
            self.inner.connection,
            self.inner.input.clone(),
            Arc::clone(&self.inner.provider),
            self.inner.config.max_message_len,
        );
        let handler = Arc::downgrade(&self.inner);
        let tag = self.inner.connection.log_tag();
        debug!("{tag} spawning deserializing task");
        self.inner.tracker.spawn(async move {
            let result = AssertUnwindSafe(task.run()).catch_unwind().await;
            finish(&tag, &handler, result);
        });
    }

    /// Signal that the peer has finished sending.
    ///
    /// Bytes already queued are still decoded and delivered. The handler
    /// closes once the deserialising task has drained them, or right away if
    /// no bytes ever arrived. Intended for the same producer that calls
    /// [`InboundHandler::on_bytes_received`].
    pub fn end_of_input(&self) {
        self.inner.input.mark_end();
        if !self.task_armed() {
            self.close();
        }
    }

    /// Close the connection's input and stop accepting bytes.
    ///
    /// Queued buffers are released and a suspended read in the deserialising
    /// task observes end of stream. Safe to call repeatedly.
    pub fn close(&self) { self.inner.close(); }

    /// Wait for the handler to close and its deserialising task to finish.
    pub async fn wait(&self) { self.inner.tracker.wait().await; }
}

fn finish(
    tag: &str,
    handler: &Weak<Inner>,
    result: std::thread::Result<std::result::Result<(), InboundError>>,
) {
    match result {
        Ok(Ok(())) => debug!("{tag} deserializing task finished"),
        Ok(Err(e)) => {
            error!("{tag} failed to handle inbound message: error={e}");
            tracing::error!(error = %e, connection = tag, "inbound message failed");
        }
        Err(panic) => {
            metrics::inc_errors(metrics::Stage::Panic);
            let panic_msg = crate::panic::format_panic(&*panic);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("{tag} deserializing task panicked: panic={panic_msg}");
            tracing::error!(panic = %panic_msg, connection = tag, "deserializing task panicked");
        }
    }
    if let Some(inner) = handler.upgrade() {
        inner.close();
    }
}

#[cfg(test)]
mod tests;
