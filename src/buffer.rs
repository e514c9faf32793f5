//! Reference-counted byte chunks received from the network.
//!
//! A [`FramedBuffer`] wraps one chunk of bytes read from a connection. Every
//! handle counts as one reference: [`FramedBuffer::acquire`] adds a handle,
//! [`FramedBuffer::release`] (or dropping the handle) removes one. When the
//! last handle goes away the chunk is returned to the [`BufferPool`] that
//! allocated it.
//!
//! Releasing consumes the handle, so reading after release or releasing the
//! same handle twice cannot be expressed.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::{Buf, Bytes};

/// Allocation source tracking how many buffers are currently live.
#[derive(Debug, Default)]
pub struct BufferPool {
    outstanding: AtomicUsize,
    recycled: AtomicUsize,
    recycled_bytes: AtomicUsize,
}

impl BufferPool {
    /// Create an empty pool behind an [`Arc`], ready to share with handlers.
    #[must_use]
    pub fn new() -> Arc<Self> { Arc::new(Self::default()) }

    /// Allocate a zero-filled buffer of `len` bytes.
    #[must_use]
    pub fn allocate(self: &Arc<Self>, len: usize) -> FramedBuffer {
        self.wrap(Bytes::from(vec![0_u8; len]))
    }

    /// Wrap bytes read from the network in a buffer owned by this pool.
    #[must_use]
    pub fn wrap(self: &Arc<Self>, bytes: impl Into<Bytes>) -> FramedBuffer {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        FramedBuffer::with_pool(bytes.into(), Some(Arc::clone(self)))
    }

    /// Number of buffers allocated from this pool that still hold a reference.
    #[must_use]
    pub fn outstanding(&self) -> usize { self.outstanding.load(Ordering::Acquire) }

    /// Number of buffers that have been returned to the pool.
    #[must_use]
    pub fn recycled(&self) -> usize { self.recycled.load(Ordering::Acquire) }

    /// Total capacity, in bytes, of the buffers returned to the pool.
    #[must_use]
    pub fn recycled_bytes(&self) -> usize { self.recycled_bytes.load(Ordering::Acquire) }

    fn reclaim(&self, capacity: usize) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "buffer returned to a pool with no outstanding buffers");
        self.recycled.fetch_add(1, Ordering::AcqRel);
        self.recycled_bytes.fetch_add(capacity, Ordering::AcqRel);
    }
}

/// Shared bookkeeping for every handle of one buffer.
struct Lease {
    refs: AtomicUsize,
    capacity: usize,
    pool: Option<Arc<BufferPool>>,
}

impl Lease {
    fn decrement(&self) {
        let previous = self.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "framed buffer released more often than acquired");
        if previous == 1
            && let Some(pool) = &self.pool
        {
            pool.reclaim(self.capacity);
        }
    }
}

/// One handle to a reference-counted chunk of network bytes.
///
/// The handle carries its own read cursor: bytes consumed through
/// [`FramedBuffer::split_to`] or [`Buf::advance`] are no longer visible to
/// this handle but remain visible to any other handle acquired earlier.
pub struct FramedBuffer {
    bytes: Bytes,
    lease: Arc<Lease>,
}

impl FramedBuffer {
    /// Wrap `bytes` in a buffer that belongs to no pool.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self { Self::with_pool(bytes.into(), None) }

    fn with_pool(bytes: Bytes, pool: Option<Arc<BufferPool>>) -> Self {
        let lease = Lease {
            refs: AtomicUsize::new(1),
            capacity: bytes.len(),
            pool,
        };
        Self {
            bytes,
            lease: Arc::new(lease),
        }
    }

    /// Take another reference to the same chunk.
    ///
    /// The returned handle starts at this handle's read position and must be
    /// released independently.
    #[must_use]
    pub fn acquire(&self) -> Self {
        self.lease.refs.fetch_add(1, Ordering::AcqRel);
        Self {
            bytes: self.bytes.clone(),
            lease: Arc::clone(&self.lease),
        }
    }

    /// Give up this reference. Equivalent to dropping the handle.
    pub fn release(self) { drop(self); }

    /// Current number of live handles for this chunk.
    #[must_use]
    pub fn ref_count(&self) -> usize { self.lease.refs.load(Ordering::Acquire) }

    /// Observer that can report the reference count after every handle is
    /// gone.
    #[must_use]
    pub fn watch(&self) -> BufferWatch {
        BufferWatch {
            lease: Arc::clone(&self.lease),
        }
    }

    /// Number of unread bytes visible through this handle.
    #[must_use]
    pub fn len(&self) -> usize { self.bytes.len() }

    /// Returns `true` when this handle has no unread bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.bytes.is_empty() }

    /// Unread bytes visible through this handle.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] { &self.bytes }

    /// Consume and return the first `n` unread bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds [`FramedBuffer::len`], mirroring
    /// [`Bytes::split_to`].
    pub fn split_to(&mut self, n: usize) -> Bytes { self.bytes.split_to(n) }
}

impl Buf for FramedBuffer {
    fn remaining(&self) -> usize { self.bytes.len() }

    fn chunk(&self) -> &[u8] { &self.bytes }

    fn advance(&mut self, cnt: usize) { self.bytes.advance(cnt); }
}

impl Drop for FramedBuffer {
    fn drop(&mut self) { self.lease.decrement(); }
}

impl fmt::Debug for FramedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FramedBuffer")
            .field("len", &self.bytes.len())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Non-owning view of a buffer's reference count.
#[derive(Clone)]
pub struct BufferWatch {
    lease: Arc<Lease>,
}

impl BufferWatch {
    /// Number of live handles. Reaches zero once the buffer is released.
    #[must_use]
    pub fn ref_count(&self) -> usize { self.lease.refs.load(Ordering::Acquire) }

    /// Returns `true` once every handle has been released.
    #[must_use]
    pub fn is_released(&self) -> bool { self.ref_count() == 0 }
}

impl fmt::Debug for BufferWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferWatch")
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Buf;
    use rstest::rstest;

    use super::{BufferPool, FramedBuffer};

    #[rstest]
    fn fresh_buffer_has_single_reference() {
        let buf = FramedBuffer::new(vec![1_u8, 2, 3]);
        assert_eq!(buf.ref_count(), 1);
        assert_eq!(buf.len(), 3);
    }

    #[rstest]
    fn acquire_and_release_are_paired() {
        let buf = FramedBuffer::new(vec![0_u8; 8]);
        let watch = buf.watch();
        let second = buf.acquire();
        assert_eq!(watch.ref_count(), 2);

        second.release();
        assert_eq!(watch.ref_count(), 1);
        buf.release();
        assert!(watch.is_released());
    }

    #[rstest]
    fn last_release_returns_buffer_to_pool() {
        let pool = BufferPool::new();
        let buf = pool.allocate(16);
        let extra = buf.acquire();
        assert_eq!(pool.outstanding(), 1);

        drop(buf);
        assert_eq!(pool.recycled(), 0, "a handle is still live");
        drop(extra);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.recycled(), 1);
        assert_eq!(pool.recycled_bytes(), 16);
    }

    #[rstest]
    fn cursor_is_per_handle() {
        let mut buf = FramedBuffer::new(b"abcdef".to_vec());
        let other = buf.acquire();
        buf.advance(2);
        assert_eq!(buf.split_to(2).as_ref(), b"cd");
        assert_eq!(buf.as_slice(), b"ef");
        assert_eq!(other.as_slice(), b"abcdef");
    }
}
