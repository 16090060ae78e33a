//! Shared buffer pool for response output
//!
//! Buffers are leased per exchange and returned when the lease ends:
//! - Free list shared across connections
//! - Move-only leases so a buffer goes back at most once
//! - Lease/release counters for observability

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use parking_lot::Mutex;

use crate::{Config, DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CACHED_BUFFERS};

/// Buffer pool for reusing output buffers
///
/// Cloning the pool is cheap and yields a handle to the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    /// Free list of buffers
    free_list: Mutex<Vec<BytesMut>>,
    /// Capacity of each buffer
    buffer_size: usize,
    /// Maximum number of cached buffers
    max_cached: usize,
    leased: AtomicU64,
    released: AtomicU64,
}

/// Snapshot of pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Total leases handed out
    pub leased: u64,
    /// Total leases returned
    pub released: u64,
    /// Buffers currently sitting in the free list
    pub cached: usize,
}

impl PoolStats {
    /// Leases that have not been returned yet
    pub fn outstanding(&self) -> u64 {
        self.leased - self.released
    }
}

impl BufferPool {
    /// Create a new buffer pool
    ///
    /// A zero `buffer_size` is raised to one byte.
    pub fn new(buffer_size: usize, max_cached: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                free_list: Mutex::new(Vec::with_capacity(max_cached)),
                buffer_size,
                max_cached,
                leased: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Create a pool sized from the connection configuration
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.buffer_size, config.max_cached_buffers)
    }

    /// Capacity of the buffers this pool hands out
    #[inline]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Lease a buffer from the pool
    pub fn allocate(&self) -> PooledBuffer {
        let buf = self
            .inner
            .free_list
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_size));
        self.inner.leased.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(capacity = self.inner.buffer_size, "buffer leased");

        PooledBuffer {
            buf,
            pool: self.clone(),
        }
    }

    fn put(&self, mut buffer: BytesMut) {
        self.inner.released.fetch_add(1, Ordering::Relaxed);
        tracing::trace!("buffer released");

        buffer.clear();
        if buffer.capacity() != self.inner.buffer_size {
            tracing::trace!(capacity = buffer.capacity(), "dropping resized buffer");
            return;
        }

        let mut free_list = self.inner.free_list.lock();
        if free_list.len() < self.inner.max_cached {
            free_list.push(buffer);
        }
        // Otherwise buffer is dropped
    }

    /// Get current counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            leased: self.inner.leased.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
            cached: self.inner.free_list.lock().len(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE, DEFAULT_MAX_CACHED_BUFFERS)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("max_cached", &self.inner.max_cached)
            .finish()
    }
}

/// A buffer leased from a [`BufferPool`]
///
/// The lease is returned by [`PooledBuffer::release`] or when the value is
/// dropped, whichever comes first. Both consume the lease.
pub struct PooledBuffer {
    buf: BytesMut,
    pool: BufferPool,
}

impl PooledBuffer {
    /// Capacity promised by the pool
    #[inline]
    pub fn limit(&self) -> usize {
        self.pool.buffer_size()
    }

    /// Return the buffer to its pool
    #[inline]
    pub fn release(self) {
        // Drop hands the buffer back
    }
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    #[inline]
    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.put(buf);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("limit", &self.limit())
            .finish()
    }
}
