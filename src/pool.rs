//! Reusable payload buffer pool.
//!
//! Outbound payloads are copied into pooled `Vec<u8>` buffers so steady
//! traffic stops allocating once the pool is warm. Buffers return to the
//! pool automatically when the last handle drops; the pool keeps at most
//! [`MAX_POOLED_BUFFERS`] of them and lets the rest deallocate.

// ============================================================================
// Imports
// ============================================================================

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

// ============================================================================
// Constants
// ============================================================================

/// Maximum buffers retained for reuse.
pub const MAX_POOLED_BUFFERS: usize = 10;

/// Capacity floor for freshly allocated buffers.
pub const MIN_BUFFER_CAPACITY: usize = 4096;

// ============================================================================
// BufferPool
// ============================================================================

/// Pool of recycled payload buffers.
///
/// `acquire` hands out a [`PooledBuf`] sized to exactly the requested
/// length; dropping the buffer returns its storage here. The free list is
/// tiny (at most [`MAX_POOLED_BUFFERS`] entries) so lookup is a linear
/// first-fit scan.
#[derive(Debug, Clone, Default)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

#[derive(Debug, Default)]
struct PoolShared {
    free: Mutex<Vec<Vec<u8>>>,
    hits: AtomicU64,
}

impl BufferPool {
    /// Creates an empty pool.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires a buffer of exactly `size` bytes, zero-filled.
    ///
    /// Reuses the first pooled buffer whose capacity is at least `size`;
    /// otherwise allocates with capacity `max(size, 4096)`.
    #[must_use]
    pub fn acquire(&self, size: usize) -> PooledBuf {
        let reused = {
            let mut free = self.shared.free.lock();
            free.iter()
                .position(|buf| buf.capacity() >= size)
                .map(|idx| free.swap_remove(idx))
        };

        let mut data = match reused {
            Some(buf) => {
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => Vec::with_capacity(size.max(MIN_BUFFER_CAPACITY)),
        };
        data.resize(size, 0);

        PooledBuf {
            data,
            pool: Arc::downgrade(&self.shared),
        }
    }

    /// Number of times `acquire` was served from the pool.
    #[inline]
    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.shared.hits.load(Ordering::Relaxed)
    }

    /// Number of buffers currently idle in the pool.
    #[inline]
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.shared.free.lock().len()
    }
}

impl PoolShared {
    fn release(&self, mut data: Vec<u8>) {
        let mut free = self.free.lock();
        if free.len() < MAX_POOLED_BUFFERS {
            data.clear();
            free.push(data);
        }
    }
}

// ============================================================================
// PooledBuf
// ============================================================================

/// A buffer checked out of a [`BufferPool`].
///
/// Dereferences to `[u8]` with length exactly as requested. On drop the
/// storage returns to the owning pool, or deallocates when the pool is
/// already gone.
#[derive(Debug)]
pub struct PooledBuf {
    data: Vec<u8>,
    pool: Weak<PoolShared>,
}

impl PooledBuf {
    /// Payload bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bytes.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` for a zero-length payload.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Allocated capacity of the underlying storage.
    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }
}

impl Deref for PooledBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(shared) = self.pool.upgrade() {
            shared.release(std::mem::take(&mut self.data));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
