//! Bounded FIFO send queue.
//!
//! Producers on arbitrary threads enqueue; the service loop is the only
//! consumer. Capacity is bounded twice, by message count and by payload
//! bytes, and either bound rejects with [`Error::QueueFull`] without
//! mutating the queue.
//!
//! The byte gauge is an atomic read outside the lock, but it is only ever
//! written while the queue lock is held, so it always equals the sum of
//! queued payload lengths at any point where the lock is free.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::pool::PooledBuf;

// ============================================================================
// QueuedMessage
// ============================================================================

/// One outbound message awaiting transmission.
///
/// The payload is a shared handle into the buffer pool so the drain path
/// can peek the front entry without holding the queue lock during the
/// transport write.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Payload bytes, pool-backed.
    pub payload: Arc<PooledBuf>,
    /// `true` for binary frames, `false` for UTF-8 text.
    pub binary: bool,
}

// ============================================================================
// SendQueue
// ============================================================================

/// Bounded multi-producer, single-consumer message queue.
///
/// Only the service loop removes entries; `front_for_write` and
/// `confirm_front_sent` rely on that to make peek-then-pop atomic enough
/// without holding the lock across the write.
#[derive(Debug)]
pub struct SendQueue {
    inner: Mutex<VecDeque<QueuedMessage>>,
    /// Sum of queued payload lengths. Written only under `inner`.
    queued_bytes: AtomicUsize,
    max_count: usize,
    max_bytes: usize,
}

impl SendQueue {
    /// Creates a queue bounded by `max_count` messages and `max_bytes`
    /// payload bytes.
    #[must_use]
    pub fn new(max_count: usize, max_bytes: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            queued_bytes: AtomicUsize::new(0),
            max_count,
            max_bytes,
        }
    }

    /// Appends a message.
    ///
    /// Rejects when the queue already holds `max_count` messages or
    /// `max_bytes` payload bytes. The byte bound is soft by one message:
    /// a payload that pushes the total past the bound is admitted as long
    /// as the total was below it beforehand.
    ///
    /// # Errors
    ///
    /// [`Error::QueueFull`] with the observed depth and byte gauge.
    pub fn enqueue(&self, msg: QueuedMessage) -> Result<()> {
        let mut inner = self.inner.lock();
        let bytes = self.queued_bytes.load(Ordering::Relaxed);
        if inner.len() >= self.max_count || bytes >= self.max_bytes {
            return Err(Error::queue_full(inner.len(), bytes));
        }

        let len = msg.payload.len();
        inner.push_back(msg);
        self.queued_bytes.fetch_add(len, Ordering::Relaxed);
        Ok(())
    }

    /// Clones the front entry for transmission without removing it.
    ///
    /// Returns `None` when the queue is empty or momentarily locked by a
    /// producer; the caller simply tries again on its next pass.
    #[must_use]
    pub fn front_for_write(&self) -> Option<QueuedMessage> {
        let inner = self.inner.try_lock()?;
        inner.front().cloned()
    }

    /// Removes the front entry after its payload was fully written.
    ///
    /// Returns the confirmed payload length, or `None` when the queue was
    /// cleared in the meantime.
    pub fn confirm_front_sent(&self) -> Option<usize> {
        let mut inner = self.inner.lock();
        let msg = inner.pop_front()?;
        let len = msg.payload.len();
        self.queued_bytes.fetch_sub(len, Ordering::Relaxed);
        Some(len)
    }

    /// Discards all queued messages.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.clear();
        self.queued_bytes.store(0, Ordering::Relaxed);
    }

    /// Number of queued messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` when nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Sum of queued payload lengths, readable without the lock.
    #[inline]
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.queued_bytes.load(Ordering::Relaxed)
    }

    /// Configured message-count bound.
    #[inline]
    #[must_use]
    pub fn max_count(&self) -> usize {
        self.max_count
    }

    /// Configured payload-byte bound.
    #[inline]
    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }
}

// ============================================================================
// Tests
// ============================================================================
