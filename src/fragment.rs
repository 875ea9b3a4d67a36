//! Inbound fragment reassembly.
//!
//! WebSocket messages may arrive split across frames. Single-frame
//! messages (first and final at once) pass straight through without
//! touching the accumulation buffer; fragmented ones accumulate until the
//! final frame, then the whole payload is handed out and the buffer's
//! storage is released rather than kept warm. The binary flag of a
//! fragmented message is the one seen on its first fragment; flags on
//! continuation frames are ignored.

// ============================================================================
// Imports
// ============================================================================

use bytes::Bytes;

use parking_lot::Mutex;

// ============================================================================
// Constants
// ============================================================================

/// Reserve floor for the accumulation buffer.
///
/// The first fragment rarely predicts the total size, so reservation is
/// `max(first_len * 4, PREALLOC_FLOOR)` to keep mid-message growth rare.
const PREALLOC_FLOOR: usize = 128 * 1024;

// ============================================================================
// Types
// ============================================================================

/// A complete inbound message ready for callback delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// `true` when the message is binary, `false` for UTF-8 text.
    pub binary: bool,
    /// The full reassembled payload.
    pub payload: Bytes,
}

#[derive(Debug, Default)]
struct FragmentState {
    buffer: Vec<u8>,
    binary: bool,
}

/// Accumulates message fragments until a final frame completes them.
#[derive(Debug, Default)]
pub struct FragmentReassembler {
    inner: Mutex<FragmentState>,
}

impl FragmentReassembler {
    /// Creates an empty reassembler.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one frame; returns the complete message when one finishes.
    ///
    /// A frame that is both first and final bypasses the buffer entirely,
    /// leaving any in-progress assembly untouched.
    pub fn ingest(
        &self,
        first: bool,
        fin: bool,
        binary: bool,
        payload: Bytes,
    ) -> Option<InboundMessage> {
        if first && fin {
            return Some(InboundMessage { binary, payload });
        }

        let mut state = self.inner.lock();
        if first {
            state.buffer.clear();
            let reserve = payload.len().saturating_mul(4).max(PREALLOC_FLOOR);
            state.buffer.reserve(reserve);
            state.binary = binary;
        }
        state.buffer.extend_from_slice(&payload);

        if fin {
            let binary = state.binary;
            // take() leaves a fresh Vec, returning the capacity to the allocator
            let payload = Bytes::from(std::mem::take(&mut state.buffer));
            return Some(InboundMessage { binary, payload });
        }
        None
    }

    /// Drops any partial assembly and releases its storage.
    pub fn reset(&self) {
        *self.inner.lock() = FragmentState::default();
    }

    /// Bytes accumulated so far for an in-progress message.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    #[cfg(test)]
    fn pending_capacity(&self) -> usize {
        self.inner.lock().buffer.capacity()
    }
}

// ============================================================================
// Tests
// ============================================================================
