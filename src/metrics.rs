//! Connection performance counters.
//!
//! Counters are plain atomics updated with relaxed ordering so the hot
//! paths never take a lock to account for traffic. Readers get a coherent
//! enough picture for dashboards; exact cross-counter consistency is not
//! promised.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// ============================================================================
// Metrics
// ============================================================================

/// Internal counter set, one per [`crate::Connection`].
///
/// Counters accumulate across reconnects for the lifetime of the owning
/// connection handle.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    /// Most recent ping round-trip, milliseconds. Zero until the first pong.
    ping_latency_ms: AtomicU64,
}

impl Metrics {
    /// Accounts one fully written outbound message.
    #[inline]
    pub(crate) fn record_sent(&self, bytes: usize) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Accounts inbound payload bytes as frames arrive, before reassembly.
    #[inline]
    pub(crate) fn add_bytes_received(&self, bytes: usize) {
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Accounts one complete inbound message after reassembly.
    #[inline]
    pub(crate) fn inc_messages_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a ping round-trip measurement.
    #[inline]
    pub(crate) fn record_ping_latency(&self, millis: u64) {
        self.ping_latency_ms.store(millis, Ordering::Relaxed);
    }

    /// Most recent ping round-trip in milliseconds.
    #[inline]
    pub(crate) fn ping_latency_ms(&self) -> u64 {
        self.ping_latency_ms.load(Ordering::Relaxed)
    }

    /// Snapshots all counters together with the queue gauges.
    pub(crate) fn snapshot(&self, queue_depth: usize, queue_bytes: usize) -> ConnectionMetrics {
        ConnectionMetrics {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            ping_latency_ms: self.ping_latency_ms.load(Ordering::Relaxed),
            queue_depth,
            queue_bytes,
        }
    }
}

// ============================================================================
// ConnectionMetrics
// ============================================================================

/// Point-in-time connection statistics.
///
/// Returned by [`crate::Connection::metrics`]. Serializable so host
/// applications can forward snapshots to their own telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionMetrics {
    /// Messages fully written to the transport.
    pub messages_sent: u64,
    /// Complete messages delivered to callbacks.
    pub messages_received: u64,
    /// Payload bytes fully written to the transport.
    pub bytes_sent: u64,
    /// Payload bytes received, counted per frame.
    pub bytes_received: u64,
    /// Most recent ping round-trip in milliseconds, zero before any pong.
    pub ping_latency_ms: u64,
    /// Messages waiting in the send queue.
    pub queue_depth: usize,
    /// Payload bytes waiting in the send queue.
    pub queue_bytes: usize,
}

// ============================================================================
// Tests
// ============================================================================
