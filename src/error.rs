//! Error types for the realtime WebSocket client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use realtime_ws::{Connection, Result};
//!
//! async fn example(conn: &Connection) -> Result<()> {
//!     conn.connect("wss://example.com/socket", &[]).await?;
//!     conn.send("hello")?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Caller | [`Error::InvalidUrl`], [`Error::NotOpen`] |
//! | Backpressure | [`Error::QueueFull`] |
//! | Transport | [`Error::Transport`], [`Error::Tls`] |
//! | External | [`Error::Io`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::connection::ConnectionState;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging. Errors raised by
/// synchronous calls are returned directly; failures detected on the service
/// loop after a connection is established are reported through the `on_error`
/// callback instead.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Caller Errors
    // ========================================================================
    /// URL failed to parse.
    ///
    /// Returned by `connect` before any prior session is disturbed.
    #[error("Invalid WebSocket URL '{url}': {reason}")]
    InvalidUrl {
        /// The URL as supplied by the caller.
        url: String,
        /// Description of the parse failure.
        reason: String,
    },

    /// Send attempted while the connection is not open.
    ///
    /// Returned by `send` and `send_binary` in any state other than `Open`.
    #[error("Connection not open (state: {state})")]
    NotOpen {
        /// The state observed at the time of the call.
        state: ConnectionState,
    },

    // ========================================================================
    // Backpressure Errors
    // ========================================================================
    /// Send queue is at capacity.
    ///
    /// Returned when either the message-count or byte bound is reached.
    /// The queue is left unchanged; the caller may retry after a drain.
    #[error("Send queue full: {depth} messages / {bytes} bytes queued")]
    QueueFull {
        /// Messages queued at the time of the call.
        depth: usize,
        /// Payload bytes queued at the time of the call.
        bytes: usize,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Transport engine failure.
    ///
    /// Covers connect, write, and close failures reported by the engine.
    /// The message carries the categorized cause (DNS, refused, timeout, ...).
    #[error("Transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// TLS configuration failure.
    ///
    /// Returned when the client TLS config cannot be built, e.g. an
    /// unreadable or unparseable CA bundle.
    #[error("TLS error: {message}")]
    Tls {
        /// Description of the TLS failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a not-open error.
    #[inline]
    pub fn not_open(state: ConnectionState) -> Self {
        Self::NotOpen { state }
    }

    /// Creates a queue-full error.
    #[inline]
    pub fn queue_full(depth: usize, bytes: usize) -> Self {
        Self::QueueFull { depth, bytes }
    }

    /// Creates a transport error.
    #[inline]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates a TLS error.
    #[inline]
    pub fn tls(message: impl Into<String>) -> Self {
        Self::Tls {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this error originated in the transport layer.
    #[inline]
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io(_))
    }

    /// Returns `true` if this error is transient.
    ///
    /// Transient errors may succeed on retry: a queue-full condition clears
    /// as the loop drains, and transport failures may be network weather.
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::QueueFull { .. } | Self::Transport { .. } | Self::Io(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
