//! Transport engine abstraction.
//!
//! The connection layer never touches the wire protocol directly. It
//! drives a [`TransportSession`] obtained from a [`TransportEngine`], and
//! the session reports what happened as a stream of [`TransportEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐      next_event()      ┌─────────────────────┐
//! │  Service Loop  │◄───────────────────────│  TransportSession   │
//! │   (per conn)   │───write/ping/close────►│  (tungstenite, ...) │
//! └────────────────┘                        └─────────────────────┘
//! ```
//!
//! # Session Lifecycle
//!
//! 1. `TransportEngine::open` - Dial the endpoint and complete the handshake
//! 2. `Established` event - First event of every session
//! 3. `Data`/`Pong`/`Writable` events - Steady-state traffic
//! 4. `Closed` or `Error` event - Terminal, followed by `None`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `ws_engine` | Production engine over tokio-tungstenite |
//! | `certs` | CA bundle discovery for TLS sessions |

// ============================================================================
// Submodules
// ============================================================================

/// CA bundle discovery.
pub mod certs;

/// Production engine over tokio-tungstenite.
pub mod ws_engine;

#[cfg(test)]
pub(crate) mod mock;

// ============================================================================
// Imports
// ============================================================================

use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

// ============================================================================
// Re-exports
// ============================================================================

pub use ws_engine::TungsteniteEngine;

// ============================================================================
// SessionConfig
// ============================================================================

/// Everything an engine needs to open one session.
///
/// Built by the connection from the parsed URL and its options right
/// before each attempt, so option changes apply to the next connect.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Hostname or IP literal.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Request path including any query string.
    pub path: String,
    /// Whether to wrap the stream in TLS.
    pub tls: bool,
    /// Subprotocols offered during the handshake, in preference order.
    pub protocols: Vec<String>,
    /// CA bundle to trust instead of the built-in roots.
    pub ca_path: Option<PathBuf>,
    /// When `false`, server certificates are accepted without verification.
    pub verify_tls: bool,
    /// Whether to offer permessage-deflate.
    pub compression: bool,
}

impl SessionConfig {
    /// The request URI for this session.
    #[must_use]
    pub fn uri(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

// ============================================================================
// TransportEvent
// ============================================================================

/// One occurrence reported by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed and traffic may flow.
    Established,
    /// A payload frame arrived.
    Data {
        /// `true` for binary frames, `false` for UTF-8 text.
        binary: bool,
        /// `true` when this frame starts a message.
        first: bool,
        /// `true` when this frame completes a message.
        fin: bool,
        /// Frame payload.
        payload: Bytes,
    },
    /// The transport can accept more outbound data.
    Writable,
    /// A pong answering our most recent ping.
    Pong,
    /// The peer closed the connection.
    Closed {
        /// Close status code, 1000 when the peer sent none.
        code: u16,
        /// Close reason, possibly empty.
        reason: String,
    },
    /// The session failed. Terminal.
    Error {
        /// Categorized description of the failure.
        message: String,
    },
}

// ============================================================================
// Traits
// ============================================================================

/// Factory for transport sessions.
///
/// Engines are stateless and shared; each `open` produces an independent
/// session owned by one service loop.
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Dials the endpoint and completes the WebSocket handshake.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Transport`] or [`crate::Error::Tls`] when the
    /// session cannot be established.
    async fn open(&self, config: SessionConfig) -> Result<Box<dyn TransportSession>>;
}

/// One live transport session.
///
/// Driven exclusively by its service loop, so methods take `&mut self`
/// and implementations carry no internal locking.
#[async_trait]
pub trait TransportSession: Send {
    /// Waits for the next event.
    ///
    /// Must be cancel safe: the loop races this future against its wake
    /// signal, and dropping it mid-wait must not lose a frame. Returns
    /// `None` once the session is over; a `Closed` or `Error` event is
    /// always the last `Some`.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Writes one complete message, returning the bytes accepted.
    ///
    /// A return shorter than `payload.len()` means the message was not
    /// transmitted and may be retried whole.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Transport`] when the write fails outright.
    async fn write(&mut self, payload: &[u8], binary: bool) -> Result<usize>;

    /// Sends a ping frame.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Transport`] when the ping cannot be queued.
    async fn ping(&mut self) -> Result<()>;

    /// Starts a graceful close with the given code and reason.
    ///
    /// # Errors
    ///
    /// [`crate::Error::Transport`] when the close frame cannot be sent.
    async fn close(&mut self, code: u16, reason: &str) -> Result<()>;
}

// ============================================================================
// Tests
// ============================================================================
