//! Managed client WebSocket connections for real-time applications.
//!
//! This library wraps a WebSocket client in a connection manager: a small
//! state machine with a bounded send queue, automatic keepalive pings,
//! fragment reassembly, and panic-isolated callbacks.
//!
//! # Architecture
//!
//! Each [`Connection`] runs a client-server split internally:
//!
//! - **Handle (your threads)**: `send`, `close`, callback setters, metrics
//! - **Service loop (spawned task)**: owns the transport session, pumps
//!   events, drains the queue, measures ping latency
//!
//! Key design principles:
//!
//! - Callers never touch the socket; messages cross through a bounded queue
//! - Inbound traffic and lifecycle changes arrive via callback slots
//! - A panicking callback is contained and logged, never fatal
//! - The wire protocol lives behind [`TransportEngine`], so tests script
//!   a fake transport and applications can swap in their own
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use realtime_ws::{Connection, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let conn = Arc::new(Connection::new());
//!
//!     conn.set_on_message(Some(Arc::new(|text| {
//!         println!("received: {text}");
//!     })));
//!     let opened = Arc::clone(&conn);
//!     conn.set_on_open(Some(Arc::new(move || {
//!         let _ = opened.send("hello");
//!     })));
//!
//!     conn.connect("wss://echo.example.com/feed", &["chat"]).await?;
//!     tokio::time::sleep(Duration::from_secs(2)).await;
//!
//!     conn.close(Some(1000), Some("done"));
//!     conn.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | [`Connection`], its builder, and the lifecycle states |
//! | [`callback`] | Handler type aliases and the dispatch table |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`metrics`] | [`ConnectionMetrics`] snapshots |
//! | [`pool`] | Reusable payload buffers |
//! | [`transport`] | Transport engine traits and the production engine |
//! | [`url`] | `ws://` / `wss://` URL parsing |
//!
//! # Guarantees
//!
//! - **Ordered delivery**: messages leave in `send` order, never partially
//! - **Bounded memory**: the send queue rejects instead of growing
//! - **One terminal event**: exactly one `on_close` or `on_error` per session
//! - **Panic isolation**: callback panics are caught and logged

// ============================================================================
// Modules
// ============================================================================

/// Callback handler aliases and the dispatch table.
///
/// Handlers are `Arc<dyn Fn(..)>` slots shared with the service loop.
pub mod callback;

/// Connection lifecycle and public API.
///
/// Use [`Connection::builder()`] to create a configured connection.
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Inbound fragment reassembly.
///
/// Internal module accumulating partial frames into complete messages.
pub mod fragment;

/// Connection statistics.
///
/// Atomic counters behind [`Connection::metrics`] snapshots.
pub mod metrics;

/// Reusable payload buffers.
///
/// Outbound payloads are staged in pooled buffers to limit allocation.
pub mod pool;

/// Bounded outbound message queue.
///
/// Internal module backing `send` with count and byte limits.
pub mod queue;

/// Transport engine traits and implementations.
///
/// The seam between connection management and the wire protocol.
pub mod transport;

/// WebSocket URL parsing.
///
/// Splits `ws://` / `wss://` URLs into host, port, path, and TLS mode.
pub mod url;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{Connection, ConnectionBuilder, ConnectionState};

// Callback handler types
pub use callback::{BinaryHandler, CloseHandler, ErrorHandler, MessageHandler, OpenHandler};

// Error types
pub use error::{Error, Result};

// Metrics types
pub use metrics::ConnectionMetrics;

// Buffer pool types
pub use pool::{BufferPool, PooledBuf};

// Transport types
pub use transport::{
    SessionConfig, TransportEngine, TransportEvent, TransportSession, TungsteniteEngine,
};

// URL types
pub use url::WsUrl;
