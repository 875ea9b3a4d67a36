//! Connection lifecycle and public API.
//!
//! A [`Connection`] manages one logical WebSocket connection: it owns the
//! send queue, reassembler, callbacks, and metrics, and spawns one service
//! task per connection attempt to drive the transport session.
//!
//! # State Machine
//!
//! ```text
//!            connect()          established
//! CLOSED ──────────────► CONNECTING ──────► OPEN
//!    ▲                        │               │ close()
//!    │        failure         │               ▼
//!    └────────────────────────┴─────────── CLOSING
//!    ▲                                        │
//!    └────────────────────────────────────────┘
//!                 terminal event / teardown
//! ```
//!
//! # Thread Safety
//!
//! `Connection` is `Send + Sync`; wrap it in an `Arc` to share. `send`,
//! `send_binary`, and `close` are synchronous and safe from any thread.
//! `connect` and `shutdown` are async and serialize through an internal
//! service slot, so overlapping calls queue up rather than interleave.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::callback::{
    BinaryHandler, CallbackTable, CloseHandler, ErrorHandler, MessageHandler, OpenHandler,
};
use crate::error::{Error, Result};
use crate::fragment::FragmentReassembler;
use crate::metrics::{ConnectionMetrics, Metrics};
use crate::pool::BufferPool;
use crate::queue::{QueuedMessage, SendQueue};
use crate::transport::{SessionConfig, TransportEngine, TungsteniteEngine, certs};
use crate::url::WsUrl;

mod service;

// ============================================================================
// Constants
// ============================================================================

/// Default keepalive ping interval.
pub const DEFAULT_PING_INTERVAL_MS: u32 = 30_000;

/// Default send queue bound, in messages.
pub const DEFAULT_MAX_QUEUE_MESSAGES: usize = 1024;

/// Default send queue bound, in payload bytes.
pub const DEFAULT_MAX_QUEUE_BYTES: usize = 16 * 1024 * 1024;

/// Close status code for a normal closure.
pub(crate) const NORMAL_CLOSURE: u16 = 1000;

// ============================================================================
// ConnectionState
// ============================================================================

/// Lifecycle state of a connection.
///
/// Numeric values are stable and match the classic WebSocket readyState
/// ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum ConnectionState {
    /// A connect attempt is in flight.
    Connecting = 0,
    /// Established; traffic may flow.
    Open = 1,
    /// A close was requested and is being carried out.
    Closing = 2,
    /// No session. The initial and final state.
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Open,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "CONNECTING",
            Self::Open => "OPEN",
            Self::Closing => "CLOSING",
            Self::Closed => "CLOSED",
        })
    }
}

/// Lock-free state cell.
#[derive(Debug)]
pub(crate) struct AtomicState(AtomicU8);

impl AtomicState {
    fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub(crate) fn load(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ConnectionState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

// ============================================================================
// Options & Builder
// ============================================================================

/// Mutable per-connection options, applied at the next connect.
#[derive(Debug, Clone)]
pub(crate) struct ConnectOptions {
    pub(crate) ping_interval_ms: u32,
    pub(crate) ca_path: Option<PathBuf>,
    pub(crate) verify_tls: bool,
    pub(crate) compression: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            ca_path: None,
            verify_tls: true,
            compression: false,
        }
    }
}

/// Builder for configuring a [`Connection`].
///
/// Use [`Connection::builder()`] to create one.
#[derive(Clone)]
pub struct ConnectionBuilder {
    options: ConnectOptions,
    max_queue_messages: usize,
    max_queue_bytes: usize,
    engine: Option<Arc<dyn TransportEngine>>,
}

impl Default for ConnectionBuilder {
    fn default() -> Self {
        Self {
            options: ConnectOptions::default(),
            max_queue_messages: DEFAULT_MAX_QUEUE_MESSAGES,
            max_queue_bytes: DEFAULT_MAX_QUEUE_BYTES,
            engine: None,
        }
    }
}

impl fmt::Debug for ConnectionBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionBuilder")
            .field("options", &self.options)
            .field("max_queue_messages", &self.max_queue_messages)
            .field("max_queue_bytes", &self.max_queue_bytes)
            .field("custom_engine", &self.engine.is_some())
            .finish()
    }
}

impl ConnectionBuilder {
    /// Creates a builder with default options.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the keepalive ping interval in milliseconds. Zero disables pings.
    #[inline]
    #[must_use]
    pub fn ping_interval(mut self, millis: u32) -> Self {
        self.options.ping_interval_ms = millis;
        self
    }

    /// Sets the CA bundle used to verify TLS endpoints.
    #[inline]
    #[must_use]
    pub fn ca_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.ca_path = Some(path.into());
        self
    }

    /// Enables or disables TLS certificate verification.
    ///
    /// Disabling accepts any certificate. Development use only.
    #[inline]
    #[must_use]
    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.options.verify_tls = verify;
        self
    }

    /// Requests permessage-deflate from engines that support it.
    #[inline]
    #[must_use]
    pub fn compression(mut self, enabled: bool) -> Self {
        self.options.compression = enabled;
        self
    }

    /// Sets the send queue bound in messages.
    #[inline]
    #[must_use]
    pub fn max_queue_messages(mut self, count: usize) -> Self {
        self.max_queue_messages = count;
        self
    }

    /// Sets the send queue bound in payload bytes.
    #[inline]
    #[must_use]
    pub fn max_queue_bytes(mut self, bytes: usize) -> Self {
        self.max_queue_bytes = bytes;
        self
    }

    /// Swaps in a custom transport engine.
    #[inline]
    #[must_use]
    pub fn engine(mut self, engine: Arc<dyn TransportEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Builds the connection.
    #[must_use]
    pub fn build(self) -> Connection {
        let engine = self
            .engine
            .unwrap_or_else(|| Arc::new(TungsteniteEngine) as Arc<dyn TransportEngine>);

        Connection {
            shared: Arc::new(Shared {
                state: AtomicState::new(ConnectionState::Closed),
                endpoint: Mutex::new(None),
                options: Mutex::new(self.options),
                queue: SendQueue::new(self.max_queue_messages, self.max_queue_bytes),
                reassembler: FragmentReassembler::new(),
                callbacks: CallbackTable::new(),
                metrics: Metrics::default(),
                pool: BufferPool::new(),
                wake: Notify::new(),
                stop: AtomicBool::new(false),
                close_request: Mutex::new(None),
            }),
            engine,
            service: AsyncMutex::new(None),
        }
    }
}

// ============================================================================
// Shared State
// ============================================================================

/// A pending close request recorded by [`Connection::close`].
#[derive(Debug, Clone)]
pub(crate) struct CloseRequest {
    pub(crate) code: u16,
    pub(crate) reason: String,
}

#[derive(Debug, Clone)]
struct Endpoint {
    url: String,
    host: String,
    port: u16,
    path: String,
    tls: bool,
}

/// State shared between the connection handle and its service loop.
pub(crate) struct Shared {
    pub(crate) state: AtomicState,
    endpoint: Mutex<Option<Endpoint>>,
    pub(crate) options: Mutex<ConnectOptions>,
    pub(crate) queue: SendQueue,
    pub(crate) reassembler: FragmentReassembler,
    pub(crate) callbacks: CallbackTable,
    pub(crate) metrics: Metrics,
    pub(crate) pool: BufferPool,
    /// Wakes the loop after an enqueue or a stop request.
    pub(crate) wake: Notify,
    /// Tells the loop to wind down.
    pub(crate) stop: AtomicBool,
    pub(crate) close_request: Mutex<Option<CloseRequest>>,
}

// ============================================================================
// Connection
// ============================================================================

/// A managed client WebSocket connection.
///
/// One instance manages one logical connection at a time; `connect` tears
/// down any previous session before starting the next. Inbound traffic
/// and lifecycle transitions are reported through the callback slots.
pub struct Connection {
    shared: Arc<Shared>,
    engine: Arc<dyn TransportEngine>,
    /// Join handle of the running service loop. The async mutex serializes
    /// concurrent `connect`/`shutdown` calls.
    service: AsyncMutex<Option<JoinHandle<()>>>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Creates a connection with default options and the production engine.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Returns a builder for a customized connection.
    #[inline]
    #[must_use]
    pub fn builder() -> ConnectionBuilder {
        ConnectionBuilder::new()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Connects to a WebSocket endpoint.
    ///
    /// The URL is parsed first; an invalid URL fails without touching any
    /// existing session. Otherwise the previous session (if any) is torn
    /// down, a new transport session is opened, and the service loop is
    /// spawned. Success here means the attempt is under way and the
    /// handshake completed; `on_open` fires when the loop observes the
    /// established event.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidUrl`] when the URL does not parse
    /// - [`Error::Transport`] / [`Error::Tls`] when the session cannot be
    ///   established
    pub async fn connect(&self, url: &str, protocols: &[&str]) -> Result<()> {
        let parsed = WsUrl::parse(url)?;

        let mut slot = self.service.lock().await;
        self.halt_service(&mut slot).await;

        self.shared.stop.store(false, Ordering::Release);
        *self.shared.close_request.lock() = None;

        let endpoint = Endpoint {
            url: url.to_string(),
            host: parsed.host,
            port: parsed.port,
            path: parsed.path,
            tls: parsed.tls,
        };

        let options = self.shared.options.lock().clone();
        let ca_path = if endpoint.tls {
            options.ca_path.clone().or_else(certs::system_ca_bundle)
        } else {
            None
        };
        let config = SessionConfig {
            host: endpoint.host.clone(),
            port: endpoint.port,
            path: endpoint.path.clone(),
            tls: endpoint.tls,
            protocols: protocols.iter().map(|p| (*p).to_string()).collect(),
            ca_path,
            verify_tls: options.verify_tls,
            compression: options.compression,
        };

        info!(
            host = %config.host,
            port = config.port,
            path = %config.path,
            tls = config.tls,
            "connecting"
        );

        *self.shared.endpoint.lock() = Some(endpoint);
        self.shared.state.store(ConnectionState::Connecting);

        let session = match self.engine.open(config).await {
            Ok(session) => session,
            Err(e) => {
                self.shared.state.store(ConnectionState::Closed);
                warn!(error = %e, "connection attempt failed");
                return Err(e);
            }
        };

        *slot = Some(tokio::spawn(service::run(
            Arc::clone(&self.shared),
            session,
        )));
        Ok(())
    }

    /// Requests a graceful close.
    ///
    /// Non-blocking: records the code and reason (defaults 1000 and empty),
    /// moves to `Closing`, and wakes the loop to carry the close out. A
    /// no-op unless the connection is connecting or open.
    pub fn close(&self, code: Option<u16>, reason: Option<&str>) {
        match self.shared.state.load() {
            ConnectionState::Connecting | ConnectionState::Open => {}
            ConnectionState::Closing | ConnectionState::Closed => return,
        }

        self.shared.state.store(ConnectionState::Closing);
        *self.shared.close_request.lock() = Some(CloseRequest {
            code: code.unwrap_or(NORMAL_CLOSURE),
            reason: reason.unwrap_or_default().to_string(),
        });
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }

    /// Stops the service loop and releases session resources.
    ///
    /// Waits for the loop to finish its teardown. Safe to call from any
    /// state, repeatedly.
    pub async fn shutdown(&self) {
        let mut slot = self.service.lock().await;
        self.halt_service(&mut slot).await;
    }

    /// Stops and joins the current loop, then scrubs session leftovers.
    async fn halt_service(&self, slot: &mut Option<JoinHandle<()>>) {
        if let Some(handle) = slot.take() {
            self.shared.stop.store(true, Ordering::Release);
            self.shared.wake.notify_one();
            if let Err(e) = handle.await {
                warn!(error = %e, "service task join failed");
            }
        }

        self.shared.queue.clear();
        self.shared.reassembler.reset();
        self.shared.state.store(ConnectionState::Closed);
    }

    // ========================================================================
    // Sending
    // ========================================================================

    /// Queues a text message for transmission.
    ///
    /// # Errors
    ///
    /// - [`Error::NotOpen`] unless the connection is open
    /// - [`Error::QueueFull`] when the queue is at capacity
    pub fn send(&self, text: &str) -> Result<()> {
        self.enqueue(text.as_bytes(), false)
    }

    /// Queues a binary message for transmission.
    ///
    /// # Errors
    ///
    /// Same as [`Connection::send`].
    pub fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.enqueue(data, true)
    }

    fn enqueue(&self, data: &[u8], binary: bool) -> Result<()> {
        let state = self.shared.state.load();
        if state != ConnectionState::Open {
            return Err(Error::not_open(state));
        }

        let mut buf = self.shared.pool.acquire(data.len());
        buf.copy_from_slice(data);
        self.shared.queue.enqueue(QueuedMessage {
            payload: Arc::new(buf),
            binary,
        })?;

        // Wake only after the message is actually queued
        self.shared.wake.notify_one();
        Ok(())
    }

    // ========================================================================
    // Options
    // ========================================================================

    /// Sets the keepalive ping interval in milliseconds. Zero disables
    /// pings. Applies from the next ping rearm or connect.
    pub fn set_ping_interval(&self, millis: u32) {
        self.shared.options.lock().ping_interval_ms = millis;
    }

    /// Sets the CA bundle used to verify TLS endpoints on future connects.
    pub fn set_ca_path(&self, path: impl Into<PathBuf>) {
        self.shared.options.lock().ca_path = Some(path.into());
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    /// The URL of the current or most recent connect attempt, or an empty
    /// string before the first one.
    #[must_use]
    pub fn url(&self) -> String {
        self.shared
            .endpoint
            .lock()
            .as_ref()
            .map(|endpoint| endpoint.url.clone())
            .unwrap_or_default()
    }

    /// Snapshot of connection statistics.
    #[must_use]
    pub fn metrics(&self) -> ConnectionMetrics {
        self.shared
            .metrics
            .snapshot(self.shared.queue.len(), self.shared.queue.bytes())
    }

    /// Most recent ping round-trip in milliseconds, zero before any pong.
    #[inline]
    #[must_use]
    pub fn ping_latency_ms(&self) -> u64 {
        self.shared.metrics.ping_latency_ms()
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Sets or clears the handler invoked when the connection opens.
    pub fn set_on_open(&self, handler: Option<OpenHandler>) {
        self.shared.callbacks.set_on_open(handler);
    }

    /// Returns the current open handler.
    #[must_use]
    pub fn on_open(&self) -> Option<OpenHandler> {
        self.shared.callbacks.on_open()
    }

    /// Sets or clears the handler invoked per inbound text message.
    pub fn set_on_message(&self, handler: Option<MessageHandler>) {
        self.shared.callbacks.set_on_message(handler);
    }

    /// Returns the current text message handler.
    #[must_use]
    pub fn on_message(&self) -> Option<MessageHandler> {
        self.shared.callbacks.on_message()
    }

    /// Sets or clears the handler invoked per inbound binary message.
    pub fn set_on_binary_message(&self, handler: Option<BinaryHandler>) {
        self.shared.callbacks.set_on_binary_message(handler);
    }

    /// Returns the current binary message handler.
    #[must_use]
    pub fn on_binary_message(&self) -> Option<BinaryHandler> {
        self.shared.callbacks.on_binary_message()
    }

    /// Sets or clears the handler invoked on connection errors.
    pub fn set_on_error(&self, handler: Option<ErrorHandler>) {
        self.shared.callbacks.set_on_error(handler);
    }

    /// Returns the current error handler.
    #[must_use]
    pub fn on_error(&self) -> Option<ErrorHandler> {
        self.shared.callbacks.on_error()
    }

    /// Sets or clears the handler invoked when the connection closes.
    pub fn set_on_close(&self, handler: Option<CloseHandler>) {
        self.shared.callbacks.set_on_close(handler);
    }

    /// Returns the current close handler.
    #[must_use]
    pub fn on_close(&self) -> Option<CloseHandler> {
        self.shared.callbacks.on_close()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // Signal the loop but do not join: drop can run outside a runtime.
        // The spawned task observes the flag and winds itself down.
        self.shared.stop.store(true, Ordering::Release);
        self.shared.wake.notify_one();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use tokio::time::{sleep, timeout};

    use crate::transport::TransportEvent;
    use crate::transport::mock::{MockCall, MockEngine, MockHandle, WriteBehavior};

    /// Records everything the callbacks deliver.
    #[derive(Default)]
    struct Probe {
        opens: AtomicUsize,
        messages: Mutex<Vec<String>>,
        binaries: Mutex<Vec<Vec<u8>>>,
        errors: Mutex<Vec<String>>,
        closes: Mutex<Vec<(u16, String)>>,
    }

    impl Probe {
        fn attach(self: &Arc<Self>, conn: &Connection) {
            let probe = Arc::clone(self);
            conn.set_on_open(Some(Arc::new(move || {
                probe.opens.fetch_add(1, Ordering::SeqCst);
            })));
            let probe = Arc::clone(self);
            conn.set_on_message(Some(Arc::new(move |text| {
                probe.messages.lock().push(text.to_string());
            })));
            let probe = Arc::clone(self);
            conn.set_on_binary_message(Some(Arc::new(move |data| {
                probe.binaries.lock().push(data.to_vec());
            })));
            let probe = Arc::clone(self);
            conn.set_on_error(Some(Arc::new(move |message| {
                probe.errors.lock().push(message.to_string());
            })));
            let probe = Arc::clone(self);
            conn.set_on_close(Some(Arc::new(move |code, reason| {
                probe.closes.lock().push((code, reason.to_string()));
            })));
        }
    }

    fn mock_connection(engine: MockEngine) -> (Connection, Arc<MockEngine>) {
        let engine = Arc::new(engine);
        let conn = Connection::builder()
            .engine(Arc::clone(&engine) as Arc<dyn TransportEngine>)
            .build();
        (conn, engine)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    async fn open_connection(conn: &Connection, handle: &MockHandle) {
        handle.emit(TransportEvent::Established);
        conn.connect("ws://example.test/live", &[]).await.unwrap();
        wait_until(|| conn.state() == ConnectionState::Open).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_fires_on_open() {
        let engine = MockEngine::new();
        let handle = engine.expect_session();
        let (conn, engine) = mock_connection(engine);
        let probe = Arc::new(Probe::default());
        probe.attach(&conn);

        assert_eq!(conn.state(), ConnectionState::Closed);
        open_connection(&conn, &handle).await;

        wait_until(|| probe.opens.load(Ordering::SeqCst) == 1).await;
        assert_eq!(engine.opens(), 1);
        assert_eq!(conn.url(), "ws://example.test/live");

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_before_open_is_rejected() {
        let (conn, _engine) = mock_connection(MockEngine::new());

        let err = conn.send("too early").unwrap_err();
        match err {
            Error::NotOpen { state } => assert_eq!(state, ConnectionState::Closed),
            other => panic!("expected NotOpen, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_drains_through_session() {
        let engine = MockEngine::new();
        let mut handle = engine.expect_session();
        let (conn, _engine) = mock_connection(engine);

        open_connection(&conn, &handle).await;
        conn.send("hello").unwrap();
        conn.send_binary(&[7, 8, 9]).unwrap();

        let first = timeout(Duration::from_secs(5), handle.next_call())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            first,
            MockCall::Write {
                payload: b"hello".to_vec(),
                binary: false,
            }
        );
        let second = timeout(Duration::from_secs(5), handle.next_call())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            second,
            MockCall::Write {
                payload: vec![7, 8, 9],
                binary: true,
            }
        );

        wait_until(|| conn.metrics().queue_depth == 0).await;
        let metrics = conn.metrics();
        assert_eq!(metrics.messages_sent, 2);
        assert_eq!(metrics.bytes_sent, 8);
        assert_eq!(metrics.queue_bytes, 0);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backpressure_then_recovery() {
        let engine = MockEngine::new();
        let handle = engine.expect_session();
        let engine = Arc::new(engine);
        let conn = Connection::builder()
            .engine(Arc::clone(&engine) as Arc<dyn TransportEngine>)
            .max_queue_messages(2)
            .build();

        // a zero-byte acceptance keeps every message queued
        handle.set_write_behavior(WriteBehavior::Short(0));
        open_connection(&conn, &handle).await;

        conn.send("one").unwrap();
        conn.send("two").unwrap();
        let err = conn.send("three").unwrap_err();
        assert!(matches!(err, Error::QueueFull { depth: 2, .. }));
        assert_eq!(conn.metrics().queue_depth, 2);

        // short writes never confirmed anything, so order is intact
        handle.set_write_behavior(WriteBehavior::Accept);
        wait_until(|| conn.metrics().queue_depth == 0).await;
        assert_eq!(conn.metrics().messages_sent, 2);
        conn.send("three again").unwrap();

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_keeps_message_for_retry() {
        let engine = MockEngine::new();
        let handle = engine.expect_session();
        let (conn, _engine) = mock_connection(engine);

        handle.set_write_behavior(WriteBehavior::Fail("socket hiccup".into()));
        open_connection(&conn, &handle).await;

        conn.send("persistent").unwrap();
        sleep(Duration::from_millis(200)).await;
        assert_eq!(conn.metrics().queue_depth, 1);
        assert_eq!(conn.metrics().messages_sent, 0);

        handle.set_write_behavior(WriteBehavior::Accept);
        wait_until(|| conn.metrics().messages_sent == 1).await;

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_single_frame_message() {
        let engine = MockEngine::new();
        let handle = engine.expect_session();
        let (conn, _engine) = mock_connection(engine);
        let probe = Arc::new(Probe::default());
        probe.attach(&conn);

        open_connection(&conn, &handle).await;
        handle.emit(TransportEvent::Data {
            binary: false,
            first: true,
            fin: true,
            payload: bytes::Bytes::from_static(b"tick"),
        });

        wait_until(|| !probe.messages.lock().is_empty()).await;
        assert_eq!(probe.messages.lock().as_slice(), ["tick"]);

        let metrics = conn.metrics();
        assert_eq!(metrics.messages_received, 1);
        assert_eq!(metrics.bytes_received, 4);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_inbound_fragmented_message() {
        let engine = MockEngine::new();
        let handle = engine.expect_session();
        let (conn, _engine) = mock_connection(engine);
        let probe = Arc::new(Probe::default());
        probe.attach(&conn);

        open_connection(&conn, &handle).await;
        for (first, fin, chunk) in [
            (true, false, &b"AB"[..]),
            (false, false, &b"CD"[..]),
            (false, true, &b"EF"[..]),
        ] {
            handle.emit(TransportEvent::Data {
                binary: first,
                first,
                fin,
                payload: bytes::Bytes::copy_from_slice(chunk),
            });
        }

        wait_until(|| !probe.binaries.lock().is_empty()).await;
        assert_eq!(probe.binaries.lock().as_slice(), [b"ABCDEF".to_vec()]);
        assert_eq!(probe.messages.lock().len(), 0);

        let metrics = conn.metrics();
        assert_eq!(metrics.messages_received, 1);
        assert_eq!(metrics.bytes_received, 6);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_local_close_lifecycle() {
        let engine = MockEngine::new();
        let mut handle = engine.expect_session();
        let (conn, _engine) = mock_connection(engine);
        let probe = Arc::new(Probe::default());
        probe.attach(&conn);

        open_connection(&conn, &handle).await;
        conn.send("in flight").unwrap();
        conn.close(Some(4321), Some("done here"));

        wait_until(|| conn.state() == ConnectionState::Closed).await;
        wait_until(|| !probe.closes.lock().is_empty()).await;

        // drain recorded calls until the close shows up
        let mut close_call = None;
        while let Some(call) = handle.try_call() {
            if let MockCall::Close { code, reason } = call {
                close_call = Some((code, reason));
            }
        }
        assert_eq!(close_call, Some((4321, "done here".to_string())));
        assert_eq!(
            probe.closes.lock().as_slice(),
            [(4321, "done here".to_string())]
        );

        conn.shutdown().await;
        let metrics = conn.metrics();
        assert_eq!(metrics.queue_depth, 0);
        assert_eq!(metrics.queue_bytes, 0);

        // closing again is a no-op
        conn.close(None, None);
        assert_eq!(probe.closes.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_completes_when_peer_never_acks() {
        let engine = MockEngine::new();
        let handle = engine.expect_session();
        let (conn, _engine) = mock_connection(engine);
        let probe = Arc::new(Probe::default());
        probe.attach(&conn);

        handle.set_echo_close(false);
        open_connection(&conn, &handle).await;
        conn.close(Some(1000), Some("bye"));

        // the grace window expires and the close is reported locally
        wait_until(|| conn.state() == ConnectionState::Closed).await;
        assert_eq!(probe.closes.lock().as_slice(), [(1000, "bye".to_string())]);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_close_fires_on_close_once() {
        let engine = MockEngine::new();
        let handle = engine.expect_session();
        let (conn, _engine) = mock_connection(engine);
        let probe = Arc::new(Probe::default());
        probe.attach(&conn);

        open_connection(&conn, &handle).await;
        handle.emit(TransportEvent::Closed {
            code: 1001,
            reason: "going away".into(),
        });

        wait_until(|| conn.state() == ConnectionState::Closed).await;
        assert_eq!(
            probe.closes.lock().as_slice(),
            [(1001, "going away".to_string())]
        );
        assert!(probe.errors.lock().is_empty());

        conn.shutdown().await;
        assert_eq!(probe.closes.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_fires_on_error() {
        let engine = MockEngine::new();
        let handle = engine.expect_session();
        let (conn, _engine) = mock_connection(engine);
        let probe = Arc::new(Probe::default());
        probe.attach(&conn);

        open_connection(&conn, &handle).await;
        handle.emit(TransportEvent::Error {
            message: "connection reset by peer".into(),
        });

        wait_until(|| conn.state() == ConnectionState::Closed).await;
        wait_until(|| !probe.errors.lock().is_empty()).await;
        assert_eq!(
            probe.errors.lock().as_slice(),
            ["connection reset by peer"]
        );
        assert!(probe.closes.lock().is_empty());

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_open_returns_error() {
        let engine = MockEngine::new();
        engine.fail_next_open("connection refused");
        let (conn, _engine) = mock_connection(engine);
        let probe = Arc::new(Probe::default());
        probe.attach(&conn);

        let err = conn
            .connect("ws://unreachable.test/", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
        assert_eq!(conn.state(), ConnectionState::Closed);
        // initiation failures reject the call instead of firing callbacks
        assert!(probe.errors.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_url_leaves_session_untouched() {
        let engine = MockEngine::new();
        let handle = engine.expect_session();
        let (conn, engine) = mock_connection(engine);

        open_connection(&conn, &handle).await;
        let err = conn.connect("http://not-ws.test/", &[]).await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl { .. }));

        assert_eq!(conn.state(), ConnectionState::Open);
        assert_eq!(engine.opens(), 1);
        conn.send("still alive").unwrap();

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_replaces_session() {
        let engine = MockEngine::new();
        let first = engine.expect_session();
        let second = engine.expect_session();
        let (conn, engine) = mock_connection(engine);
        let probe = Arc::new(Probe::default());
        probe.attach(&conn);

        open_connection(&conn, &first).await;

        second.emit(TransportEvent::Established);
        conn.connect("ws://example.test/next", &[]).await.unwrap();
        wait_until(|| conn.state() == ConnectionState::Open).await;

        assert_eq!(engine.opens(), 2);
        assert_eq!(conn.url(), "ws://example.test/next");
        // tearing down the first session surfaced exactly one close
        assert_eq!(probe.closes.lock().len(), 1);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_config_reflects_url_and_options() {
        let engine = MockEngine::new();
        let _handle = engine.expect_session();
        let engine = Arc::new(engine);
        let conn = Connection::builder()
            .engine(Arc::clone(&engine) as Arc<dyn TransportEngine>)
            .ca_path("/etc/custom/bundle.pem")
            .verify_tls(false)
            .build();

        conn.connect("wss://secure.test:9443/feed?v=2", &["chat", "json"])
            .await
            .unwrap();

        let config = engine.last_config().unwrap();
        assert_eq!(config.host, "secure.test");
        assert_eq!(config.port, 9443);
        assert_eq!(config.path, "/feed?v=2");
        assert!(config.tls);
        assert_eq!(config.protocols, ["chat", "json"]);
        assert_eq!(config.ca_path.as_deref().unwrap().to_str().unwrap(), "/etc/custom/bundle.pem");
        assert!(!config.verify_tls);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_url_skips_ca_resolution() {
        let engine = MockEngine::new();
        let _handle = engine.expect_session();
        let (conn, engine) = mock_connection(engine);

        conn.connect("ws://plain.test/", &[]).await.unwrap();
        let config = engine.last_config().unwrap();
        assert!(!config.tls);
        assert!(config.ca_path.is_none());

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping_latency_measurement() {
        let engine = MockEngine::new();
        let mut handle = engine.expect_session();
        let (conn, _engine) = mock_connection(engine);
        conn.set_ping_interval(30);

        open_connection(&conn, &handle).await;

        // the loop pings once the interval elapses
        loop {
            match timeout(Duration::from_secs(5), handle.next_call())
                .await
                .unwrap()
                .unwrap()
            {
                MockCall::Ping => break,
                _ => {}
            }
        }

        sleep(Duration::from_millis(25)).await;
        handle.emit(TransportEvent::Pong);

        wait_until(|| conn.ping_latency_ms() > 0).await;
        let latency = conn.ping_latency_ms();
        assert!((20..=100).contains(&latency), "latency {latency}ms");
        assert_eq!(conn.metrics().ping_latency_ms, latency);

        conn.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_without_connect_is_safe() {
        let (conn, _engine) = mock_connection(MockEngine::new());
        conn.shutdown().await;
        conn.shutdown().await;
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.url(), "");
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connecting.to_string(), "CONNECTING");
        assert_eq!(ConnectionState::Open.to_string(), "OPEN");
        assert_eq!(ConnectionState::Closing.to_string(), "CLOSING");
        assert_eq!(ConnectionState::Closed.to_string(), "CLOSED");
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            ConnectionState::Connecting,
            ConnectionState::Open,
            ConnectionState::Closing,
            ConnectionState::Closed,
        ] {
            let cell = AtomicState::new(state);
            assert_eq!(cell.load(), state);
        }
    }

    #[test]
    fn test_builder_defaults() {
        let builder = ConnectionBuilder::new();
        assert_eq!(builder.options.ping_interval_ms, DEFAULT_PING_INTERVAL_MS);
        assert!(builder.options.verify_tls);
        assert!(!builder.options.compression);
        assert_eq!(builder.max_queue_messages, DEFAULT_MAX_QUEUE_MESSAGES);
        assert_eq!(builder.max_queue_bytes, DEFAULT_MAX_QUEUE_BYTES);
    }
}
