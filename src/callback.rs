//! Callback registry and dispatch.
//!
//! Five optional handler slots guarded by a single mutex. Dispatch clones
//! the `Arc` handler under the lock and invokes it after the lock is
//! released, so a handler may freely call back into the registry (or the
//! owning connection) without deadlocking. A panicking handler is caught
//! and dropped; one misbehaving subscriber must not take down the service
//! loop.

// ============================================================================
// Imports
// ============================================================================

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

// ============================================================================
// Handler Types
// ============================================================================

/// Invoked once per successful connection establishment.
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;

/// Invoked with each complete inbound text message.
pub type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked with each complete inbound binary message.
pub type BinaryHandler = Arc<dyn Fn(&[u8]) + Send + Sync>;

/// Invoked with a human-readable description of a connection failure.
pub type ErrorHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Invoked once when the connection closes, with code and reason.
pub type CloseHandler = Arc<dyn Fn(u16, &str) + Send + Sync>;

// ============================================================================
// CallbackTable
// ============================================================================

#[derive(Default)]
struct Handlers {
    on_open: Option<OpenHandler>,
    on_message: Option<MessageHandler>,
    on_binary_message: Option<BinaryHandler>,
    on_error: Option<ErrorHandler>,
    on_close: Option<CloseHandler>,
}

/// The five handler slots of a connection.
#[derive(Default)]
pub struct CallbackTable {
    inner: Mutex<Handlers>,
}

impl CallbackTable {
    /// Creates a table with every slot empty.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Slot Accessors
    // ========================================================================

    /// Sets or clears the open handler.
    pub fn set_on_open(&self, handler: Option<OpenHandler>) {
        self.inner.lock().on_open = handler;
    }

    /// Returns the current open handler.
    #[must_use]
    pub fn on_open(&self) -> Option<OpenHandler> {
        self.inner.lock().on_open.clone()
    }

    /// Sets or clears the text message handler.
    pub fn set_on_message(&self, handler: Option<MessageHandler>) {
        self.inner.lock().on_message = handler;
    }

    /// Returns the current text message handler.
    #[must_use]
    pub fn on_message(&self) -> Option<MessageHandler> {
        self.inner.lock().on_message.clone()
    }

    /// Sets or clears the binary message handler.
    pub fn set_on_binary_message(&self, handler: Option<BinaryHandler>) {
        self.inner.lock().on_binary_message = handler;
    }

    /// Returns the current binary message handler.
    #[must_use]
    pub fn on_binary_message(&self) -> Option<BinaryHandler> {
        self.inner.lock().on_binary_message.clone()
    }

    /// Sets or clears the error handler.
    pub fn set_on_error(&self, handler: Option<ErrorHandler>) {
        self.inner.lock().on_error = handler;
    }

    /// Returns the current error handler.
    #[must_use]
    pub fn on_error(&self) -> Option<ErrorHandler> {
        self.inner.lock().on_error.clone()
    }

    /// Sets or clears the close handler.
    pub fn set_on_close(&self, handler: Option<CloseHandler>) {
        self.inner.lock().on_close = handler;
    }

    /// Returns the current close handler.
    #[must_use]
    pub fn on_close(&self) -> Option<CloseHandler> {
        self.inner.lock().on_close.clone()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Delivers the open event.
    pub fn emit_open(&self) {
        if let Some(handler) = self.on_open() {
            invoke("on_open", || handler());
        }
    }

    /// Delivers a complete text message.
    pub fn emit_message(&self, text: &str) {
        if let Some(handler) = self.on_message() {
            invoke("on_message", || handler(text));
        }
    }

    /// Delivers a complete binary message.
    pub fn emit_binary(&self, data: &[u8]) {
        if let Some(handler) = self.on_binary_message() {
            invoke("on_binary_message", || handler(data));
        }
    }

    /// Delivers a connection error description.
    pub fn emit_error(&self, message: &str) {
        if let Some(handler) = self.on_error() {
            invoke("on_error", || handler(message));
        }
    }

    /// Delivers the close event.
    pub fn emit_close(&self, code: u16, reason: &str) {
        if let Some(handler) = self.on_close() {
            invoke("on_close", || handler(code, reason));
        }
    }
}

impl std::fmt::Debug for CallbackTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CallbackTable")
            .field("on_open", &inner.on_open.is_some())
            .field("on_message", &inner.on_message.is_some())
            .field("on_binary_message", &inner.on_binary_message.is_some())
            .field("on_error", &inner.on_error.is_some())
            .field("on_close", &inner.on_close.is_some())
            .finish()
    }
}

/// Runs a handler, swallowing any panic it raises.
fn invoke(slot: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(handler = slot, "callback panicked, continuing");
    }
}

// ============================================================================
// Tests
// ============================================================================
