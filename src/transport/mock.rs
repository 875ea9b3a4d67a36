//! Scripted transport engine for connection tests.
//!
//! Each expected session comes with a [`MockHandle`] the test uses to
//! feed events in and observe the calls the service loop makes. Events
//! flow through an unbounded channel, so `next_event` is cancel safe the
//! same way the production engine is.

// ============================================================================
// Imports
// ============================================================================

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

use super::{SessionConfig, TransportEngine, TransportEvent, TransportSession};

// ============================================================================
// Types
// ============================================================================

/// One call the service loop made against the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MockCall {
    Write { payload: Vec<u8>, binary: bool },
    Ping,
    Close { code: u16, reason: String },
}

/// How the session responds to `write`.
#[derive(Debug, Clone)]
pub(crate) enum WriteBehavior {
    /// Accept every payload in full.
    Accept,
    /// Accept at most this many bytes per call.
    Short(usize),
    /// Fail every call with this message.
    Fail(String),
}

enum SessionScript {
    Session(ScriptedSession),
    FailOpen(String),
}

// ============================================================================
// MockEngine
// ============================================================================

/// Engine handing out pre-scripted sessions in FIFO order.
#[derive(Default)]
pub(crate) struct MockEngine {
    scripts: Mutex<VecDeque<SessionScript>>,
    opens: AtomicUsize,
    last_config: Mutex<Option<SessionConfig>>,
}

impl MockEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Scripts one successful open and returns its control handle.
    pub(crate) fn expect_session(&self) -> MockHandle {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (calls_tx, calls_rx) = mpsc::unbounded_channel();
        let write_behavior = Arc::new(Mutex::new(WriteBehavior::Accept));
        let echo_close = Arc::new(AtomicBool::new(true));

        self.scripts
            .lock()
            .push_back(SessionScript::Session(ScriptedSession {
                events: events_rx,
                events_loopback: events_tx.clone(),
                calls: calls_tx,
                write_behavior: Arc::clone(&write_behavior),
                echo_close: Arc::clone(&echo_close),
            }));

        MockHandle {
            events: events_tx,
            calls: calls_rx,
            write_behavior,
            echo_close,
        }
    }

    /// Scripts one failing open.
    pub(crate) fn fail_next_open(&self, message: impl Into<String>) {
        self.scripts
            .lock()
            .push_back(SessionScript::FailOpen(message.into()));
    }

    /// Number of `open` calls observed.
    pub(crate) fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// The config passed to the most recent `open`.
    pub(crate) fn last_config(&self) -> Option<SessionConfig> {
        self.last_config.lock().clone()
    }
}

#[async_trait]
impl TransportEngine for MockEngine {
    async fn open(&self, config: SessionConfig) -> Result<Box<dyn TransportSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock() = Some(config);

        match self.scripts.lock().pop_front() {
            Some(SessionScript::Session(session)) => Ok(Box::new(session)),
            Some(SessionScript::FailOpen(message)) => Err(Error::transport(message)),
            None => Err(Error::transport("no scripted session available")),
        }
    }
}

// ============================================================================
// ScriptedSession
// ============================================================================

struct ScriptedSession {
    events: mpsc::UnboundedReceiver<TransportEvent>,
    events_loopback: mpsc::UnboundedSender<TransportEvent>,
    calls: mpsc::UnboundedSender<MockCall>,
    write_behavior: Arc<Mutex<WriteBehavior>>,
    echo_close: Arc<AtomicBool>,
}

#[async_trait]
impl TransportSession for ScriptedSession {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.events.recv().await
    }

    async fn write(&mut self, payload: &[u8], binary: bool) -> Result<usize> {
        let _ = self.calls.send(MockCall::Write {
            payload: payload.to_vec(),
            binary,
        });

        let behavior = self.write_behavior.lock().clone();
        match behavior {
            WriteBehavior::Accept => Ok(payload.len()),
            WriteBehavior::Short(limit) => Ok(limit.min(payload.len())),
            WriteBehavior::Fail(message) => Err(Error::transport(message)),
        }
    }

    async fn ping(&mut self) -> Result<()> {
        let _ = self.calls.send(MockCall::Ping);
        Ok(())
    }

    async fn close(&mut self, code: u16, reason: &str) -> Result<()> {
        let _ = self.calls.send(MockCall::Close {
            code,
            reason: reason.to_string(),
        });

        if self.echo_close.load(Ordering::SeqCst) {
            let _ = self.events_loopback.send(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// MockHandle
// ============================================================================

/// Test-side control of one scripted session.
pub(crate) struct MockHandle {
    events: mpsc::UnboundedSender<TransportEvent>,
    calls: mpsc::UnboundedReceiver<MockCall>,
    write_behavior: Arc<Mutex<WriteBehavior>>,
    echo_close: Arc<AtomicBool>,
}

impl MockHandle {
    /// Feeds one event to the session.
    pub(crate) fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Changes how subsequent writes behave.
    pub(crate) fn set_write_behavior(&self, behavior: WriteBehavior) {
        *self.write_behavior.lock() = behavior;
    }

    /// Disables the automatic `Closed` echo after a close call.
    pub(crate) fn set_echo_close(&self, echo: bool) {
        self.echo_close.store(echo, Ordering::SeqCst);
    }

    /// Waits for the next call made against the session.
    pub(crate) async fn next_call(&mut self) -> Option<MockCall> {
        self.calls.recv().await
    }

    /// Returns an already-recorded call without waiting.
    pub(crate) fn try_call(&mut self) -> Option<MockCall> {
        self.calls.try_recv().ok()
    }
}
