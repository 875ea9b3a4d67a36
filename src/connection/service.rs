//! The per-connection service loop.
//!
//! One loop task is spawned per successful connect. It is the only task
//! that touches the transport session, so writes, pings, and the close
//! handshake never race each other. Each pass does three things:
//!
//! 1. Pump one transport event, a wakeup, or a timer tick
//! 2. Apply the event to the state machine and callbacks
//! 3. Send a due ping and drain a bounded batch from the send queue
//!
//! The loop exits on a terminal transport event, on end of stream, or
//! when the stop flag is raised by `close`, `shutdown`, a reconnect, or
//! drop. A raised stop flag runs the graceful close path first.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::transport::{TransportEvent, TransportSession};

use super::{CloseRequest, ConnectionState, NORMAL_CLOSURE, Shared};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on one pass through the loop without traffic.
const PUMP_SLICE: Duration = Duration::from_millis(50);

/// Messages written per drain pass before yielding back to the pump.
const MAX_BATCH_MESSAGES: usize = 64;

/// Payload bytes written per drain pass before yielding back to the pump.
const MAX_BATCH_BYTES: usize = 256 * 1024;

/// How long a graceful close waits for the peer before giving up.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// ============================================================================
// Entry Point
// ============================================================================

/// Drives one transport session until it terminates.
pub(super) async fn run(shared: Arc<Shared>, session: Box<dyn TransportSession>) {
    ServiceLoop {
        shared,
        session,
        ping_deadline: None,
        ping_sent_at: None,
        terminal_fired: false,
    }
    .run()
    .await;
}

// ============================================================================
// ServiceLoop
// ============================================================================

/// What one pump pass produced.
enum Pumped {
    /// A transport event, or `None` at end of stream.
    Event(Option<TransportEvent>),
    /// The wake handle was notified.
    Woken,
    /// The pump slice elapsed.
    Tick,
}

struct ServiceLoop {
    shared: Arc<Shared>,
    session: Box<dyn TransportSession>,
    /// When the next keepalive ping is due. `None` while disabled.
    ping_deadline: Option<Instant>,
    /// When the outstanding ping was sent, if one is awaiting its pong.
    ping_sent_at: Option<Instant>,
    /// Whether the terminal callback has been delivered.
    terminal_fired: bool,
}

impl ServiceLoop {
    async fn run(mut self) {
        debug!("service loop started");

        loop {
            if self.shared.stop.load(Ordering::Acquire) {
                self.graceful_close().await;
                break;
            }

            let pumped = tokio::select! {
                event = self.session.next_event() => Pumped::Event(event),
                _ = self.shared.wake.notified() => Pumped::Woken,
                _ = sleep(PUMP_SLICE) => Pumped::Tick,
            };

            match pumped {
                Pumped::Event(Some(event)) => {
                    if self.handle_event(event) {
                        break;
                    }
                }
                Pumped::Event(None) => {
                    debug!("transport stream ended");
                    self.fire_close(NORMAL_CLOSURE, "Connection closed");
                    break;
                }
                Pumped::Woken | Pumped::Tick => {}
            }

            self.service_writes().await;
        }

        self.teardown();
        debug!("service loop terminated");
    }

    // ========================================================================
    // Event Handling
    // ========================================================================

    /// Applies one transport event. Returns `true` when it was terminal.
    fn handle_event(&mut self, event: TransportEvent) -> bool {
        match event {
            TransportEvent::Established => {
                self.shared.state.store(ConnectionState::Open);
                self.arm_ping();
                info!("connection established");
                self.shared.callbacks.emit_open();
                false
            }
            TransportEvent::Data {
                binary,
                first,
                fin,
                payload,
            } => {
                self.shared.metrics.add_bytes_received(payload.len());
                if let Some(message) = self.shared.reassembler.ingest(first, fin, binary, payload) {
                    self.shared.metrics.inc_messages_received();
                    if message.binary {
                        self.shared.callbacks.emit_binary(&message.payload);
                    } else {
                        let text = String::from_utf8_lossy(&message.payload);
                        self.shared.callbacks.emit_message(&text);
                    }
                }
                false
            }
            TransportEvent::Writable => {
                trace!("transport writable");
                false
            }
            TransportEvent::Pong => {
                if let Some(sent_at) = self.ping_sent_at.take() {
                    let latency = sent_at.elapsed().as_millis() as u64;
                    self.shared.metrics.record_ping_latency(latency);
                    trace!(latency_ms = latency, "pong received");
                }
                false
            }
            TransportEvent::Closed { code, reason } => {
                debug!(code, reason = %reason, "closed by peer");
                self.fire_close(code, &reason);
                true
            }
            TransportEvent::Error { message } => {
                warn!(error = %message, "transport error");
                self.fire_error(&message);
                true
            }
        }
    }

    /// Moves to `Closed` and delivers `on_close` exactly once.
    fn fire_close(&mut self, code: u16, reason: &str) {
        self.shared.state.store(ConnectionState::Closed);
        if !self.terminal_fired {
            self.terminal_fired = true;
            self.shared.callbacks.emit_close(code, reason);
        }
    }

    /// Moves to `Closed` and delivers `on_error` exactly once.
    fn fire_error(&mut self, message: &str) {
        self.shared.state.store(ConnectionState::Closed);
        if !self.terminal_fired {
            self.terminal_fired = true;
            self.shared.callbacks.emit_error(message);
        }
    }

    // ========================================================================
    // Outbound Servicing
    // ========================================================================

    async fn service_writes(&mut self) {
        if self.shared.state.load() != ConnectionState::Open {
            return;
        }
        self.ping_if_due().await;
        self.drain_batch().await;
    }

    async fn ping_if_due(&mut self) {
        let Some(deadline) = self.ping_deadline else {
            return;
        };
        if Instant::now() < deadline {
            return;
        }

        match self.session.ping().await {
            Ok(()) => {
                self.ping_sent_at = Some(Instant::now());
                trace!("ping sent");
            }
            Err(e) => debug!(error = %e, "ping failed"),
        }
        self.arm_ping();
    }

    /// Schedules the next ping from the current interval option.
    fn arm_ping(&mut self) {
        let interval = self.shared.options.lock().ping_interval_ms;
        self.ping_deadline = if interval > 0 {
            Some(Instant::now() + Duration::from_millis(u64::from(interval)))
        } else {
            None
        };
    }

    /// Writes queued messages until the batch budget is spent, the queue
    /// empties, or the transport pushes back.
    ///
    /// A message is popped only after the transport confirms the full
    /// payload was written, so a short write or an error leaves it at the
    /// front for the next pass.
    async fn drain_batch(&mut self) {
        let mut sent = 0usize;
        let mut batch_bytes = 0usize;

        while sent < MAX_BATCH_MESSAGES && batch_bytes < MAX_BATCH_BYTES {
            let Some(front) = self.shared.queue.front_for_write() else {
                break;
            };

            let len = front.payload.len();
            match self.session.write(front.payload.as_slice(), front.binary).await {
                Ok(written) if written == len => {
                    self.shared.queue.confirm_front_sent();
                    self.shared.metrics.record_sent(len);
                    sent += 1;
                    batch_bytes += len;
                }
                Ok(written) => {
                    trace!(written, len, "short write, deferring batch");
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "write failed, will retry");
                    break;
                }
            }
        }

        if sent > 0 {
            trace!(messages = sent, bytes = batch_bytes, "batch drained");
        }
    }

    // ========================================================================
    // Shutdown Paths
    // ========================================================================

    /// Sends the close frame and waits briefly for the peer to confirm.
    ///
    /// Terminal events arriving inside the grace window are still applied,
    /// so a peer close ack or a late error reaches the callbacks. Once the
    /// window expires the requested code and reason are reported locally.
    async fn graceful_close(&mut self) {
        let request = self
            .shared
            .close_request
            .lock()
            .take()
            .unwrap_or(CloseRequest {
                code: NORMAL_CLOSURE,
                reason: String::new(),
            });

        debug!(code = request.code, "closing session");
        if let Err(e) = self.session.close(request.code, &request.reason).await {
            debug!(error = %e, "close frame failed");
        }

        let deadline = Instant::now() + CLOSE_GRACE;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                debug!("close grace period expired");
                self.fire_close(request.code, &request.reason);
                break;
            }
            match timeout(remaining, self.session.next_event()).await {
                Ok(Some(event)) => {
                    if self.handle_event(event) {
                        break;
                    }
                }
                Ok(None) => {
                    self.fire_close(request.code, &request.reason);
                    break;
                }
                Err(_) => {
                    debug!("close grace period expired");
                    self.fire_close(request.code, &request.reason);
                    break;
                }
            }
        }
    }

    /// Runs after the loop breaks, on every exit path.
    fn teardown(&mut self) {
        // Every exit must end with exactly one terminal callback delivered.
        // The fire is a no-op when the loop already delivered it.
        self.fire_close(NORMAL_CLOSURE, "");
        self.shared.queue.clear();
        self.shared.reassembler.reset();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_budget_is_sane() {
        assert!(MAX_BATCH_MESSAGES > 0);
        assert!(MAX_BATCH_BYTES >= 64 * 1024);
        assert!(CLOSE_GRACE > PUMP_SLICE);
    }
}
