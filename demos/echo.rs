//! Echo round trip against a public echo server.
//!
//! Demonstrates:
//! - Building a connection with callbacks
//! - Sending text and binary messages
//! - Reading metrics and closing gracefully
//!
//! Usage:
//!   cargo run --example echo
//!   cargo run --example echo -- --url wss://echo.websocket.org/
//!   cargo run --example echo -- --debug
//!   cargo run --example echo -- --insecure

mod common;

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use common::Args;
use realtime_ws::{Connection, Result};

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_URL: &str = "wss://echo.websocket.org/";

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    common::init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Echo Round Trip ===\n");

    let url = args.url.unwrap_or_else(|| DEFAULT_URL.to_string());

    // ========================================================================
    // Build Connection
    // ========================================================================

    println!("[1] Building connection...");

    let conn = Arc::new(
        Connection::builder()
            .ping_interval(10_000)
            .verify_tls(!args.insecure)
            .build(),
    );

    conn.set_on_open(Some(Arc::new(|| {
        println!("    ✓ Connected");
    })));
    conn.set_on_message(Some(Arc::new(|text| {
        println!("    ← text: {text}");
    })));
    conn.set_on_binary_message(Some(Arc::new(|data| {
        println!("    ← binary: {} bytes", data.len());
    })));
    conn.set_on_error(Some(Arc::new(|message| {
        println!("    ✗ error: {message}");
    })));
    conn.set_on_close(Some(Arc::new(|code, reason| {
        println!("    ✓ Closed ({code}) {reason}");
    })));

    println!("    ✓ Callbacks registered\n");

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[2] Connecting to {url}...");
    conn.connect(&url, &[]).await?;

    if !common::wait_for_open(&conn).await {
        eprintln!("    ✗ Connection did not open in time");
        conn.shutdown().await;
        std::process::exit(1);
    }

    // ========================================================================
    // Send Traffic
    // ========================================================================

    println!("\n[3] Sending messages...");
    for n in 1..=3 {
        conn.send(&format!("echo {n}"))?;
        println!("    → text: echo {n}");
    }
    conn.send_binary(&[0xDE, 0xAD, 0xBE, 0xEF])?;
    println!("    → binary: 4 bytes");

    // Let echoes come back
    tokio::time::sleep(Duration::from_secs(2)).await;

    // ========================================================================
    // Report & Cleanup
    // ========================================================================

    let metrics = conn.metrics();
    println!("\n[4] Metrics:");
    println!(
        "    Sent:     {} messages / {} bytes",
        metrics.messages_sent, metrics.bytes_sent
    );
    println!(
        "    Received: {} messages / {} bytes",
        metrics.messages_received, metrics.bytes_received
    );
    println!("    Ping:     {} ms", metrics.ping_latency_ms);

    println!("\n[Cleanup] Closing...");
    conn.close(Some(1000), Some("demo complete"));
    conn.shutdown().await;
    println!("          ✓ Done");

    Ok(())
}
