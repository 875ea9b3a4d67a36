//! Keepalive latency sampling.
//!
//! Demonstrates:
//! - Running with a short ping interval
//! - Reading round-trip measurements as they update
//!
//! Usage:
//!   cargo run --example latency
//!   cargo run --example latency -- --url wss://echo.websocket.org/
//!   cargo run --example latency -- --debug

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
const PING_INTERVAL_MS: u32 = 2_000;
const SAMPLES: usize = 5;

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
    println!("=== Keepalive Latency ===\n");

    let url = args.url.unwrap_or_else(|| DEFAULT_URL.to_string());

    // ========================================================================
    // Connect
    // ========================================================================

    println!("[1] Connecting to {url}...");
    println!("    Ping interval: {PING_INTERVAL_MS} ms");

    let conn = Arc::new(
        Connection::builder()
            .ping_interval(PING_INTERVAL_MS)
            .verify_tls(!args.insecure)
            .build(),
    );
    conn.connect(&url, &[]).await?;

    if !common::wait_for_open(&conn).await {
        eprintln!("    ✗ Connection did not open in time");
        conn.shutdown().await;
        std::process::exit(1);
    }
    println!("    ✓ Connected\n");

    // ========================================================================
    // Sample Latency
    // ========================================================================

    println!("[2] Sampling {SAMPLES} round trips...");

    let mut samples = Vec::with_capacity(SAMPLES);
    for n in 1..=SAMPLES {
        tokio::time::sleep(Duration::from_millis(u64::from(PING_INTERVAL_MS) + 500)).await;
        let latency = conn.ping_latency_ms();
        println!("    [{n}/{SAMPLES}] {latency} ms");
        if latency > 0 {
            samples.push(latency);
        }
    }

    // ========================================================================
    // Report & Cleanup
    // ========================================================================

    if samples.is_empty() {
        println!("\n[3] No pongs observed");
    } else {
        let min = samples.iter().min().unwrap();
        let max = samples.iter().max().unwrap();
        let avg = samples.iter().sum::<u64>() / samples.len() as u64;
        println!("\n[3] Latency: min {min} ms / avg {avg} ms / max {max} ms");
    }

    println!("\n[Cleanup] Closing...");
    conn.close(Some(1000), Some("done"));
    conn.shutdown().await;
    println!("          ✓ Done");

    Ok(())
}
