//! Screen Capture Demo
//!
//! Starts a capture session, counts packets of the screen track for a few
//! seconds (or until the capture window is closed) and shuts down.
//!
//! Set `SCREENRTC_CHROME` to point at a specific Chrome or Chromium binary.

use anyhow::Context;
use screenrtc::{CaptureSession, DebugLogger};
use std::time::Duration;

const CAPTURE_FOR: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    DebugLogger::init_logging()?;

    println!("🖥️  ScreenRTC Capture Demo");
    println!("=========================");

    let logger = DebugLogger::with_label("demo");
    let sinks = logger.sinks();
    let error_sinks = sinks.clone();

    let session = CaptureSession::builder()
        .on_error(move |err| error_sinks.error(err))
        .on_log(move |line| sinks.log(line))
        .start_timeout(Duration::from_secs(60))
        .trace(std::env::var_os("SCREENRTC_TRACE").is_some())
        .start()
        .await
        .context("starting capture session")?;

    let track = session.track().clone();
    println!(
        "✅ Capturing track {} ({}, ssrc {})",
        track.id(),
        track.codec_mime_type(),
        track.ssrc()
    );

    let done = session.done();
    let reader = track.clone();
    tokio::select! {
        _ = done.wait() => println!("🪟 Capture window closed"),
        _ = tokio::time::sleep(CAPTURE_FOR) => println!("⏱️  Capture time elapsed"),
        _ = async {
            while reader.next_packet().await.is_ok() {}
        } => println!("📭 Track ended"),
    }

    let stats = track.stats();
    println!(
        "📊 Received {} packets ({} bytes)",
        stats.packets_received, stats.bytes_received
    );

    session.close().await.context("closing capture session")?;
    println!("👋 Session closed");
    Ok(())
}
