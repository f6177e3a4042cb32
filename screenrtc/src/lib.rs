//! # ScreenRTC - Ephemeral Screen Capture over WebRTC
//!
//! ScreenRTC captures the local screen through a throwaway Chrome window and
//! hands the result back as an inbound WebRTC video track. Every session owns
//! its own loopback page server, browser profile and peer transport, and
//! releases all of them on close.
//!
//! ## Key Features
//!
//! - **Loopback Only**: The capture page is served on `127.0.0.1` behind a random path
//! - **Identity Pinned**: Both peers share a random peer identity per session
//! - **Keyframe Keepalive**: Periodic picture loss indications keep the stream fresh
//! - **Bounded Teardown**: Resources are released in reverse order with per-step timeouts
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use screenrtc::CaptureSession;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = CaptureSession::builder()
//!         .start_timeout(Duration::from_secs(30))
//!         .on_log(|line| println!("{}", line))
//!         .start()
//!         .await?;
//!
//!     let track = session.track().clone();
//!     let done = session.done();
//!     tokio::select! {
//!         _ = done.wait() => {}
//!         _ = async {
//!             while let Ok(packet) = track.next_packet().await {
//!                 println!("packet {} ({} bytes)", packet.sequence_number, packet.payload.len());
//!             }
//!         } => {}
//!     }
//!
//!     session.close().await?;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use screenrtc_core::{
    CloseError, ErrorSink, InboundTrack, LogSink, MediaPacket, OsSecureRandom, PeerConfig,
    PeerConnector, PeerTransport, RtcpWriter, ScreenRtcError, SdpType, SecureRandom,
    SessionDescription, TrackKind, TransportState, WebRtcConnector,
};

pub use screenrtc_media::{CaptureTrack, KeepaliveStats, TrackStats};

pub use screenrtc_signaling::{EndpointServer, CAPTURE_PAGE};

pub use screenrtc_surface::{
    done_channel, CaptureSurface, ChromeLauncher, DoneSignal, DoneTrigger, NotifyHandler,
    RequestHandler, SurfaceLauncher, SurfaceOptions,
};

#[cfg(feature = "diagnostics")]
pub use screenrtc_diagnostics::DebugLogger;

// Public API modules
pub mod config;
pub mod negotiator;
pub mod session;
pub mod slot;

// Re-export main API types
pub use config::{CaptureConfig, DEFAULT_START_TIMEOUT};
pub use negotiator::{NegotiatedTrack, TransportNegotiator, START_OPERATION};
pub use session::{CaptureSession, SessionBuilder};
pub use slot::{error_slot, ErrorSlot};

/// Start a capture session with `config`
pub async fn start(config: CaptureConfig) -> Result<CaptureSession, ScreenRtcError> {
    CaptureSession::start(config).await
}
