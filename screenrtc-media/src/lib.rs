//! # ScreenRTC Media
//!
//! Access to the captured track and the keepalive that keeps the remote
//! encoder producing decodable frames.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod keepalive;
pub mod tracks;

// Re-export main types
pub use keepalive::{KeepaliveDriver, KeepaliveHandle, KeepaliveStats, DEFAULT_KEEPALIVE_INTERVAL};
pub use tracks::{CaptureTrack, TrackStats};
