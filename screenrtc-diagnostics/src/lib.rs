//! # ScreenRTC Diagnostics
//!
//! Structured logging setup and ready-made diagnostic sinks for capture
//! sessions.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod debug_logger;

// Re-export main types
pub use debug_logger::{DebugLogger, DEFAULT_FILTER};
