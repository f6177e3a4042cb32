//! Configuration types and defaults

use screenrtc_core::{ErrorSink, LogSink, Sinks, DEFAULT_RELEASE_TIMEOUT};
use screenrtc_media::DEFAULT_KEEPALIVE_INTERVAL;
use screenrtc_surface::SurfaceOptions;
use std::fmt;
use std::time::Duration;

/// Start timeout used when [`CaptureConfig::start_timeout`] is zero
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Capture session configuration
#[derive(Clone)]
pub struct CaptureConfig {
    /// Receives advisory errors, including ones after a successful start
    pub on_err: Option<ErrorSink>,
    /// Receives diagnostic log lines
    pub on_log: Option<LogSink>,
    /// How long start waits for the track; zero means [`DEFAULT_START_TIMEOUT`]
    pub start_timeout: Duration,
    /// Log the offer and answer SDP
    pub trace: bool,
    /// Spacing of keyframe requests on the captured track
    pub keepalive_interval: Duration,
    /// Capture window options
    pub surface: SurfaceOptions,
    /// Bound on each resource release during close
    pub close_timeout: Duration,
}

impl CaptureConfig {
    /// Start timeout with the zero default applied
    pub fn effective_start_timeout(&self) -> Duration {
        if self.start_timeout.is_zero() {
            DEFAULT_START_TIMEOUT
        } else {
            self.start_timeout
        }
    }

    pub(crate) fn sinks(&self) -> Sinks {
        Sinks::new(self.on_err.clone(), self.on_log.clone())
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            on_err: None,
            on_log: None,
            start_timeout: Duration::ZERO,
            trace: false,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            surface: SurfaceOptions::default(),
            close_timeout: DEFAULT_RELEASE_TIMEOUT,
        }
    }
}

impl fmt::Debug for CaptureConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureConfig")
            .field("on_err", &self.on_err.is_some())
            .field("on_log", &self.on_log.is_some())
            .field("start_timeout", &self.start_timeout)
            .field("trace", &self.trace)
            .field("keepalive_interval", &self.keepalive_interval)
            .field("surface", &self.surface)
            .field("close_timeout", &self.close_timeout)
            .finish()
    }
}
