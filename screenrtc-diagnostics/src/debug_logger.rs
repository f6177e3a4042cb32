//! Structured debug logging system

use screenrtc_core::{ScreenRtcError, Sinks};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Debug logger for structured logging
#[derive(Debug, Clone)]
pub struct DebugLogger {
    label: String,
}

impl DebugLogger {
    /// Create a logger for an unnamed session
    pub fn new() -> Self {
        Self::with_label("capture")
    }

    /// Create a logger whose events carry `session = label`
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }

    /// Initialize logging from `RUST_LOG`, falling back to [`DEFAULT_FILTER`]
    ///
    /// Leaves an already installed global subscriber in place.
    pub fn init_logging() -> Result<(), ScreenRtcError> {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        Self::install(filter)
    }

    /// Initialize logging with an explicit filter directive, e.g. `screenrtc=trace`
    pub fn init_with_filter(directives: &str) -> Result<(), ScreenRtcError> {
        let filter = EnvFilter::try_new(directives).map_err(|e| ScreenRtcError::InvalidState {
            expected: "valid log filter".to_string(),
            actual: e.to_string(),
        })?;
        Self::install(filter)
    }

    fn install(filter: EnvFilter) -> Result<(), ScreenRtcError> {
        if tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init()
            .is_err()
        {
            tracing::debug!("Global subscriber already installed");
        }
        Ok(())
    }

    /// Session sinks that forward advisory errors and log lines to `tracing`
    pub fn sinks(&self) -> Sinks {
        let err_label = self.label.clone();
        let log_label = self.label.clone();
        Sinks::new(
            Some(Arc::new(move |err: &ScreenRtcError| {
                tracing::error!(session = %err_label, code = err.error_code(), "{}", err);
            })),
            Some(Arc::new(move |line: &str| {
                tracing::info!(session = %log_label, "{}", line);
            })),
        )
    }
}

impl Default for DebugLogger {
    fn default() -> Self {
        Self::new()
    }
}
