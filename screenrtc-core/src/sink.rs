//! Asynchronous error and diagnostic sinks supplied by the caller

use crate::error::ScreenRtcError;
use std::fmt;
use std::sync::Arc;

/// Receives advisory errors that do not abort the session
pub type ErrorSink = Arc<dyn Fn(&ScreenRtcError) + Send + Sync>;

/// Receives diagnostic log lines
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Pair of optional sinks, cheap to clone into callbacks and tasks
#[derive(Clone, Default)]
pub struct Sinks {
    on_err: Option<ErrorSink>,
    on_log: Option<LogSink>,
}

impl Sinks {
    /// Create sinks from optional callbacks
    pub fn new(on_err: Option<ErrorSink>, on_log: Option<LogSink>) -> Self {
        Self { on_err, on_log }
    }

    /// Forward an error to the error sink, if any
    pub fn error(&self, err: &ScreenRtcError) {
        tracing::warn!("{}", err);
        if let Some(on_err) = &self.on_err {
            on_err(err);
        }
    }

    /// Forward a diagnostic line to the log sink, if any
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::debug!("{}", message);
        if let Some(on_log) = &self.on_log {
            on_log(message);
        }
    }

    /// Whether a log sink was configured
    pub fn logging_enabled(&self) -> bool {
        self.on_log.is_some()
    }
}

impl fmt::Debug for Sinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sinks")
            .field("on_err", &self.on_err.is_some())
            .field("on_log", &self.on_log.is_some())
            .finish()
    }
}
