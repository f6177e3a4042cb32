//! Error types for ScreenRTC

use std::time::Duration;
use thiserror::Error;

/// Main error type for ScreenRTC operations
#[derive(Error, Debug)]
pub enum ScreenRtcError {
    /// The secure random source could not produce bytes
    #[error("Secure random source unavailable: {reason}")]
    RandomSource {
        /// Reason reported by the random source
        reason: String,
    },

    /// Endpoint server failed to bind its loopback listener
    #[error("Failed to bind endpoint server on {address}: {source}")]
    EndpointBind {
        /// Address that failed to bind
        address: std::net::SocketAddr,
        /// Underlying error
        source: std::io::Error,
    },

    /// Capture surface could not be launched
    #[error("Capture surface launch failed: {reason}")]
    SurfaceLaunch {
        /// Reason for launch failure
        reason: String,
    },

    /// Capture surface was closed while an operation was pending
    #[error("Capture surface closed")]
    SurfaceClosed,

    /// DevTools protocol command failed
    #[error("DevTools call {method} failed: {reason}")]
    Cdp {
        /// Protocol method
        method: String,
        /// Failure reason
        reason: String,
    },

    /// A scripting bridge binding could not be registered
    #[error("Failed to register bridge binding {name}: {reason}")]
    BridgeRegistration {
        /// Binding name
        name: String,
        /// Failure reason
        reason: String,
    },

    /// Script evaluation inside the capture surface failed
    #[error("Script evaluation failed: {reason}")]
    Script {
        /// Failure reason
        reason: String,
    },

    /// Peer connection could not be created or configured
    #[error("Peer connection error: {reason}")]
    PeerConnection {
        /// Reason for failure
        reason: String,
    },

    /// Offer/answer negotiation failed
    #[error("Negotiation failed: {reason}")]
    Negotiation {
        /// Reason for failure
        reason: String,
    },

    /// Error reported by the capture page script
    #[error("{message}")]
    PageReported {
        /// Message passed to the bridge
        message: String,
    },

    /// Keepalive control packet could not be sent
    #[error("Picture loss indication for SSRC {ssrc} failed: {reason}")]
    KeepaliveSend {
        /// Media source the packet referenced
        ssrc: u32,
        /// Reason for failure
        reason: String,
    },

    /// Media track read failed
    #[error("Track read failed: {reason}")]
    TrackRead {
        /// Reason for failure
        reason: String,
    },

    /// Operation timed out
    #[error("Timed out after {duration:?} waiting for {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Duration after which timeout occurred
        duration: Duration,
    },

    /// Invalid state error
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Resource release failed
    #[error("Failed to release {resource}: {reason}")]
    Release {
        /// Resource label
        resource: String,
        /// Failure reason
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {source}")]
    Io {
        /// Underlying error
        #[from]
        source: std::io::Error,
    },

    /// Invalid message format
    #[error("Invalid message format: {message}, error: {source}")]
    InvalidMessage {
        /// Invalid message content
        message: String,
        /// Parsing error
        source: serde_json::Error,
    },
}

impl ScreenRtcError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ScreenRtcError::RandomSource { .. } => "RANDOM_SOURCE_UNAVAILABLE",
            ScreenRtcError::EndpointBind { .. } => "ENDPOINT_BIND_FAILED",
            ScreenRtcError::SurfaceLaunch { .. } => "SURFACE_LAUNCH_FAILED",
            ScreenRtcError::SurfaceClosed => "SURFACE_CLOSED",
            ScreenRtcError::Cdp { .. } => "CDP_ERROR",
            ScreenRtcError::BridgeRegistration { .. } => "BRIDGE_REGISTRATION_FAILED",
            ScreenRtcError::Script { .. } => "SCRIPT_ERROR",
            ScreenRtcError::PeerConnection { .. } => "PEER_CONNECTION_ERROR",
            ScreenRtcError::Negotiation { .. } => "NEGOTIATION_FAILED",
            ScreenRtcError::PageReported { .. } => "PAGE_REPORTED",
            ScreenRtcError::KeepaliveSend { .. } => "KEEPALIVE_SEND_FAILED",
            ScreenRtcError::TrackRead { .. } => "TRACK_READ_FAILED",
            ScreenRtcError::Timeout { .. } => "TIMEOUT",
            ScreenRtcError::InvalidState { .. } => "INVALID_STATE",
            ScreenRtcError::Release { .. } => "RELEASE_FAILED",
            ScreenRtcError::Io { .. } => "IO_ERROR",
            ScreenRtcError::InvalidMessage { .. } => "INVALID_MESSAGE",
        }
    }

    /// Whether this error is a start timeout rather than a hard failure
    pub fn is_timeout(&self) -> bool {
        matches!(self, ScreenRtcError::Timeout { .. })
    }

    /// Whether this error happened while acquiring session resources
    pub fn is_acquisition_failure(&self) -> bool {
        matches!(
            self,
            ScreenRtcError::RandomSource { .. }
                | ScreenRtcError::EndpointBind { .. }
                | ScreenRtcError::SurfaceLaunch { .. }
                | ScreenRtcError::BridgeRegistration { .. }
                | ScreenRtcError::PeerConnection { .. }
                | ScreenRtcError::Script { .. }
        )
    }
}

/// Every failure collected while closing a session
#[derive(Error, Debug)]
#[error("{} resource(s) failed to close: {}", .failures.len(), summarize(.failures))]
pub struct CloseError {
    /// Failures in release order
    pub failures: Vec<ScreenRtcError>,
}

impl CloseError {
    /// Convert a list of failures into a result
    pub fn check(failures: Vec<ScreenRtcError>) -> Result<(), CloseError> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(CloseError { failures })
        }
    }

    /// Number of resources that failed to close
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Always false for a constructed error; kept for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

fn summarize(failures: &[ScreenRtcError]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias used across the workspace
pub type Result<T, E = ScreenRtcError> = std::result::Result<T, E>;
