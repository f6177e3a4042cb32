//! # ScreenRTC Core
//!
//! Foundational pieces shared by every ScreenRTC crate: the error taxonomy,
//! injectable secure randomness, the resource guard stack used for session
//! teardown, and the peer transport abstraction with its WebRTC backend.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod random;
pub mod resource;
pub mod sink;
pub mod transport;

// Re-export main types
pub use error::{CloseError, Result, ScreenRtcError};
pub use random::{random_token, OsSecureRandom, SecureRandom, TOKEN_LENGTH};
pub use resource::{ResourceStack, DEFAULT_RELEASE_TIMEOUT};
pub use sink::{ErrorSink, LogSink, Sinks};
pub use transport::{
    InboundTrack, MediaPacket, PeerConfig, PeerConnector, PeerTransport, RtcpWriter, SdpType,
    SessionDescription, StateHandler, TrackHandler, TrackKind, TransportState, WebRtcConnector,
    WebRtcTrack, WebRtcTransport,
};
