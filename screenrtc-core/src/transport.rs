//! Peer media transport abstraction
//!
//! The session negotiates exactly one inbound media connection whose offer
//! arrives over the capture surface's scripting bridge. These traits are the
//! seam between that negotiation logic and the WebRTC stack in
//! [`webrtc`](self::webrtc), so the negotiation can be driven by test doubles.

pub mod webrtc;

use crate::error::ScreenRtcError;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use self::webrtc::{WebRtcConnector, WebRtcTrack, WebRtcTransport};

/// Session description type as carried in the page's JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Offer from the capture page
    Offer,
    /// Provisional answer
    Pranswer,
    /// Final answer
    Answer,
    /// Rollback request
    Rollback,
}

impl fmt::Display for SdpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SdpType::Offer => "offer",
            SdpType::Pranswer => "pranswer",
            SdpType::Answer => "answer",
            SdpType::Rollback => "rollback",
        };
        f.write_str(name)
    }
}

/// One half of the offer/answer exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Description type
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw SDP body
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    /// Parse a description from the JSON value a page script passed in
    pub fn from_json(value: serde_json::Value) -> Result<Self, ScreenRtcError> {
        let raw = value.to_string();
        serde_json::from_value(value).map_err(|source| ScreenRtcError::InvalidMessage {
            message: raw,
            source,
        })
    }

    /// Serialize for handing back to a page script
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "type": self.sdp_type, "sdp": self.sdp })
    }
}

/// Media kind of an inbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
    /// Anything the transport could not classify
    Unknown,
}

/// Connection state reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Not started
    New,
    /// Checking candidate pairs
    Checking,
    /// A usable pair was found
    Connected,
    /// Checking finished
    Completed,
    /// Connectivity lost, may recover
    Disconnected,
    /// Connectivity failed
    Failed,
    /// Transport shut down
    Closed,
    /// Unrecognised state
    Unknown,
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Checking => "checking",
            TransportState::Connected => "connected",
            TransportState::Completed => "completed",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
            TransportState::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A single RTP packet read from an inbound track
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// RTP sequence number
    pub sequence_number: u16,
    /// RTP timestamp
    pub timestamp: u32,
    /// Marker bit (end of frame for video)
    pub marker: bool,
    /// Undepacketized payload
    pub payload: Bytes,
}

/// Inbound media stream produced by a negotiated transport
#[async_trait]
pub trait InboundTrack: Send + Sync {
    /// Track identifier chosen by the sender
    fn id(&self) -> String;
    /// Media kind
    fn kind(&self) -> TrackKind;
    /// Synchronisation source of the sender
    fn ssrc(&self) -> u32;
    /// Negotiated codec MIME type, e.g. `video/VP8`
    fn codec_mime_type(&self) -> String;
    /// Read the next packet; fails once the transport is closed
    async fn read_packet(&self) -> Result<MediaPacket, ScreenRtcError>;
}

/// Callback invoked for each inbound track
pub type TrackHandler = Box<dyn FnMut(Arc<dyn InboundTrack>) + Send + Sync>;

/// Callback invoked on connection state changes
pub type StateHandler = Box<dyn Fn(TransportState) + Send + Sync>;

/// Transport-level control packets
#[async_trait]
pub trait RtcpWriter: Send + Sync {
    /// Ask the sender of `media_ssrc` for a full refresh frame
    async fn send_picture_loss_indication(&self, media_ssrc: u32) -> Result<(), ScreenRtcError>;
}

/// A peer media connection acting as the answering side
#[async_trait]
pub trait PeerTransport: RtcpWriter {
    /// Subscribe to connection state changes
    fn on_state_change(&self, handler: StateHandler);
    /// Install (`Some`) or clear (`None`) the inbound track handler
    fn on_track(&self, handler: Option<TrackHandler>);
    /// Apply the remote offer
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), ScreenRtcError>;
    /// Create the local answer for the applied offer
    async fn create_answer(&self) -> Result<SessionDescription, ScreenRtcError>;
    /// Close the connection
    async fn close(&self) -> Result<(), ScreenRtcError>;
}

/// Parameters for creating a peer connection
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Opaque identity binding the connection to one session
    pub peer_identity: String,
    /// STUN/TURN URLs; loopback sessions need none
    pub ice_servers: Vec<String>,
    /// How long an answer waits for candidate gathering
    pub ice_gathering_timeout: Duration,
}

impl PeerConfig {
    /// Configuration with no ICE servers and the default gathering timeout
    pub fn new(peer_identity: impl Into<String>) -> Self {
        Self {
            peer_identity: peer_identity.into(),
            ice_servers: Vec::new(),
            ice_gathering_timeout: Duration::from_secs(5),
        }
    }
}

/// Factory for peer transports
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Create a new, unnegotiated connection
    async fn connect(&self, config: &PeerConfig) -> Result<Arc<dyn PeerTransport>, ScreenRtcError>;
}
