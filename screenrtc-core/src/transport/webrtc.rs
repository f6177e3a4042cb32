//! WebRTC-backed peer transport

use super::{
    InboundTrack, MediaPacket, PeerConfig, PeerConnector, PeerTransport, RtcpWriter, SdpType,
    SessionDescription, StateHandler, TrackHandler, TrackKind, TransportState,
};
use crate::error::ScreenRtcError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_remote::TrackRemote;

fn peer_error(context: &str, e: impl std::fmt::Display) -> ScreenRtcError {
    ScreenRtcError::PeerConnection {
        reason: format!("{}: {}", context, e),
    }
}

fn negotiation_error(context: &str, e: impl std::fmt::Display) -> ScreenRtcError {
    ScreenRtcError::Negotiation {
        reason: format!("{}: {}", context, e),
    }
}

/// Creates peer connections with default codecs and interceptors
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcConnector;

impl WebRtcConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, config: &PeerConfig) -> Result<Arc<dyn PeerTransport>, ScreenRtcError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| peer_error("failed to register codecs", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| peer_error("failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let rtc_config = RTCConfiguration {
            ice_servers,
            peer_identity: config.peer_identity.clone(),
            ..Default::default()
        };

        let peer_connection = api
            .new_peer_connection(rtc_config)
            .await
            .map_err(|e| peer_error("failed to create peer connection", e))?;

        info!("Created peer connection");
        Ok(Arc::new(WebRtcTransport {
            peer_connection: Arc::new(peer_connection),
            ice_gathering_timeout: config.ice_gathering_timeout,
        }))
    }
}

/// Answering-side peer connection
pub struct WebRtcTransport {
    peer_connection: Arc<RTCPeerConnection>,
    ice_gathering_timeout: Duration,
}

impl WebRtcTransport {
    /// Underlying connection, for callers needing stats or extra handlers
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

fn map_ice_state(state: RTCIceConnectionState) -> TransportState {
    match state {
        RTCIceConnectionState::New => TransportState::New,
        RTCIceConnectionState::Checking => TransportState::Checking,
        RTCIceConnectionState::Connected => TransportState::Connected,
        RTCIceConnectionState::Completed => TransportState::Completed,
        RTCIceConnectionState::Disconnected => TransportState::Disconnected,
        RTCIceConnectionState::Failed => TransportState::Failed,
        RTCIceConnectionState::Closed => TransportState::Closed,
        _ => TransportState::Unknown,
    }
}

#[async_trait]
impl RtcpWriter for WebRtcTransport {
    async fn send_picture_loss_indication(&self, media_ssrc: u32) -> Result<(), ScreenRtcError> {
        self.peer_connection
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await
            .map(|_| ())
            .map_err(|e| ScreenRtcError::KeepaliveSend {
                ssrc: media_ssrc,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    fn on_state_change(&self, handler: StateHandler) {
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                handler(map_ice_state(state));
                Box::pin(async {})
            }));
    }

    fn on_track(&self, handler: Option<TrackHandler>) {
        match handler {
            Some(mut handler) => {
                self.peer_connection
                    .on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
                        debug!(
                            "Inbound track {} (ssrc {}, kind {})",
                            track.id(),
                            track.ssrc(),
                            track.kind()
                        );
                        handler(Arc::new(WebRtcTrack { track }));
                        Box::pin(async {})
                    }));
            }
            None => {
                self.peer_connection
                    .on_track(Box::new(|_, _, _| Box::pin(async {})));
            }
        }
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), ScreenRtcError> {
        let remote = match description.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(description.sdp),
            SdpType::Answer => RTCSessionDescription::answer(description.sdp),
            SdpType::Pranswer => RTCSessionDescription::pranswer(description.sdp),
            SdpType::Rollback => {
                return Err(ScreenRtcError::Negotiation {
                    reason: "rollback descriptions are not supported".to_string(),
                })
            }
        }
        .map_err(|e| negotiation_error("invalid remote description", e))?;

        self.peer_connection
            .set_remote_description(remote)
            .await
            .map_err(|e| negotiation_error("failed to set remote description", e))
    }

    async fn create_answer(&self) -> Result<SessionDescription, ScreenRtcError> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| negotiation_error("failed to create answer", e))?;

        let mut gather_complete = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| negotiation_error("failed to set local description", e))?;

        // The page does not trickle candidates, so wait for them to land in the SDP
        if tokio::time::timeout(self.ice_gathering_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            debug!(
                "ICE gathering not complete after {:?}, answering with partial candidates",
                self.ice_gathering_timeout
            );
        }

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| ScreenRtcError::Negotiation {
                reason: "no local description after setting answer".to_string(),
            })?;

        Ok(SessionDescription::answer(local.sdp))
    }

    async fn close(&self) -> Result<(), ScreenRtcError> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| ScreenRtcError::Release {
                resource: "peer connection".to_string(),
                reason: e.to_string(),
            })
    }
}

/// Inbound track read from a WebRTC receiver
pub struct WebRtcTrack {
    track: Arc<TrackRemote>,
}

#[async_trait]
impl InboundTrack for WebRtcTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn kind(&self) -> TrackKind {
        match self.track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            RTPCodecType::Video => TrackKind::Video,
            _ => TrackKind::Unknown,
        }
    }

    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    fn codec_mime_type(&self) -> String {
        self.track.codec().capability.mime_type
    }

    async fn read_packet(&self) -> Result<MediaPacket, ScreenRtcError> {
        let (packet, _attributes) =
            self.track
                .read_rtp()
                .await
                .map_err(|e| ScreenRtcError::TrackRead {
                    reason: e.to_string(),
                })?;

        Ok(MediaPacket {
            sequence_number: packet.header.sequence_number,
            timestamp: packet.header.timestamp,
            marker: packet.header.marker,
            payload: packet.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_state_mapping() {
        assert_eq!(
            map_ice_state(RTCIceConnectionState::Connected),
            TransportState::Connected
        );
        assert_eq!(
            map_ice_state(RTCIceConnectionState::Failed),
            TransportState::Failed
        );
        assert_eq!(
            map_ice_state(RTCIceConnectionState::Unspecified),
            TransportState::Unknown
        );
    }

    #[tokio::test]
    async fn test_garbage_offer_is_a_negotiation_failure() {
        let transport = WebRtcConnector::new()
            .connect(&PeerConfig::new("identity"))
            .await
            .unwrap();

        let err = transport
            .set_remote_description(SessionDescription::offer("not sdp"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "NEGOTIATION_FAILED");

        transport.close().await.unwrap();
    }
}
