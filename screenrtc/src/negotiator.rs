//! Peer transport setup and offer/answer exchange with the capture page

use crate::config::CaptureConfig;
use crate::slot::{error_slot, ErrorSlot};
use futures::FutureExt;
use screenrtc_core::{
    InboundTrack, PeerConfig, PeerConnector, PeerTransport, ScreenRtcError, SessionDescription,
    Sinks, TransportState,
};
use screenrtc_media::{CaptureTrack, KeepaliveDriver, KeepaliveHandle};
use screenrtc_surface::CaptureSurface;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info};

/// Operation named by the start timeout error
pub const START_OPERATION: &str = "screen record start";

/// Page function that reports a fatal capture error
pub const LOG_ERR_BINDING: &str = "logErr";
/// Page function that forwards diagnostics
pub const LOG_INFO_BINDING: &str = "logInfo";
/// Page function that trades an offer for an answer
pub const GET_ANSWER_BINDING: &str = "getAnswer";

/// Result of a successful negotiation
#[derive(Debug)]
pub struct NegotiatedTrack {
    /// The first inbound track
    pub track: Arc<CaptureTrack>,
    /// Keyframe requests running for that track
    pub keepalive: KeepaliveHandle,
}

/// Drives the page through offer/answer until a track arrives
pub struct TransportNegotiator {
    connector: Arc<dyn PeerConnector>,
    peer_identity: String,
    sinks: Sinks,
    trace: bool,
    start_timeout: Duration,
    keepalive_interval: Duration,
}

impl TransportNegotiator {
    /// Create a negotiator for one session
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        peer_identity: impl Into<String>,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            connector,
            peer_identity: peer_identity.into(),
            sinks: config.sinks(),
            trace: config.trace,
            start_timeout: config.effective_start_timeout(),
            keepalive_interval: config.keepalive_interval,
        }
    }

    /// Peer identity both sides are configured with
    pub fn peer_identity(&self) -> &str {
        &self.peer_identity
    }

    /// Create the local transport
    pub async fn connect(&self) -> Result<Arc<dyn PeerTransport>, ScreenRtcError> {
        let transport = self
            .connector
            .connect(&PeerConfig::new(&self.peer_identity))
            .await?;

        if self.sinks.logging_enabled() {
            let sinks = self.sinks.clone();
            transport.on_state_change(Box::new(move |state: TransportState| {
                sinks.log(format!("RTC server state change: {}", state));
            }));
        }

        Ok(transport)
    }

    /// Run the capture script and wait for the first track
    ///
    /// Whichever happens first decides the outcome: a track arrives, the page
    /// or the answer path reports an error, or the start timeout elapses.
    /// On any failure the track handler is removed from the transport.
    pub async fn negotiate(
        &self,
        transport: &Arc<dyn PeerTransport>,
        surface: &Arc<dyn CaptureSurface>,
    ) -> Result<NegotiatedTrack, ScreenRtcError> {
        let (track_tx, track_rx) = oneshot::channel();
        self.install_track_handler(transport, track_tx);

        let outcome = self.await_track(transport, surface, track_rx).await;
        if outcome.is_err() {
            transport.on_track(None);
        }
        outcome
    }

    async fn await_track(
        &self,
        transport: &Arc<dyn PeerTransport>,
        surface: &Arc<dyn CaptureSurface>,
        track_rx: oneshot::Receiver<NegotiatedTrack>,
    ) -> Result<NegotiatedTrack, ScreenRtcError> {
        let (slot, mut errors) = error_slot();
        self.bind_page_functions(transport, surface, slot).await?;

        self.sinks.log(format!(
            "Running with peer identity '{}'",
            self.peer_identity
        ));
        surface
            .eval(&format!("run('{}')", self.peer_identity))
            .await?;

        let timeout = self.start_timeout;
        tokio::select! {
            Some(err) = errors.recv() => Err(err),
            track = track_rx => track.map_err(|_| ScreenRtcError::PeerConnection {
                reason: "transport closed before a track arrived".to_string(),
            }),
            _ = tokio::time::sleep(timeout) => Err(ScreenRtcError::Timeout {
                operation: START_OPERATION.to_string(),
                duration: timeout,
            }),
        }
    }

    fn install_track_handler(
        &self,
        transport: &Arc<dyn PeerTransport>,
        track_tx: oneshot::Sender<NegotiatedTrack>,
    ) {
        let weak = Arc::downgrade(transport);
        let sinks = self.sinks.clone();
        let interval = self.keepalive_interval;
        let mut track_tx = Some(track_tx);

        transport.on_track(Some(Box::new(move |inbound: Arc<dyn InboundTrack>| {
            let Some(track_tx) = track_tx.take() else {
                debug!("Ignoring extra track {}", inbound.id());
                return;
            };
            let Some(transport) = weak.upgrade() else {
                return;
            };
            transport.on_track(None);

            let ssrc = inbound.ssrc();
            info!(
                "Got track {} (ssrc {}, {})",
                inbound.id(),
                ssrc,
                inbound.codec_mime_type()
            );
            let keepalive = KeepaliveDriver::start(transport, ssrc, interval, sinks.clone());
            let negotiated = NegotiatedTrack {
                track: Arc::new(CaptureTrack::new(inbound)),
                keepalive,
            };
            if track_tx.send(negotiated).is_err() {
                debug!("Track arrived after start finished, dropping it");
            }
        })));
    }

    async fn bind_page_functions(
        &self,
        transport: &Arc<dyn PeerTransport>,
        surface: &Arc<dyn CaptureSurface>,
        slot: ErrorSlot,
    ) -> Result<(), ScreenRtcError> {
        let sinks = self.sinks.clone();
        let err_slot = slot.clone();
        surface
            .bind_notify(
                LOG_ERR_BINDING,
                Arc::new(move |message: String| {
                    let err = ScreenRtcError::PageReported { message };
                    sinks.error(&err);
                    err_slot.offer(err);
                }),
            )
            .await?;

        let sinks = self.sinks.clone();
        surface
            .bind_notify(
                LOG_INFO_BINDING,
                Arc::new(move |message: String| sinks.log(message)),
            )
            .await?;

        let weak = Arc::downgrade(transport);
        let sinks = self.sinks.clone();
        let trace = self.trace;
        surface
            .bind_request(
                GET_ANSWER_BINDING,
                Arc::new(move |offer: Value| {
                    let weak = weak.clone();
                    let sinks = sinks.clone();
                    let slot = slot.clone();
                    async move {
                        match answer_offer(weak, offer, &sinks, trace).await {
                            Ok(answer) => Ok::<Value, String>(answer.to_json()),
                            Err(err) => {
                                debug!("Answer failed: {}", err);
                                slot.offer(err);
                                Ok(Value::Null)
                            }
                        }
                    }
                    .boxed()
                }),
            )
            .await?;

        Ok(())
    }
}

async fn answer_offer(
    transport: Weak<dyn PeerTransport>,
    offer: Value,
    sinks: &Sinks,
    trace: bool,
) -> Result<SessionDescription, ScreenRtcError> {
    let transport = transport
        .upgrade()
        .ok_or_else(|| ScreenRtcError::InvalidState {
            expected: "open transport".to_string(),
            actual: "closed".to_string(),
        })?;

    let offer = SessionDescription::from_json(offer)?;
    if trace {
        sinks.log(format!("Got offer: {}", offer.sdp));
    }
    transport.set_remote_description(offer).await?;

    let answer = transport.create_answer().await?;
    if trace {
        sinks.log(format!("Sending back ans: {}", answer.sdp));
    }
    Ok(answer)
}

impl std::fmt::Debug for TransportNegotiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportNegotiator")
            .field("peer_identity", &self.peer_identity)
            .field("trace", &self.trace)
            .field("start_timeout", &self.start_timeout)
            .finish()
    }
}
