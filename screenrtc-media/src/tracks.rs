//! Captured screen track

use screenrtc_core::{InboundTrack, MediaPacket, ScreenRtcError, TrackKind};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Packet counters for a captured track
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackStats {
    /// Packets read
    pub packets_received: u64,
    /// Payload bytes read
    pub bytes_received: u64,
}

/// The inbound screen track of a capture session
pub struct CaptureTrack {
    inner: Arc<dyn InboundTrack>,
    packets: AtomicU64,
    bytes: AtomicU64,
}

impl CaptureTrack {
    /// Wrap a negotiated inbound track
    pub fn new(inner: Arc<dyn InboundTrack>) -> Self {
        Self {
            inner,
            packets: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// Track id chosen by the page
    pub fn id(&self) -> String {
        self.inner.id()
    }

    /// Media kind
    pub fn kind(&self) -> TrackKind {
        self.inner.kind()
    }

    /// Sender SSRC
    pub fn ssrc(&self) -> u32 {
        self.inner.ssrc()
    }

    /// Negotiated codec, e.g. `video/VP8`
    pub fn codec_mime_type(&self) -> String {
        self.inner.codec_mime_type()
    }

    /// Read the next RTP packet
    ///
    /// Fails once the session's transport is closed.
    pub async fn next_packet(&self) -> Result<MediaPacket, ScreenRtcError> {
        let packet = self.inner.read_packet().await?;
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);
        Ok(packet)
    }

    /// Counters since the track was negotiated
    pub fn stats(&self) -> TrackStats {
        TrackStats {
            packets_received: self.packets.load(Ordering::Relaxed),
            bytes_received: self.bytes.load(Ordering::Relaxed),
        }
    }

    /// Underlying transport track
    pub fn inner(&self) -> &Arc<dyn InboundTrack> {
        &self.inner
    }
}

impl fmt::Debug for CaptureTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureTrack")
            .field("id", &self.id())
            .field("ssrc", &self.ssrc())
            .field("stats", &self.stats())
            .finish()
    }
}
