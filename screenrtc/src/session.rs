//! Capture session lifecycle

use crate::config::CaptureConfig;
use crate::negotiator::{NegotiatedTrack, TransportNegotiator};
use parking_lot::Mutex;
use screenrtc_core::{
    random_token, CloseError, ErrorSink, LogSink, OsSecureRandom, PeerConnector, ResourceStack,
    ScreenRtcError, SecureRandom, WebRtcConnector, TOKEN_LENGTH,
};
use screenrtc_media::CaptureTrack;
use screenrtc_signaling::{EndpointServer, CAPTURE_PAGE};
use screenrtc_surface::{ChromeLauncher, DoneSignal, SurfaceLauncher, SurfaceOptions};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const ENDPOINT_SERVER: &str = "endpoint server";
const CAPTURE_SURFACE: &str = "capture surface";
const PEER_TRANSPORT: &str = "peer transport";
const KEEPALIVE: &str = "keepalive";

/// Order in which an open session releases its resources
const CLOSE_ORDER: [&str; 4] = [KEEPALIVE, CAPTURE_SURFACE, ENDPOINT_SERVER, PEER_TRANSPORT];

/// Fluent builder for a capture session
pub struct SessionBuilder {
    config: CaptureConfig,
    launcher: Arc<dyn SurfaceLauncher>,
    connector: Arc<dyn PeerConnector>,
    random: Arc<dyn SecureRandom>,
}

impl SessionBuilder {
    /// Builder with default configuration, Chrome and WebRTC
    pub fn new() -> Self {
        Self::with_config(CaptureConfig::default())
    }

    /// Builder starting from an explicit configuration
    pub fn with_config(config: CaptureConfig) -> Self {
        Self {
            config,
            launcher: Arc::new(ChromeLauncher::new()),
            connector: Arc::new(WebRtcConnector::new()),
            random: Arc::new(OsSecureRandom),
        }
    }

    /// Receive advisory errors
    pub fn on_error<F>(mut self, sink: F) -> Self
    where
        F: Fn(&ScreenRtcError) + Send + Sync + 'static,
    {
        self.config.on_err = Some(Arc::new(sink) as ErrorSink);
        self
    }

    /// Receive diagnostic log lines
    pub fn on_log<F>(mut self, sink: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.config.on_log = Some(Arc::new(sink) as LogSink);
        self
    }

    /// Bound the wait for the captured track
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.config.start_timeout = timeout;
        self
    }

    /// Log offer and answer SDP
    pub fn trace(mut self, enabled: bool) -> Self {
        self.config.trace = enabled;
        self
    }

    /// Set the keyframe request interval
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.config.keepalive_interval = interval;
        self
    }

    /// Replace the capture window options
    pub fn surface_options(mut self, options: SurfaceOptions) -> Self {
        self.config.surface = options;
        self
    }

    /// Set the capture window size
    pub fn window_size(mut self, width: u32, height: u32) -> Self {
        self.config.surface.width = width;
        self.config.surface.height = height;
        self
    }

    /// Bound each resource release during close
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Use a different capture surface implementation
    pub fn launcher(mut self, launcher: impl SurfaceLauncher + 'static) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    /// Use a different peer transport implementation
    pub fn connector(mut self, connector: impl PeerConnector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Use a different source for the identity and URL tokens
    pub fn random_source(mut self, random: impl SecureRandom + 'static) -> Self {
        self.random = Arc::new(random);
        self
    }

    /// Current configuration
    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Acquire every resource and wait for the captured track
    ///
    /// On failure everything acquired so far is released in reverse
    /// acquisition order before the error is returned.
    pub async fn start(self) -> Result<CaptureSession, ScreenRtcError> {
        let mut resources = ResourceStack::with_release_timeout(self.config.close_timeout);

        match self.acquire(&mut resources).await {
            Ok(parts) => {
                resources.set_release_order(&CLOSE_ORDER);
                Ok(CaptureSession {
                    peer_identity: parts.peer_identity,
                    url: parts.url,
                    track: parts.track,
                    done: parts.done,
                    resources: Mutex::new(resources),
                })
            }
            Err(err) => {
                debug!("Start failed, releasing {:?}", resources.labels());
                for failure in resources.unwind().await {
                    debug!("Release after failed start: {}", failure);
                }
                Err(err)
            }
        }
    }

    async fn acquire(&self, resources: &mut ResourceStack) -> Result<Acquired, ScreenRtcError> {
        let sinks = self.config.sinks();
        let peer_identity = random_token(self.random.as_ref(), TOKEN_LENGTH)?;

        let mut endpoint = EndpointServer::new(CAPTURE_PAGE);
        let url = endpoint.start(self.random.as_ref()).await?;
        resources.push(ENDPOINT_SERVER, move || async move {
            let mut endpoint = endpoint;
            endpoint.close().await
        });
        sinks.log(format!("Started local web server for {}", url));

        sinks.log("Starting Chrome");
        let surface = self.launcher.launch(&url, &self.config.surface).await?;
        let release = surface.clone();
        resources.push(CAPTURE_SURFACE, move || async move { release.close().await });

        sinks.log("Starting track");
        let negotiator =
            TransportNegotiator::new(self.connector.clone(), peer_identity.clone(), &self.config);
        let transport = negotiator.connect().await?;
        let release = transport.clone();
        resources.push(PEER_TRANSPORT, move || async move { release.close().await });

        let NegotiatedTrack {
            track,
            mut keepalive,
        } = negotiator.negotiate(&transport, &surface).await?;
        resources.push(KEEPALIVE, move || async move {
            keepalive.stop().await;
            Ok(())
        });
        sinks.log("Track started");

        Ok(Acquired {
            peer_identity,
            url,
            track,
            done: surface.done(),
        })
    }
}

impl Default for SessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .finish()
    }
}

struct Acquired {
    peer_identity: String,
    url: String,
    track: Arc<CaptureTrack>,
    done: DoneSignal,
}

/// A running screen capture
///
/// Dropping the session without calling [`CaptureSession::close`] releases
/// its resources in the background.
pub struct CaptureSession {
    peer_identity: String,
    url: String,
    track: Arc<CaptureTrack>,
    done: DoneSignal,
    resources: Mutex<ResourceStack>,
}

impl CaptureSession {
    /// Start a session with the default surface and transport
    pub async fn start(config: CaptureConfig) -> Result<Self, ScreenRtcError> {
        SessionBuilder::with_config(config).start().await
    }

    /// Fluent entry point
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// The captured screen track
    pub fn track(&self) -> &Arc<CaptureTrack> {
        &self.track
    }

    /// Fires once the capture window goes away
    pub fn done(&self) -> DoneSignal {
        self.done.clone()
    }

    /// Identity shared by the page and local transports
    pub fn peer_identity(&self) -> &str {
        &self.peer_identity
    }

    /// Capture page URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether resources are still held
    pub fn is_open(&self) -> bool {
        !self.resources.lock().is_empty()
    }

    /// Release everything held by the session
    ///
    /// Keyframe requests stop first, then the capture surface, the endpoint
    /// server and the peer transport close in that order. Every release runs
    /// even when earlier ones fail, and failures are reported in release
    /// order. Calling close again is a no-op.
    pub async fn close(&self) -> Result<(), CloseError> {
        let mut resources = self.resources.lock().take();
        if resources.is_empty() {
            return Ok(());
        }

        info!("Closing capture session");
        CloseError::check(resources.unwind().await)
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("url", &self.url)
            .field("track", &self.track)
            .field("done", &self.done.is_done())
            .finish()
    }
}
