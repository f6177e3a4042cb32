//! In-process stand-ins for the browser, the page and the peer transport

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use screenrtc::{
    done_channel, CaptureSurface, DoneSignal, DoneTrigger, InboundTrack, MediaPacket,
    NotifyHandler, PeerConfig, PeerConnector, PeerTransport, RequestHandler, RtcpWriter,
    ScreenRtcError, SecureRandom, SessionBuilder, SessionDescription, SurfaceLauncher,
    SurfaceOptions, TrackKind, TransportState,
};
use screenrtc_core::{StateHandler, TrackHandler};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// SSRC of the first track the fake page sends
pub const FIRST_SSRC: u32 = 4242;

/// Offer SDP the fake transport refuses
pub const MALFORMED_SDP: &str = "malformed";

pub const KEEPALIVE: Duration = Duration::from_millis(20);

/// What the capture page does once `run` is evaluated
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub info: Vec<String>,
    pub errors: Vec<String>,
    pub offer: Option<String>,
    pub tracks: u32,
}

impl PageScript {
    /// A page that never answers
    pub fn silent() -> Self {
        Self::default()
    }

    /// A page that reports each message through `logErr`
    pub fn failing(messages: &[&str]) -> Self {
        Self {
            errors: messages.iter().map(|m| m.to_string()).collect(),
            ..Self::default()
        }
    }

    /// A page that offers and then sends `tracks` tracks
    pub fn offering(tracks: u32) -> Self {
        Self::offering_sdp("v=0 offer", tracks)
    }

    pub fn offering_sdp(sdp: &str, tracks: u32) -> Self {
        Self {
            offer: Some(sdp.to_string()),
            tracks,
            ..Self::default()
        }
    }
}

#[derive(Default)]
pub struct FakeTransport {
    pub remote: Mutex<Option<SessionDescription>>,
    pub plis: Mutex<Vec<u32>>,
    pub closes: AtomicUsize,
    pub handled_tracks: AtomicUsize,
    pub fail_close: AtomicBool,
    track_handler: Mutex<Option<TrackHandler>>,
    track_handler_cleared: AtomicBool,
    state_handler: Mutex<Option<StateHandler>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn emit_state(&self, state: TransportState) {
        if let Some(handler) = self.state_handler.lock().as_ref() {
            handler(state);
        }
    }

    /// Hand a track to the installed handler; false when none is installed
    pub fn deliver_track(&self, ssrc: u32) -> bool {
        let Some(mut handler) = self.track_handler.lock().take() else {
            return false;
        };
        self.track_handler_cleared.store(false, Ordering::SeqCst);
        self.handled_tracks.fetch_add(1, Ordering::SeqCst);

        handler(Arc::new(FakeTrack { ssrc }));

        if !self.track_handler_cleared.load(Ordering::SeqCst) {
            let mut slot = self.track_handler.lock();
            if slot.is_none() {
                *slot = Some(handler);
            }
        }
        true
    }

    pub fn pli_count(&self) -> usize {
        self.plis.lock().len()
    }
}

#[async_trait]
impl RtcpWriter for FakeTransport {
    async fn send_picture_loss_indication(&self, media_ssrc: u32) -> Result<(), ScreenRtcError> {
        self.plis.lock().push(media_ssrc);
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    fn on_state_change(&self, handler: StateHandler) {
        *self.state_handler.lock() = Some(handler);
    }

    fn on_track(&self, handler: Option<TrackHandler>) {
        if handler.is_none() {
            self.track_handler_cleared.store(true, Ordering::SeqCst);
        }
        *self.track_handler.lock() = handler;
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), ScreenRtcError> {
        if description.sdp == MALFORMED_SDP {
            return Err(ScreenRtcError::Negotiation {
                reason: "unparseable offer".to_string(),
            });
        }
        *self.remote.lock() = Some(description);
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription, ScreenRtcError> {
        match self.remote.lock().as_ref() {
            Some(offer) => Ok(SessionDescription::answer(format!(
                "v=0 answer to {}",
                offer.sdp
            ))),
            None => Err(ScreenRtcError::Negotiation {
                reason: "no remote description".to_string(),
            }),
        }
    }

    async fn close(&self) -> Result<(), ScreenRtcError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(ScreenRtcError::Release {
                resource: "peer transport".to_string(),
                reason: "already failed".to_string(),
            });
        }
        Ok(())
    }
}

pub struct FakeTrack {
    ssrc: u32,
}

#[async_trait]
impl InboundTrack for FakeTrack {
    fn id(&self) -> String {
        format!("screen-{}", self.ssrc)
    }

    fn kind(&self) -> TrackKind {
        TrackKind::Video
    }

    fn ssrc(&self) -> u32 {
        self.ssrc
    }

    fn codec_mime_type(&self) -> String {
        "video/VP8".to_string()
    }

    async fn read_packet(&self) -> Result<MediaPacket, ScreenRtcError> {
        Err(ScreenRtcError::TrackRead {
            reason: "EOF".to_string(),
        })
    }
}

pub struct FakeConnector {
    pub transport: Arc<FakeTransport>,
    pub configs: Arc<Mutex<Vec<PeerConfig>>>,
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, config: &PeerConfig) -> Result<Arc<dyn PeerTransport>, ScreenRtcError> {
        self.configs.lock().push(config.clone());
        Ok(self.transport.clone())
    }
}

/// Browser window plus page, scripted by a [`PageScript`]
pub struct FakeSurface {
    script: PageScript,
    peer: Arc<FakeTransport>,
    this: Weak<FakeSurface>,
    notify: Mutex<HashMap<String, NotifyHandler>>,
    requests: Mutex<HashMap<String, RequestHandler>>,
    pub evaluated: Mutex<Vec<String>>,
    pub answers: Mutex<Vec<Value>>,
    pub closes: AtomicUsize,
    pub hang_close: AtomicBool,
    pub fail_eval: AtomicBool,
    trigger: DoneTrigger,
    done: DoneSignal,
}

impl FakeSurface {
    pub fn new(script: PageScript, peer: Arc<FakeTransport>) -> Arc<Self> {
        let (trigger, done) = done_channel();
        Arc::new_cyclic(|this| Self {
            script,
            peer,
            this: this.clone(),
            notify: Mutex::new(HashMap::new()),
            requests: Mutex::new(HashMap::new()),
            evaluated: Mutex::new(Vec::new()),
            answers: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            hang_close: AtomicBool::new(false),
            fail_eval: AtomicBool::new(false),
            trigger,
            done,
        })
    }

    /// The user closes the window
    pub fn close_window(&self) {
        self.trigger.fire();
    }

    pub fn bound_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.notify.lock().keys().cloned().collect();
        names.extend(self.requests.lock().keys().cloned());
        names.sort();
        names
    }

    async fn run_page(self: Arc<Self>) {
        let log_info = self.notify.lock().get("logInfo").cloned();
        if let Some(log_info) = log_info {
            for line in &self.script.info {
                log_info(line.clone());
            }
        }

        let log_err = self.notify.lock().get("logErr").cloned();
        if let Some(log_err) = log_err {
            for message in &self.script.errors {
                log_err(message.clone());
            }
        }

        let Some(sdp) = self.script.offer.clone() else {
            return;
        };
        let Some(get_answer) = self.requests.lock().get("getAnswer").cloned() else {
            return;
        };
        let answer = get_answer(json!({ "type": "offer", "sdp": sdp }))
            .await
            .unwrap_or(Value::Null);
        self.answers.lock().push(answer.clone());

        if !answer.is_null() {
            for i in 0..self.script.tracks {
                self.peer.deliver_track(FIRST_SSRC + i);
            }
        }
    }
}

#[async_trait]
impl CaptureSurface for FakeSurface {
    fn done(&self) -> DoneSignal {
        self.done.clone()
    }

    async fn bind_notify(&self, name: &str, handler: NotifyHandler) -> Result<(), ScreenRtcError> {
        self.notify.lock().insert(name.to_string(), handler);
        Ok(())
    }

    async fn bind_request(
        &self,
        name: &str,
        handler: RequestHandler,
    ) -> Result<(), ScreenRtcError> {
        self.requests.lock().insert(name.to_string(), handler);
        Ok(())
    }

    async fn eval(&self, expression: &str) -> Result<Value, ScreenRtcError> {
        self.evaluated.lock().push(expression.to_string());
        if self.fail_eval.load(Ordering::SeqCst) {
            return Err(ScreenRtcError::Script {
                reason: "run is not defined".to_string(),
            });
        }
        if expression.starts_with("run(") {
            if let Some(this) = self.this.upgrade() {
                tokio::spawn(this.run_page());
            }
        }
        Ok(Value::Null)
    }

    async fn close(&self) -> Result<(), ScreenRtcError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.hang_close.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.trigger.fire();
        Ok(())
    }
}

pub struct FakeLauncher {
    pub surface: Arc<FakeSurface>,
    pub urls: Arc<Mutex<Vec<String>>>,
    pub fail: bool,
}

#[async_trait]
impl SurfaceLauncher for FakeLauncher {
    async fn launch(
        &self,
        url: &str,
        _options: &SurfaceOptions,
    ) -> Result<Arc<dyn CaptureSurface>, ScreenRtcError> {
        self.urls.lock().push(url.to_string());
        if self.fail {
            return Err(ScreenRtcError::SurfaceLaunch {
                reason: "no browser".to_string(),
            });
        }
        Ok(self.surface.clone())
    }
}

pub struct ExhaustedRandom;

impl SecureRandom for ExhaustedRandom {
    fn fill(&self, _dest: &mut [u8]) -> Result<(), ScreenRtcError> {
        Err(ScreenRtcError::RandomSource {
            reason: "entropy exhausted".to_string(),
        })
    }
}

/// Everything a session test observes
pub struct Harness {
    pub transport: Arc<FakeTransport>,
    pub surface: Arc<FakeSurface>,
    pub urls: Arc<Mutex<Vec<String>>>,
    pub configs: Arc<Mutex<Vec<PeerConfig>>>,
    pub errors: Arc<Mutex<Vec<String>>>,
    pub logs: Arc<Mutex<Vec<String>>>,
    pub fail_launch: bool,
}

impl Harness {
    pub fn new(script: PageScript) -> Self {
        let transport = FakeTransport::new();
        let surface = FakeSurface::new(script, transport.clone());
        Self {
            transport,
            surface,
            urls: Arc::new(Mutex::new(Vec::new())),
            configs: Arc::new(Mutex::new(Vec::new())),
            errors: Arc::new(Mutex::new(Vec::new())),
            logs: Arc::new(Mutex::new(Vec::new())),
            fail_launch: false,
        }
    }

    /// Builder wired to the fakes, with short timings
    pub fn builder(&self) -> SessionBuilder {
        let errors = self.errors.clone();
        let logs = self.logs.clone();
        SessionBuilder::new()
            .launcher(FakeLauncher {
                surface: self.surface.clone(),
                urls: self.urls.clone(),
                fail: self.fail_launch,
            })
            .connector(FakeConnector {
                transport: self.transport.clone(),
                configs: self.configs.clone(),
            })
            .on_error(move |err: &ScreenRtcError| errors.lock().push(err.to_string()))
            .on_log(move |line: &str| logs.lock().push(line.to_string()))
            .keepalive_interval(KEEPALIVE)
            .start_timeout(Duration::from_secs(5))
            .close_timeout(Duration::from_millis(200))
    }

    pub fn logged(&self, needle: &str) -> bool {
        self.logs.lock().iter().any(|line| line.contains(needle))
    }

    pub fn closes(&self) -> (usize, usize) {
        (
            self.surface.closes.load(Ordering::SeqCst),
            self.transport.closes.load(Ordering::SeqCst),
        )
    }
}

/// Poll `check` until it holds or `within` elapses
pub async fn eventually(within: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Port of a capture page URL like `http://localhost:1234/segment`
pub fn port_of(url: &str) -> u16 {
    url.trim_start_matches("http://localhost:")
        .split('/')
        .next()
        .and_then(|port| port.parse().ok())
        .unwrap()
}

