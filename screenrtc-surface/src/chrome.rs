//! Chrome-backed capture surface

use crate::bridge::{self, BindingCall, BindingKind, BINDING_NAME};
use crate::cdp::{CdpConnection, CdpEvent};
use crate::launcher::{find_chrome_executable, launch_args, BrowserProcess, CHROME_ENV_VAR};
use crate::{
    done_channel, CaptureSurface, DoneSignal, DoneTrigger, NotifyHandler, RequestHandler,
    SurfaceLauncher, SurfaceOptions,
};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use screenrtc_core::ScreenRtcError;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Grace period for each close step
const CLOSE_GRACE: Duration = Duration::from_secs(2);

const TARGET_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// True once the capture page script has run
pub const PAGE_READY_EXPRESSION: &str = "typeof run === 'function'";

#[derive(Clone)]
enum Binding {
    Notify(NotifyHandler),
    Request(RequestHandler),
}

/// Launches Chrome or Chromium as an app-mode capture window
#[derive(Debug, Default, Clone)]
pub struct ChromeLauncher {
    executable: Option<PathBuf>,
}

impl ChromeLauncher {
    /// Launcher that discovers the browser executable
    pub fn new() -> Self {
        Self::default()
    }

    /// Launcher using a specific executable
    pub fn with_executable(executable: impl Into<PathBuf>) -> Self {
        Self {
            executable: Some(executable.into()),
        }
    }
}

#[async_trait]
impl SurfaceLauncher for ChromeLauncher {
    async fn launch(
        &self,
        url: &str,
        options: &SurfaceOptions,
    ) -> Result<Arc<dyn CaptureSurface>, ScreenRtcError> {
        let explicit = options.executable.as_deref().or(self.executable.as_deref());
        let executable =
            find_chrome_executable(explicit).ok_or_else(|| ScreenRtcError::SurfaceLaunch {
                reason: format!(
                    "no Chrome or Chromium executable found; set {} to its path",
                    CHROME_ENV_VAR
                ),
            })?;

        let profile = tempfile::Builder::new()
            .prefix("screenrtc-profile-")
            .tempdir()
            .map_err(|e| ScreenRtcError::SurfaceLaunch {
                reason: format!("failed to create browser profile: {}", e),
            })?;
        let args = launch_args(url, options, profile.path());

        let (mut process, ws_url) =
            BrowserProcess::spawn(&executable, &args, profile, options.launch_timeout).await?;

        let cdp = match CdpConnection::connect(&ws_url).await {
            Ok(cdp) => cdp,
            Err(e) => {
                let _ = process.terminate(Duration::ZERO).await;
                return Err(e);
            }
        };

        let surface = ChromeSurface::attach(cdp, Some(process), url, options.launch_timeout).await?;
        Ok(Arc::new(surface))
    }
}

/// Capture surface driven over the DevTools protocol
pub struct ChromeSurface {
    cdp: Arc<CdpConnection>,
    session_id: String,
    bindings: Arc<DashMap<String, Binding>>,
    process: Mutex<Option<BrowserProcess>>,
    done: DoneSignal,
    trigger: DoneTrigger,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ChromeSurface {
    /// Attach to the page target showing `page_url` and enable the bridge
    ///
    /// Waits, within `timeout`, for a page target at `page_url` to appear
    /// and for its script to define `run`. On failure the connection and the
    /// process are released before the error is returned.
    pub async fn attach(
        cdp: Arc<CdpConnection>,
        process: Option<BrowserProcess>,
        page_url: &str,
        timeout: Duration,
    ) -> Result<Self, ScreenRtcError> {
        let exited = process.as_ref().map(BrowserProcess::exited);
        let (trigger, done) = done_channel();
        let deadline = tokio::time::Instant::now() + timeout;

        let session_id = match attach_to_page(&cdp, page_url, deadline, timeout).await {
            Ok(session_id) => session_id,
            Err(e) => {
                if let Some(mut process) = process {
                    let _ = process.terminate(Duration::ZERO).await;
                }
                cdp.shutdown();
                return Err(e);
            }
        };

        let bindings = Arc::new(DashMap::new());
        let dispatcher = tokio::spawn(dispatch_events(
            cdp.clone(),
            session_id.clone(),
            bindings.clone(),
            exited,
            trigger.clone(),
        ));

        let surface = Self {
            cdp,
            session_id,
            bindings,
            process: Mutex::new(process),
            done,
            trigger,
            dispatcher: Mutex::new(Some(dispatcher)),
            closed: AtomicBool::new(false),
        };

        if let Err(e) = surface.prepare_page(deadline, timeout).await {
            let _ = surface.close().await;
            return Err(e);
        }

        info!("Capture surface attached to {}", page_url);
        Ok(surface)
    }

    /// DevTools session id of the attached page
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn prepare_page(
        &self,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> Result<(), ScreenRtcError> {
        self.enable_domains().await?;
        self.wait_for_page(deadline, timeout).await
    }

    async fn enable_domains(&self) -> Result<(), ScreenRtcError> {
        self.page_call("Runtime.enable", json!({})).await?;
        self.page_call("Page.enable", json!({})).await?;
        self.page_call("Runtime.addBinding", json!({ "name": BINDING_NAME }))
            .await?;
        Ok(())
    }

    async fn wait_for_page(
        &self,
        deadline: tokio::time::Instant,
        timeout: Duration,
    ) -> Result<(), ScreenRtcError> {
        loop {
            match self.evaluate(PAGE_READY_EXPRESSION).await {
                Ok(Value::Bool(true)) => return Ok(()),
                Ok(_) => {}
                // No execution context yet while the document is loading
                Err(e) => debug!("Capture page not ready: {}", e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ScreenRtcError::Timeout {
                    operation: "capture page load".to_string(),
                    duration: timeout,
                });
            }
            tokio::time::sleep(TARGET_POLL_INTERVAL).await;
        }
    }

    async fn page_call(&self, method: &str, params: Value) -> Result<Value, ScreenRtcError> {
        self.cdp.call(method, params, Some(&self.session_id)).await
    }

    async fn install(&self, name: &str, binding: Binding) -> Result<(), ScreenRtcError> {
        bridge::validate_name(name)?;
        let kind = match binding {
            Binding::Notify(_) => BindingKind::Notify,
            Binding::Request(_) => BindingKind::Request,
        };
        self.bindings.insert(name.to_string(), binding);

        let script = bridge::binding_script(name, kind);
        let registration = |e: ScreenRtcError| ScreenRtcError::BridgeRegistration {
            name: name.to_string(),
            reason: e.to_string(),
        };

        // Survive reloads, and cover the document that is already loaded
        self.page_call(
            "Page.addScriptToEvaluateOnNewDocument",
            json!({ "source": script }),
        )
        .await
        .map_err(registration)?;
        self.evaluate(&script).await.map_err(registration)?;

        debug!("Bound {} ({:?})", name, kind);
        Ok(())
    }

    async fn evaluate(&self, expression: &str) -> Result<Value, ScreenRtcError> {
        let response = self
            .page_call(
                "Runtime.evaluate",
                json!({ "expression": expression, "returnByValue": true }),
            )
            .await?;
        evaluation_value(response)
    }
}

#[async_trait]
impl CaptureSurface for ChromeSurface {
    fn done(&self) -> DoneSignal {
        self.done.clone()
    }

    async fn bind_notify(&self, name: &str, handler: NotifyHandler) -> Result<(), ScreenRtcError> {
        self.install(name, Binding::Notify(handler)).await
    }

    async fn bind_request(
        &self,
        name: &str,
        handler: RequestHandler,
    ) -> Result<(), ScreenRtcError> {
        self.install(name, Binding::Request(handler)).await
    }

    async fn eval(&self, expression: &str) -> Result<Value, ScreenRtcError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScreenRtcError::SurfaceClosed);
        }
        self.evaluate(expression).await
    }

    async fn close(&self) -> Result<(), ScreenRtcError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }

        let process = self.process.lock().take();
        let mut result = Ok(());
        if let Some(mut process) = process {
            if !process.exited().is_done() {
                // Ask the browser to exit on its own first
                let _ = tokio::time::timeout(
                    CLOSE_GRACE,
                    self.cdp.call("Browser.close", json!({}), None),
                )
                .await;
            }
            result = process.terminate(CLOSE_GRACE).await;
        }

        self.cdp.shutdown();
        self.trigger.fire();
        info!("Capture surface closed");
        result
    }
}

impl Drop for ChromeSurface {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
        self.trigger.fire();
    }
}

fn evaluation_value(response: Value) -> Result<Value, ScreenRtcError> {
    if let Some(details) = response.get("exceptionDetails") {
        let reason = details
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("uncaught exception")
            .to_string();
        return Err(ScreenRtcError::Script { reason });
    }
    Ok(response
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}

async fn attach_to_page(
    cdp: &CdpConnection,
    page_url: &str,
    deadline: tokio::time::Instant,
    timeout: Duration,
) -> Result<String, ScreenRtcError> {
    let target_id = loop {
        let targets = cdp.call("Target.getTargets", json!({}), None).await?;
        if let Some(id) = pick_page_target(&targets, page_url) {
            break id;
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(ScreenRtcError::Timeout {
                operation: "capture page target".to_string(),
                duration: timeout,
            });
        }
        tokio::time::sleep(TARGET_POLL_INTERVAL).await;
    };

    let attached = cdp
        .call(
            "Target.attachToTarget",
            json!({ "targetId": target_id, "flatten": true }),
            None,
        )
        .await?;
    attached
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| ScreenRtcError::Cdp {
            method: "Target.attachToTarget".to_string(),
            reason: "response carried no sessionId".to_string(),
        })
}

/// The page target already showing `page_url`, if any
///
/// A fresh window reports `about:blank` until navigation commits.
fn pick_page_target(targets: &Value, page_url: &str) -> Option<String> {
    targets
        .get("targetInfos")?
        .as_array()?
        .iter()
        .filter(|info| info.get("type").and_then(Value::as_str) == Some("page"))
        .find(|info| {
            info.get("url")
                .and_then(Value::as_str)
                .is_some_and(|url| url.starts_with(page_url))
        })
        .and_then(|info| info.get("targetId"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

async fn dispatch_events(
    cdp: Arc<CdpConnection>,
    session_id: String,
    bindings: Arc<DashMap<String, Binding>>,
    exited: Option<DoneSignal>,
    trigger: DoneTrigger,
) {
    let mut events = cdp.subscribe();
    let cdp_closed = cdp.closed();
    let process_exited = async {
        match &exited {
            Some(exited) => exited.wait().await,
            None => futures::future::pending::<()>().await,
        }
    };
    tokio::pin!(process_exited);

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if !handle_event(&cdp, &session_id, &bindings, event) {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Dropped {} DevTools events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = cdp_closed.wait() => break,
            _ = &mut process_exited => break,
        }
    }

    if trigger.fire() {
        info!("Capture surface is gone");
    }
}

/// Returns `false` once the page is gone
fn handle_event(
    cdp: &Arc<CdpConnection>,
    session_id: &str,
    bindings: &DashMap<String, Binding>,
    event: CdpEvent,
) -> bool {
    match event.method.as_str() {
        "Target.detachedFromTarget" => {
            event.params.get("sessionId").and_then(Value::as_str) != Some(session_id)
        }
        "Inspector.detached" | "Target.targetCrashed" => {
            event.session_id.as_deref() != Some(session_id)
        }
        "Runtime.bindingCalled" => {
            if event.session_id.as_deref() != Some(session_id)
                || event.params.get("name").and_then(Value::as_str) != Some(BINDING_NAME)
            {
                return true;
            }
            let payload = event
                .params
                .get("payload")
                .and_then(Value::as_str)
                .unwrap_or_default();
            match BindingCall::parse(payload) {
                Ok(call) => invoke(cdp, session_id, bindings, call),
                Err(e) => warn!("Ignoring malformed bridge call: {}", e),
            }
            true
        }
        _ => true,
    }
}

fn invoke(
    cdp: &Arc<CdpConnection>,
    session_id: &str,
    bindings: &DashMap<String, Binding>,
    call: BindingCall,
) {
    let Some(binding) = bindings.get(&call.name).map(|b| b.value().clone()) else {
        debug!("Bridge call to unbound {}", call.name);
        return;
    };

    match binding {
        Binding::Notify(handler) => handler(call.first_arg_text()),
        Binding::Request(handler) => {
            let cdp = cdp.clone();
            let session_id = session_id.to_string();
            tokio::spawn(async move {
                let outcome = handler(call.first_arg()).await;
                let expression = bridge::settle_expression(call.seq, &outcome);
                if let Err(e) = cdp
                    .call(
                        "Runtime.evaluate",
                        json!({ "expression": expression }),
                        Some(&session_id),
                    )
                    .await
                {
                    debug!("Failed to settle {} #{}: {}", call.name, call.seq, e);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_page_target_matches_url_only() {
        let targets = json!({
            "targetInfos": [
                { "targetId": "B", "type": "browser", "url": "http://localhost:9/abc" },
                { "targetId": "P1", "type": "page", "url": "about:blank" },
                { "targetId": "P2", "type": "page", "url": "http://localhost:9/abc" },
            ]
        });
        assert_eq!(
            pick_page_target(&targets, "http://localhost:9/abc"),
            Some("P2".to_string())
        );
        assert_eq!(pick_page_target(&targets, "http://localhost:1/zzz"), None);
        assert_eq!(pick_page_target(&json!({ "targetInfos": [] }), "x"), None);
    }

    #[test]
    fn test_evaluation_value() {
        let ok = evaluation_value(json!({ "result": { "type": "number", "value": 3 } })).unwrap();
        assert_eq!(ok, json!(3));

        let undefined = evaluation_value(json!({ "result": { "type": "undefined" } })).unwrap();
        assert_eq!(undefined, Value::Null);

        let err = evaluation_value(json!({
            "result": { "type": "object" },
            "exceptionDetails": {
                "text": "Uncaught",
                "exception": { "description": "ReferenceError: run is not defined" }
            }
        }))
        .unwrap_err();
        assert_eq!(err.error_code(), "SCRIPT_ERROR");
        assert!(err.to_string().contains("run is not defined"));
    }
}
