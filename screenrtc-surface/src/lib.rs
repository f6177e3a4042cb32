//! # ScreenRTC Surface
//!
//! The capture surface is a browser window that loads the capture page,
//! exposes host functions to the page's script, evaluates script on request
//! and reports when it goes away.
//!
//! [`ChromeLauncher`] drives a locally installed Chrome or Chromium over the
//! DevTools protocol. Anything implementing [`SurfaceLauncher`] and
//! [`CaptureSurface`] can stand in for it.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod cdp;
pub mod chrome;
pub mod launcher;

use async_trait::async_trait;
use futures::future::BoxFuture;
use screenrtc_core::ScreenRtcError;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub use cdp::{CdpConnection, CdpEvent};
pub use chrome::{ChromeLauncher, ChromeSurface, PAGE_READY_EXPRESSION};
pub use launcher::{find_chrome_executable, BrowserProcess, CHROME_ENV_VAR};

/// Capture source Chrome picks without prompting
pub const DEFAULT_CAPTURE_SOURCE: &str = "Entire screen";

/// Page-callable function that takes a string and returns nothing
pub type NotifyHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Page-callable function returning a value (or an error message) to the page
pub type RequestHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Window and browser options for a capture surface
#[derive(Debug, Clone)]
pub struct SurfaceOptions {
    /// Window width in pixels
    pub width: u32,
    /// Window height in pixels
    pub height: u32,
    /// Capture source selected automatically; `None` shows the picker
    pub auto_select_source: Option<String>,
    /// Extra browser command line arguments
    pub extra_args: Vec<String>,
    /// Browser executable; discovered when unset
    pub executable: Option<PathBuf>,
    /// Bound on browser startup and page attachment
    pub launch_timeout: Duration,
}

impl Default for SurfaceOptions {
    fn default() -> Self {
        Self {
            width: 200,
            height: 200,
            auto_select_source: Some(DEFAULT_CAPTURE_SOURCE.to_string()),
            extra_args: Vec::new(),
            executable: None,
            launch_timeout: Duration::from_secs(30),
        }
    }
}

/// Completion signal of a surface; clones observe the same event
#[derive(Debug, Clone)]
pub struct DoneSignal {
    rx: watch::Receiver<bool>,
}

impl DoneSignal {
    /// Whether the surface has already closed
    pub fn is_done(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the surface closes
    ///
    /// Also returns if the owning surface was dropped without firing.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Firing side of a [`DoneSignal`]
#[derive(Debug, Clone)]
pub struct DoneTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl DoneTrigger {
    /// Fire the signal; returns `true` only for the first call
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    /// Whether the signal has fired
    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Create a connected trigger/signal pair
pub fn done_channel() -> (DoneTrigger, DoneSignal) {
    let (tx, rx) = watch::channel(false);
    (DoneTrigger { tx: Arc::new(tx) }, DoneSignal { rx })
}

/// A running capture surface
#[async_trait]
pub trait CaptureSurface: Send + Sync {
    /// Signal that fires once the surface has closed for any reason
    fn done(&self) -> DoneSignal;

    /// Expose a fire-and-forget function `name(string)` to the page
    async fn bind_notify(&self, name: &str, handler: NotifyHandler) -> Result<(), ScreenRtcError>;

    /// Expose a promise-returning function `name(value)` to the page
    async fn bind_request(&self, name: &str, handler: RequestHandler)
        -> Result<(), ScreenRtcError>;

    /// Evaluate an expression in the page and return its JSON value
    async fn eval(&self, expression: &str) -> Result<Value, ScreenRtcError>;

    /// Close the surface; later calls are no-ops
    async fn close(&self) -> Result<(), ScreenRtcError>;
}

/// Starts capture surfaces pointed at a page URL
#[async_trait]
pub trait SurfaceLauncher: Send + Sync {
    /// Launch a surface showing `url`
    async fn launch(
        &self,
        url: &str,
        options: &SurfaceOptions,
    ) -> Result<Arc<dyn CaptureSurface>, ScreenRtcError>;
}
