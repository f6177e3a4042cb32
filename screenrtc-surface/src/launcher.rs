//! Browser discovery and process management

use crate::{done_channel, DoneSignal, SurfaceOptions};
use screenrtc_core::ScreenRtcError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// Environment variable naming the browser executable
pub const CHROME_ENV_VAR: &str = "SCREENRTC_CHROME";

const DEVTOOLS_PREFIX: &str = "DevTools listening on ";

/// Flags keeping an automated app window quiet and self-contained
const AUTOMATION_ARGS: &[&str] = &[
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-client-side-phishing-detection",
    "--disable-default-apps",
    "--disable-dev-shm-usage",
    "--disable-infobars",
    "--disable-extensions",
    "--disable-features=site-per-process",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-popup-blocking",
    "--disable-prompt-on-repost",
    "--disable-renderer-backgrounding",
    "--disable-sync",
    "--disable-translate",
    "--metrics-recording-only",
    "--no-first-run",
    "--no-default-browser-check",
    "--safebrowsing-disable-auto-update",
    "--enable-automation",
    "--password-store=basic",
    "--use-mock-keychain",
];

fn platform_candidates() -> Vec<String> {
    if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    } else if cfg!(target_os = "windows") {
        let mut candidates = Vec::new();
        for key in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Ok(root) = std::env::var(key) {
                let mut path = PathBuf::from(root);
                path.push("Google");
                path.push("Chrome");
                path.push("Application");
                path.push("chrome.exe");
                candidates.push(path.to_string_lossy().to_string());
            }
        }
        candidates.extend(["chrome.exe".to_string(), "chromium.exe".to_string()]);
        candidates
    } else {
        vec![
            "google-chrome-stable",
            "google-chrome",
            "chromium-browser",
            "chromium",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/bin/chromium-browser",
            "/usr/bin/chromium",
            "/snap/bin/chromium",
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }
}

fn resolve(candidate: &str) -> Option<PathBuf> {
    let path = Path::new(candidate);
    if path.is_absolute() || candidate.contains(std::path::MAIN_SEPARATOR) {
        path.exists().then(|| path.to_path_buf())
    } else {
        which::which(candidate).ok()
    }
}

/// Locate a Chrome or Chromium executable
///
/// Checks the explicit path, then [`CHROME_ENV_VAR`], then well-known
/// install locations and `PATH`.
pub fn find_chrome_executable(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    if let Ok(value) = std::env::var(CHROME_ENV_VAR) {
        if !value.is_empty() {
            return resolve(&value);
        }
    }

    platform_candidates().iter().find_map(|c| resolve(c))
}

/// Command line for an app-mode window showing `url`
pub fn launch_args(url: &str, options: &SurfaceOptions, profile_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--app={}", url),
        format!("--user-data-dir={}", profile_dir.display()),
        format!("--window-size={},{}", options.width, options.height),
        "--remote-debugging-port=0".to_string(),
    ];
    args.extend(AUTOMATION_ARGS.iter().map(|a| a.to_string()));
    if let Some(source) = &options.auto_select_source {
        args.push(format!("--auto-select-desktop-capture-source={}", source));
    }
    args.extend(options.extra_args.iter().cloned());
    args
}

/// Extract the DevTools websocket URL from a browser stderr line
pub fn parse_devtools_url(line: &str) -> Option<String> {
    let url = line.trim().strip_prefix(DEVTOOLS_PREFIX)?;
    url.starts_with("ws://").then(|| url.to_string())
}

/// A running browser process with its throwaway profile
pub struct BrowserProcess {
    pid: Option<u32>,
    kill: Option<oneshot::Sender<()>>,
    exited: DoneSignal,
    profile: Option<TempDir>,
}

impl BrowserProcess {
    /// Spawn the browser and wait for its DevTools URL
    ///
    /// Returns the process handle and the browser-level websocket URL.
    pub async fn spawn(
        executable: &Path,
        args: &[String],
        profile: TempDir,
        launch_timeout: Duration,
    ) -> Result<(Self, String), ScreenRtcError> {
        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScreenRtcError::SurfaceLaunch {
                reason: format!("failed to launch {}: {}", executable.display(), e),
            })?;

        let pid = child.id();
        info!("Launched {} (pid {:?})", executable.display(), pid);

        let Some(stderr) = child.stderr.take() else {
            return Err(ScreenRtcError::SurfaceLaunch {
                reason: "browser stderr was not captured".to_string(),
            });
        };
        let mut lines = BufReader::new(stderr).lines();

        let ws_url = match tokio::time::timeout(launch_timeout, read_devtools_url(&mut lines)).await
        {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(ScreenRtcError::Timeout {
                    operation: "browser DevTools endpoint".to_string(),
                    duration: launch_timeout,
                })
            }
        };
        debug!("Browser DevTools endpoint {}", ws_url);

        // Keep draining so the browser never blocks on a full pipe
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                trace!("browser: {}", line);
            }
        });

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (trigger, exited) = done_channel();
        tokio::spawn(async move {
            tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => info!("Browser exited with {}", status),
                    Err(e) => warn!("Failed to wait for browser: {}", e),
                },
                _ = kill_rx => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill browser: {}", e);
                    }
                }
            }
            trigger.fire();
        });

        Ok((
            Self {
                pid,
                kill: Some(kill_tx),
                exited,
                profile: Some(profile),
            },
            ws_url,
        ))
    }

    /// OS process id, if still known
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Signal that fires when the process exits
    pub fn exited(&self) -> DoneSignal {
        self.exited.clone()
    }

    /// Wait `grace` for a voluntary exit, then kill and remove the profile
    pub async fn terminate(&mut self, grace: Duration) -> Result<(), ScreenRtcError> {
        if tokio::time::timeout(grace, self.exited.wait()).await.is_err() {
            debug!("Browser still running after {:?}, killing", grace);
            if let Some(kill) = self.kill.take() {
                let _ = kill.send(());
            }
            if tokio::time::timeout(grace, self.exited.wait()).await.is_err() {
                return Err(ScreenRtcError::Release {
                    resource: "capture surface".to_string(),
                    reason: format!("browser pid {:?} did not exit", self.pid),
                });
            }
        }

        if let Some(profile) = self.profile.take() {
            if let Err(e) = profile.close() {
                debug!("Failed to remove browser profile: {}", e);
            }
        }
        Ok(())
    }
}

impl Drop for BrowserProcess {
    fn drop(&mut self) {
        if let Some(kill) = self.kill.take() {
            let _ = kill.send(());
        }
    }
}

async fn read_devtools_url(
    lines: &mut tokio::io::Lines<BufReader<ChildStderr>>,
) -> Result<String, ScreenRtcError> {
    while let Some(line) = lines.next_line().await? {
        trace!("browser: {}", line);
        if let Some(url) = parse_devtools_url(&line) {
            return Ok(url);
        }
    }
    Err(ScreenRtcError::SurfaceLaunch {
        reason: "browser exited before opening a DevTools endpoint".to_string(),
    })
}
