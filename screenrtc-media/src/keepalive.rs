//! Periodic picture loss indications for the captured track
//!
//! Browsers send a keyframe at the start of a screen share and then mostly
//! deltas. Asking for a refresh on a fixed cadence bounds how long a consumer
//! that joined late, or lost a packet, waits for a decodable frame.

use screenrtc_core::{RtcpWriter, Sinks};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Default spacing between refresh requests
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3);

/// Keepalive counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepaliveStats {
    /// Requests written successfully
    pub sent: u64,
    /// Requests that failed to write
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    failed: AtomicU64,
}

/// Starts keepalive loops
pub struct KeepaliveDriver;

impl KeepaliveDriver {
    /// Start requesting refreshes for `ssrc` every `interval`
    ///
    /// The first request goes out one interval after start. Failed writes are
    /// reported to `sinks` and do not stop the loop. A zero `interval` means
    /// [`DEFAULT_KEEPALIVE_INTERVAL`].
    pub fn start<W>(writer: Arc<W>, ssrc: u32, interval: Duration, sinks: Sinks) -> KeepaliveHandle
    where
        W: RtcpWriter + ?Sized + 'static,
    {
        let interval = if interval.is_zero() {
            DEFAULT_KEEPALIVE_INTERVAL
        } else {
            interval
        };
        let counters = Arc::new(Counters::default());
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();

        let task_counters = counters.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut cancel_rx => break,
                    _ = ticker.tick() => {
                        let outcome = tokio::select! {
                            biased;
                            _ = &mut cancel_rx => break,
                            outcome = writer.send_picture_loss_indication(ssrc) => outcome,
                        };
                        match outcome {
                            Ok(()) => {
                                task_counters.sent.fetch_add(1, Ordering::Relaxed);
                                trace!("Requested refresh for SSRC {}", ssrc);
                            }
                            Err(e) => {
                                task_counters.failed.fetch_add(1, Ordering::Relaxed);
                                sinks.error(&e);
                            }
                        }
                    }
                }
            }
            debug!("Keepalive for SSRC {} stopped", ssrc);
        });

        debug!("Keepalive for SSRC {} every {:?}", ssrc, interval);
        KeepaliveHandle {
            ssrc,
            interval,
            counters,
            cancel: Some(cancel_tx),
            task: Some(task),
        }
    }
}

/// Owner of a running keepalive loop; dropping it cancels the loop
pub struct KeepaliveHandle {
    ssrc: u32,
    interval: Duration,
    counters: Arc<Counters>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl KeepaliveHandle {
    /// SSRC the loop targets
    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Spacing between requests
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current counters
    pub fn stats(&self) -> KeepaliveStats {
        KeepaliveStats {
            sent: self.counters.sent.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Whether the loop is still scheduled
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Cancel the loop and wait for it to exit
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!("Keepalive for SSRC {} panicked", self.ssrc);
                }
            }
        }
    }
}

impl Drop for KeepaliveHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

impl std::fmt::Debug for KeepaliveHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeepaliveHandle")
            .field("ssrc", &self.ssrc)
            .field("interval", &self.interval)
            .field("stats", &self.stats())
            .field("running", &self.is_running())
            .finish()
    }
}
