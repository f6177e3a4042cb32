//! Resource guard stack for session teardown
//!
//! Every acquisition step pushes a release action. Unwinding runs the actions
//! in reverse acquisition order, each exactly once, and collects failures
//! instead of stopping at the first one. A fully acquired stack can be given
//! an explicit release order with [`ResourceStack::set_release_order`].

use crate::error::ScreenRtcError;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

type ReleaseFn = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), ScreenRtcError>> + Send>;

/// Default bound on a single release action
pub const DEFAULT_RELEASE_TIMEOUT: Duration = Duration::from_secs(5);

struct Guard {
    label: &'static str,
    release: ReleaseFn,
}

/// Ordered list of release actions for acquired resources
pub struct ResourceStack {
    guards: Vec<Guard>,
    release_timeout: Duration,
}

impl ResourceStack {
    /// Create an empty stack with the default per-release timeout
    pub fn new() -> Self {
        Self::with_release_timeout(DEFAULT_RELEASE_TIMEOUT)
    }

    /// Create an empty stack; each release action is bounded by `release_timeout`
    pub fn with_release_timeout(release_timeout: Duration) -> Self {
        Self {
            guards: Vec::new(),
            release_timeout,
        }
    }

    /// Register the release action of a freshly acquired resource
    pub fn push<F, Fut>(&mut self, label: &'static str, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ScreenRtcError>> + Send + 'static,
    {
        debug!("Acquired {}", label);
        self.guards.push(Guard {
            label,
            release: Box::new(move || Box::pin(release())),
        });
    }

    /// Number of resources still held
    pub fn len(&self) -> usize {
        self.guards.len()
    }

    /// Whether every resource has been released
    pub fn is_empty(&self) -> bool {
        self.guards.is_empty()
    }

    /// Labels of held resources in acquisition order
    pub fn labels(&self) -> Vec<&'static str> {
        self.guards.iter().map(|g| g.label).collect()
    }

    /// Release the labelled resources first, in the given order
    ///
    /// Unknown labels are ignored. Unlisted resources are released afterwards
    /// in reverse acquisition order.
    pub fn set_release_order(&mut self, order: &[&str]) {
        let mut listed = Vec::with_capacity(order.len());
        for label in order.iter().rev() {
            if let Some(pos) = self.guards.iter().position(|g| g.label == *label) {
                listed.push(self.guards.remove(pos));
            }
        }
        self.guards.extend(listed);
    }

    /// Move every guard out, leaving this stack empty
    pub fn take(&mut self) -> ResourceStack {
        ResourceStack {
            guards: std::mem::take(&mut self.guards),
            release_timeout: self.release_timeout,
        }
    }

    /// Release everything in reverse acquisition order, collecting failures
    pub async fn unwind(&mut self) -> Vec<ScreenRtcError> {
        let mut failures = Vec::new();
        if self.guards.is_empty() {
            return failures;
        }

        info!("Releasing {} resource(s)", self.guards.len());
        while let Some(guard) = self.guards.pop() {
            match tokio::time::timeout(self.release_timeout, (guard.release)()).await {
                Ok(Ok(())) => debug!("Released {}", guard.label),
                Ok(Err(e)) => {
                    warn!("Failed to release {}: {}", guard.label, e);
                    failures.push(e);
                }
                Err(_) => {
                    warn!("Releasing {} timed out", guard.label);
                    failures.push(ScreenRtcError::Release {
                        resource: guard.label.to_string(),
                        reason: format!("timed out after {:?}", self.release_timeout),
                    });
                }
            }
        }
        failures
    }
}

impl Default for ResourceStack {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ResourceStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceStack")
            .field("held", &self.labels())
            .field("release_timeout", &self.release_timeout)
            .finish()
    }
}

impl Drop for ResourceStack {
    fn drop(&mut self) {
        if self.guards.is_empty() {
            return;
        }
        // Dropped without an explicit unwind: release in the background if we can
        let mut remaining = self.take();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    remaining.unwind().await;
                });
            }
            Err(_) => {
                warn!(
                    "Dropping {} unreleased resource(s) outside a runtime",
                    remaining.guards.len()
                );
                remaining.guards.clear();
            }
        }
    }
}
