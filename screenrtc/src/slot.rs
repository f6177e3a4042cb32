//! Single-slot error channel used while a session starts

use screenrtc_core::ScreenRtcError;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

/// Producer side; cloned into every callback that can fail negotiation
#[derive(Debug, Clone)]
pub struct ErrorSlot {
    tx: mpsc::Sender<ScreenRtcError>,
}

/// Create a slot holding at most one pending error
pub fn error_slot() -> (ErrorSlot, mpsc::Receiver<ScreenRtcError>) {
    let (tx, rx) = mpsc::channel(1);
    (ErrorSlot { tx }, rx)
}

impl ErrorSlot {
    /// Offer an error without blocking
    ///
    /// Returns whether it was enqueued. When the slot is occupied, or nobody
    /// is waiting any more, the error is dropped.
    pub fn offer(&self, err: ScreenRtcError) -> bool {
        match self.tx.try_send(err) {
            Ok(()) => true,
            Err(TrySendError::Full(err)) => {
                debug!("Error slot occupied, dropping: {}", err);
                false
            }
            Err(TrySendError::Closed(err)) => {
                debug!("Start already finished, dropping: {}", err);
                false
            }
        }
    }
}
