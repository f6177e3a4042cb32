//! Chrome DevTools protocol connection
//!
//! Requests carry sequential ids and are matched to responses through
//! oneshot channels. Everything without an id is an event and is broadcast
//! to subscribers.

use crate::{done_channel, DoneSignal, DoneTrigger};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use screenrtc_core::ScreenRtcError;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

/// Default bound on a single protocol call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

const EVENT_CAPACITY: usize = 256;

type Pending = Arc<DashMap<u64, oneshot::Sender<Result<Value, ScreenRtcError>>>>;

/// Protocol event
#[derive(Debug, Clone, Deserialize)]
pub struct CdpEvent {
    /// Event name, e.g. `Runtime.bindingCalled`
    pub method: String,
    /// Event parameters
    #[serde(default)]
    pub params: Value,
    /// Session the event belongs to; `None` for browser-level events
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Fault {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct Incoming {
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    params: Value,
    result: Option<Value>,
    error: Option<Fault>,
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Multiplexed connection to a browser's DevTools endpoint
pub struct CdpConnection {
    next_id: AtomicU64,
    pending: Pending,
    outgoing: mpsc::UnboundedSender<Message>,
    events: broadcast::Sender<CdpEvent>,
    closed: DoneSignal,
    trigger: DoneTrigger,
    call_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CdpConnection {
    /// Connect to a `ws://` DevTools URL
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>, ScreenRtcError> {
        let (stream, _) = tokio_tungstenite::connect_async(ws_url)
            .await
            .map_err(|e| ScreenRtcError::SurfaceLaunch {
                reason: format!("failed to connect to DevTools at {}: {}", ws_url, e),
            })?;
        debug!("Connected to DevTools at {}", ws_url);

        let (mut sink, mut source) = stream.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (trigger, closed) = done_channel();
        let pending: Pending = Arc::new(DashMap::new());

        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    debug!("DevTools write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader = {
            let pending = pending.clone();
            let events = events.clone();
            let trigger = trigger.clone();
            tokio::spawn(async move {
                while let Some(message) = source.next().await {
                    match message {
                        Ok(Message::Text(text)) => dispatch(&text, &pending, &events),
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(e) => {
                            debug!("DevTools read failed: {}", e);
                            break;
                        }
                    }
                }
                debug!("DevTools connection closed");
                trigger.fire();
                // Dropping the senders fails every outstanding call
                pending.clear();
            })
        };

        Ok(Arc::new(Self {
            next_id: AtomicU64::new(1),
            pending,
            outgoing,
            events,
            closed,
            trigger,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            tasks: Mutex::new(vec![reader, writer]),
        }))
    }

    /// Invoke a protocol method, optionally on an attached session
    pub async fn call(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value, ScreenRtcError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id, tx);

        if self.closed.is_done() {
            self.pending.remove(&id);
            return Err(ScreenRtcError::SurfaceClosed);
        }

        let mut request = json!({ "id": id, "method": method, "params": params });
        if let Some(session_id) = session_id {
            request["sessionId"] = Value::String(session_id.to_string());
        }
        trace!("DevTools -> {}", request);

        if self.outgoing.send(Message::Text(request.to_string().into())).is_err() {
            self.pending.remove(&id);
            return Err(ScreenRtcError::SurfaceClosed);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(result)) => result.map_err(|e| match e {
                ScreenRtcError::Cdp { reason, .. } => ScreenRtcError::Cdp {
                    method: method.to_string(),
                    reason,
                },
                other => other,
            }),
            Ok(Err(_)) => Err(ScreenRtcError::SurfaceClosed),
            Err(_) => {
                self.pending.remove(&id);
                Err(ScreenRtcError::Timeout {
                    operation: method.to_string(),
                    duration: self.call_timeout,
                })
            }
        }
    }

    /// Subscribe to protocol events received from now on
    pub fn subscribe(&self) -> broadcast::Receiver<CdpEvent> {
        self.events.subscribe()
    }

    /// Signal that fires when the connection drops
    pub fn closed(&self) -> DoneSignal {
        self.closed.clone()
    }

    /// Stop both connection tasks and fail outstanding calls
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.trigger.fire();
        self.pending.clear();
    }
}

impl Drop for CdpConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn dispatch(text: &str, pending: &Pending, events: &broadcast::Sender<CdpEvent>) {
    trace!("DevTools <- {}", text);
    let incoming: Incoming = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            warn!("Invalid DevTools message: {}", e);
            return;
        }
    };

    match incoming.id {
        Some(id) => {
            let Some((_, tx)) = pending.remove(&id) else {
                debug!("DevTools response for unknown call {}", id);
                return;
            };
            let outcome = match incoming.error {
                Some(fault) => Err(ScreenRtcError::Cdp {
                    method: String::new(),
                    reason: format!("{} ({})", fault.message, fault.code),
                }),
                None => Ok(incoming.result.unwrap_or(Value::Null)),
            };
            let _ = tx.send(outcome);
        }
        None => {
            if let Some(method) = incoming.method {
                // No subscribers is fine
                let _ = events.send(CdpEvent {
                    method,
                    params: incoming.params,
                    session_id: incoming.session_id,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_routes_responses_and_events() {
        let pending: Pending = Arc::new(DashMap::new());
        let (events, mut rx) = broadcast::channel(4);

        let (tx, mut reply) = oneshot::channel();
        pending.insert(1, tx);
        dispatch(r#"{"id":1,"result":{"ok":true}}"#, &pending, &events);
        assert_eq!(reply.try_recv().unwrap().unwrap()["ok"], true);
        assert!(pending.is_empty());

        dispatch(
            r#"{"method":"Runtime.bindingCalled","params":{"name":"x"},"sessionId":"S"}"#,
            &pending,
            &events,
        );
        let event = rx.try_recv().unwrap();
        assert_eq!(event.method, "Runtime.bindingCalled");
        assert_eq!(event.session_id.as_deref(), Some("S"));
    }

    #[test]
    fn test_dispatch_maps_protocol_errors() {
        let pending: Pending = Arc::new(DashMap::new());
        let (events, _) = broadcast::channel(4);

        let (tx, mut reply) = oneshot::channel();
        pending.insert(9, tx);
        dispatch(
            r#"{"id":9,"error":{"code":-32601,"message":"method not found"}}"#,
            &pending,
            &events,
        );
        let err = reply.try_recv().unwrap().unwrap_err();
        assert_eq!(err.error_code(), "CDP_ERROR");
        assert!(err.to_string().contains("method not found"));
    }
}
