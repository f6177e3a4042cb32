//! Ephemeral endpoint server implementation

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use screenrtc_core::{random_token, ScreenRtcError, SecureRandom, TOKEN_LENGTH};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How long `close` waits for in-flight requests before aborting the server
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct PageState {
    /// Exact `Host` header value the page is served for
    host: Arc<str>,
    body: Bytes,
}

struct Running {
    addr: SocketAddr,
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

/// Loopback HTTP server exposing one page under a random path
pub struct EndpointServer {
    page: Bytes,
    shutdown_timeout: Duration,
    running: Option<Running>,
}

impl EndpointServer {
    /// Create a server for the given page body
    pub fn new(page: impl Into<Bytes>) -> Self {
        Self {
            page: page.into(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            running: None,
        }
    }

    /// Bound the graceful part of `close`
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Bind an ephemeral loopback port and start serving
    ///
    /// Returns the page URL, `http://localhost:<port>/<segment>`. The segment
    /// is drawn before binding, so a failing random source leaves nothing to
    /// release.
    pub async fn start(&mut self, rng: &dyn SecureRandom) -> Result<String, ScreenRtcError> {
        if self.running.is_some() {
            return Err(ScreenRtcError::InvalidState {
                expected: "stopped endpoint server".to_string(),
                actual: "running endpoint server".to_string(),
            });
        }

        let segment = random_token(rng, TOKEN_LENGTH)?;

        let bind_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ScreenRtcError::EndpointBind {
                address: bind_addr,
                source,
            })?;
        let addr = listener.local_addr()?;

        let host = format!("localhost:{}", addr.port());
        let url = format!("http://{}/{}", host, segment);
        let app = page_router(
            &segment,
            PageState {
                host: host.into(),
                body: self.page.clone(),
            },
        );

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!("Endpoint server error: {}", e);
            }
        });

        info!("Endpoint server listening on {}", addr);
        self.running = Some(Running {
            addr,
            url: url.clone(),
            shutdown: Some(shutdown_tx),
            task,
        });
        Ok(url)
    }

    /// Address of the bound listener, if started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Page URL, if started
    pub fn url(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.url.as_str())
    }

    /// Whether the server is accepting connections
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Stop accepting connections and release the port
    ///
    /// Open connections get `shutdown_timeout` to finish before the server
    /// task is aborted. Closing a server that never started, or closing
    /// twice, is a no-op.
    pub async fn close(&mut self) -> Result<(), ScreenRtcError> {
        let Some(mut running) = self.running.take() else {
            return Ok(());
        };

        if let Some(shutdown) = running.shutdown.take() {
            let _ = shutdown.send(());
        }

        match tokio::time::timeout(self.shutdown_timeout, &mut running.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_cancelled() => {}
            Ok(Err(e)) => {
                return Err(ScreenRtcError::Release {
                    resource: "endpoint server".to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                debug!(
                    "Endpoint server still busy after {:?}, aborting",
                    self.shutdown_timeout
                );
                running.task.abort();
                let _ = running.task.await;
            }
        }

        info!("Endpoint server on {} stopped", running.addr);
        Ok(())
    }
}

impl Drop for EndpointServer {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

fn page_router(segment: &str, state: PageState) -> Router {
    Router::new()
        .route(&format!("/{}", segment), get(serve_page).fallback(forbidden))
        .fallback(forbidden)
        .with_state(state)
}

async fn serve_page(State(state): State<PageState>, headers: HeaderMap) -> Response {
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    if host != Some(state.host.as_ref()) {
        warn!("Rejected page request with host {:?}", host);
        return StatusCode::FORBIDDEN.into_response();
    }

    debug!("Serving capture page");
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        state.body.clone(),
    )
        .into_response()
}

async fn forbidden() -> StatusCode {
    StatusCode::FORBIDDEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use screenrtc_core::OsSecureRandom;

    #[tokio::test]
    async fn test_url_shape() {
        let mut server = EndpointServer::new("<html></html>");
        let url = server.start(&OsSecureRandom).await.unwrap();
        let port = server.local_addr().unwrap().port();

        let prefix = format!("http://localhost:{}/", port);
        assert!(url.starts_with(&prefix));
        assert_eq!(url.len(), prefix.len() + TOKEN_LENGTH);
        assert_eq!(server.url(), Some(url.as_str()));

        server.close().await.unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_close_before_start_is_noop() {
        let mut server = EndpointServer::new("");
        server.close().await.unwrap();
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_double_start_is_rejected() {
        let mut server = EndpointServer::new("");
        server.start(&OsSecureRandom).await.unwrap();
        let err = server.start(&OsSecureRandom).await.unwrap_err();
        assert_eq!(err.error_code(), "INVALID_STATE");
        server.close().await.unwrap();
    }
}
