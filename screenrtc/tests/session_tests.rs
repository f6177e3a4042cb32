//! Session start, failure unwinding and close, against in-process fakes

mod common;

use common::*;
use screenrtc::{TransportState, START_OPERATION};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpStream;

#[tokio::test]
async fn test_offer_yields_track() {
    let harness = Harness::new(PageScript::offering(1));
    let session = harness.builder().start().await.unwrap();

    assert_eq!(session.track().ssrc(), FIRST_SSRC);
    assert_eq!(session.peer_identity().len(), 40);
    assert!(session.url().starts_with("http://localhost:"));
    assert!(session.is_open());

    assert_eq!(harness.urls.lock().as_slice(), &[session.url().to_string()]);
    assert_eq!(
        harness.configs.lock()[0].peer_identity,
        session.peer_identity()
    );
    assert_eq!(
        harness.surface.evaluated.lock().as_slice(),
        &[format!("run('{}')", session.peer_identity())]
    );
    assert_eq!(
        harness.surface.bound_names(),
        vec!["getAnswer", "logErr", "logInfo"]
    );

    let answers = harness.surface.answers.lock().clone();
    assert_eq!(answers.len(), 1);
    assert_eq!(answers[0]["type"], "answer");
    assert_eq!(answers[0]["sdp"], "v=0 answer to v=0 offer");

    session.close().await.unwrap();
    assert!(!session.is_open());
}

#[tokio::test]
async fn test_start_logs_each_phase() {
    let harness = Harness::new(PageScript::offering(1));
    let session = harness.builder().start().await.unwrap();

    assert!(harness.logged("Started local web server for http://localhost:"));
    assert!(harness.logged("Starting Chrome"));
    assert!(harness.logged("Starting track"));
    assert!(harness.logged(&format!(
        "Running with peer identity '{}'",
        session.peer_identity()
    )));
    assert!(harness.logged("Track started"));
    assert!(!harness.logged("Got offer"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_trace_logs_offer_and_answer() {
    let harness = Harness::new(PageScript::offering(1));
    let session = harness.builder().trace(true).start().await.unwrap();

    assert!(harness.logged("Got offer: v=0 offer"));
    assert!(harness.logged("Sending back ans: v=0 answer to v=0 offer"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_page_info_and_state_changes_are_logged() {
    let mut script = PageScript::offering(1);
    script.info = vec!["ICE state: checking".to_string()];
    let harness = Harness::new(script);
    let session = harness.builder().start().await.unwrap();

    harness.transport.emit_state(TransportState::Connected);
    assert!(harness.logged("ICE state: checking"));
    assert!(harness.logged("RTC server state change: connected"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_keepalive_runs_until_close() {
    let harness = Harness::new(PageScript::offering(1));
    let session = harness.builder().start().await.unwrap();

    let transport = harness.transport.clone();
    assert!(eventually(Duration::from_secs(1), || transport.pli_count() >= 2).await);
    assert!(harness
        .transport
        .plis
        .lock()
        .iter()
        .all(|ssrc| *ssrc == FIRST_SSRC));

    session.close().await.unwrap();
    let after_close = harness.transport.pli_count();
    tokio::time::sleep(KEEPALIVE * 5).await;
    assert_eq!(harness.transport.pli_count(), after_close);
}

#[tokio::test]
async fn test_page_error_fails_start_and_releases_everything() {
    let harness = Harness::new(PageScript::failing(&["boom"]));
    let err = harness.builder().start().await.unwrap_err();

    assert_eq!(err.error_code(), "PAGE_REPORTED");
    assert_eq!(err.to_string(), "boom");
    assert_eq!(harness.errors.lock().as_slice(), &["boom".to_string()]);
    assert_eq!(harness.closes(), (1, 1));

    let port = port_of(&harness.urls.lock()[0]);
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_first_page_error_wins() {
    let harness = Harness::new(PageScript::failing(&["first", "second"]));
    let err = harness.builder().start().await.unwrap_err();

    assert_eq!(err.to_string(), "first");
    let errors = harness.errors.clone();
    assert!(eventually(Duration::from_secs(1), || errors.lock().len() == 2).await);
    assert_eq!(harness.errors.lock().as_slice(), &["first", "second"]);
}

#[tokio::test]
async fn test_rejected_offer_fails_start() {
    let harness = Harness::new(PageScript::offering_sdp(MALFORMED_SDP, 1));
    let err = harness.builder().start().await.unwrap_err();

    assert_eq!(err.error_code(), "NEGOTIATION_FAILED");
    let surface = harness.surface.clone();
    assert!(eventually(Duration::from_secs(1), || !surface.answers.lock().is_empty()).await);
    assert!(harness.surface.answers.lock()[0].is_null());
    assert_eq!(harness.transport.handled_tracks.load(Ordering::SeqCst), 0);
    assert_eq!(harness.closes(), (1, 1));
}

#[tokio::test]
async fn test_start_times_out_without_track() {
    let harness = Harness::new(PageScript::silent());
    let started = tokio::time::Instant::now();
    let err = harness
        .builder()
        .start_timeout(Duration::from_millis(50))
        .start()
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(err.to_string().contains(START_OPERATION));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(harness.closes(), (1, 1));
}

#[tokio::test]
async fn test_failed_eval_removes_track_handler() {
    let harness = Harness::new(PageScript::offering(1));
    harness.surface.fail_eval.store(true, Ordering::SeqCst);
    let err = harness.builder().start().await.unwrap_err();

    assert_eq!(err.error_code(), "SCRIPT_ERROR");
    assert!(!harness.transport.deliver_track(FIRST_SSRC));
    assert_eq!(harness.transport.handled_tracks.load(Ordering::SeqCst), 0);
    assert_eq!(harness.closes(), (1, 1));
}

#[tokio::test]
async fn test_only_first_track_is_used() {
    let harness = Harness::new(PageScript::offering(2));
    let session = harness.builder().start().await.unwrap();

    let surface = harness.surface.clone();
    assert!(eventually(Duration::from_secs(1), || surface.answers.lock().len() == 1).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(session.track().ssrc(), FIRST_SSRC);
    assert_eq!(harness.transport.handled_tracks.load(Ordering::SeqCst), 1);
    assert!(!harness.transport.deliver_track(FIRST_SSRC + 10));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_launch_failure_releases_endpoint() {
    let mut harness = Harness::new(PageScript::offering(1));
    harness.fail_launch = true;
    let err = harness.builder().start().await.unwrap_err();

    assert_eq!(err.error_code(), "SURFACE_LAUNCH_FAILED");
    assert!(err.is_acquisition_failure());
    assert!(harness.configs.lock().is_empty());

    let port = port_of(&harness.urls.lock()[0]);
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_random_failure_acquires_nothing() {
    let harness = Harness::new(PageScript::offering(1));
    let err = harness
        .builder()
        .random_source(ExhaustedRandom)
        .start()
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "RANDOM_SOURCE_UNAVAILABLE");
    assert!(harness.urls.lock().is_empty());
    assert_eq!(harness.closes(), (0, 0));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let harness = Harness::new(PageScript::offering(1));
    let session = harness.builder().start().await.unwrap();

    session.close().await.unwrap();
    session.close().await.unwrap();
    assert_eq!(harness.closes(), (1, 1));

    let port = port_of(session.url());
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_close_reports_every_failure_within_bound() {
    let harness = Harness::new(PageScript::offering(1));
    let session = harness.builder().start().await.unwrap();
    harness.transport.fail_close.store(true, Ordering::SeqCst);
    harness.surface.hang_close.store(true, Ordering::SeqCst);

    let err = tokio::time::timeout(Duration::from_secs(2), session.close())
        .await
        .unwrap()
        .unwrap_err();

    assert_eq!(err.len(), 2);
    assert!(err.failures.iter().all(|f| f.error_code() == "RELEASE_FAILED"));
    assert!(err.failures[0].to_string().contains("capture surface"));
    assert!(err.failures[1].to_string().contains("peer transport"));

    let port = port_of(session.url());
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_close_releases_surface_before_endpoint_and_transport() {
    let harness = Harness::new(PageScript::offering(1));
    let session = harness.builder().start().await.unwrap();
    harness.surface.hang_close.store(true, Ordering::SeqCst);

    let port = port_of(session.url());
    let transport = harness.transport.clone();
    let close = tokio::spawn(async move { session.close().await });

    let surface = harness.surface.clone();
    assert!(eventually(Duration::from_secs(1), || surface.closes.load(Ordering::SeqCst) == 1).await);
    assert_eq!(transport.closes.load(Ordering::SeqCst), 0);
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_ok());

    let err = close.await.unwrap().unwrap_err();
    assert_eq!(err.len(), 1);
    assert!(err.failures[0].to_string().contains("capture surface"));
    assert_eq!(transport.closes.load(Ordering::SeqCst), 1);
    assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
}

#[tokio::test]
async fn test_abandoned_start_releases_in_background() {
    let harness = Harness::new(PageScript::silent());
    let start = tokio::spawn(harness.builder().start());

    let surface = harness.surface.clone();
    assert!(eventually(Duration::from_secs(1), || !surface.evaluated.lock().is_empty()).await);
    start.abort();
    assert!(start.await.unwrap_err().is_cancelled());

    let surface = harness.surface.clone();
    let transport = harness.transport.clone();
    assert!(
        eventually(Duration::from_secs(2), || {
            surface.closes.load(Ordering::SeqCst) == 1
                && transport.closes.load(Ordering::SeqCst) == 1
        })
        .await
    );
}

#[tokio::test]
async fn test_done_follows_surface() {
    let harness = Harness::new(PageScript::offering(1));
    let session = harness.builder().start().await.unwrap();
    let done = session.done();
    assert!(!done.is_done());

    harness.surface.close_window();
    tokio::time::timeout(Duration::from_secs(1), done.wait())
        .await
        .unwrap();

    session.close().await.unwrap();
}
