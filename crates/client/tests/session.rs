//! Sessions driven against a real relay (or a deliberately absent one).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use pa_client::session::LAST_ANNOUNCEMENT_KEY;
use pa_client::{
    BroadcastOutcome, ConnectionState, DemoFallback, NoFallback, Session, SessionConfig,
    SessionError, SessionNotice, SessionStatus, Storage,
};
use pa_server::config::CorsOrigin;
use pa_server::relay::{Relay, RelayHandle};
use pa_server::{cors_layer, router, state::AppState};
use pa_shared::{Announcement, Priority, ValidationError};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

async fn start_relay() -> SocketAddr {
    start_relay_with_handle().await.0
}

async fn start_relay_with_handle() -> (SocketAddr, RelayHandle) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (relay, _task) = Relay::new().spawn();
    let app = router(AppState::new(relay.clone()), cors_layer(&CorsOrigin::Any).unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, relay)
}

async fn wait_for_relay_count(relay: &RelayHandle, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while relay.clients_count().await != Some(expected) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay never reached the expected client count")
}

/// An address nothing is listening on.
async fn closed_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

fn endpoint(addr: SocketAddr) -> Url {
    Url::parse(&format!("ws://{}/ws", addr)).unwrap()
}

async fn wait_for_status(
    status: &mut watch::Receiver<SessionStatus>,
    within: Duration,
    predicate: impl FnMut(&SessionStatus) -> bool,
) -> SessionStatus {
    let status = tokio::time::timeout(within, status.wait_for(predicate))
        .await
        .expect("timed out waiting for session status")
        .expect("session stopped");
    *status
}

async fn wait_for_notice(
    notices: &mut broadcast::Receiver<SessionNotice>,
    predicate: impl Fn(&SessionNotice) -> bool,
) -> SessionNotice {
    tokio::time::timeout(WAIT, async {
        loop {
            let notice = notices.recv().await.unwrap();
            if predicate(&notice) {
                return notice;
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

#[tokio::test]
async fn test_fire_drill_reaches_every_receiver_once() {
    let addr = start_relay().await;

    let fallback_calls = Arc::new(AtomicUsize::new(0));
    let counter = fallback_calls.clone();
    let operator = Session::new(
        SessionConfig::operator(endpoint(addr)),
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            None::<usize>
        }),
    );
    let mut notices = operator.subscribe_notices();
    operator.connect();

    let mut receivers = Vec::new();
    for _ in 0..3 {
        let mut receiver = Session::new(
            SessionConfig::receiver(endpoint(addr)).with_feed(),
            Box::new(NoFallback),
        );
        let feed = receiver.take_announcements().unwrap();
        receiver.connect();
        receivers.push((receiver, feed));
    }

    let mut status = operator.watch_status();
    let live = wait_for_status(&mut status, WAIT, |s| s.connected_clients == 4).await;
    assert_eq!(live.state, ConnectionState::Connected);
    assert!(!live.simulated);

    let drill = Announcement::new("Fire drill", Priority::Emergency, ["en", "es"]).unwrap();
    let outcome = operator.broadcast(drill.clone()).await.unwrap();
    assert_eq!(outcome, BroadcastOutcome::Sent);

    let ack = wait_for_notice(&mut notices, |n| {
        matches!(n, SessionNotice::BroadcastAcknowledged(_))
    })
    .await;
    match ack {
        SessionNotice::BroadcastAcknowledged(receipt) => assert_eq!(receipt.clients, 3),
        other => panic!("unexpected notice {:?}", other),
    }

    for (receiver, feed) in &mut receivers {
        let received = tokio::time::timeout(WAIT, feed.recv()).await.unwrap().unwrap();
        assert_eq!(received, drill);
        assert_eq!(receiver.last_announcement(), Some(drill.clone()));
    }

    tokio::time::sleep(Duration::from_millis(100)).await;
    for (_, feed) in &mut receivers {
        assert!(feed.try_recv().is_err(), "announcement delivered twice");
    }
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalid_announcement_never_reaches_relay() {
    let addr = start_relay().await;

    let operator = Session::new(SessionConfig::operator(endpoint(addr)), Box::new(NoFallback));
    operator.connect();
    let mut receiver = Session::new(
        SessionConfig::receiver(endpoint(addr)).with_feed(),
        Box::new(NoFallback),
    );
    let mut feed = receiver.take_announcements().unwrap();
    receiver.connect();

    let mut status = operator.watch_status();
    wait_for_status(&mut status, WAIT, |s| s.connected_clients == 2).await;

    let empty: Announcement = serde_json::from_str(
        r#"{"text":"   ","priority":"normal","languages":["en"],"timestamp":0}"#,
    )
    .unwrap();
    let err = operator.broadcast(empty).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(ValidationError::EmptyText)));

    let no_languages: Announcement = serde_json::from_str(
        r#"{"text":"Hello","priority":"normal","languages":[],"timestamp":0}"#,
    )
    .unwrap();
    let err = operator.broadcast(no_languages).await.unwrap_err();
    assert!(matches!(err, SessionError::Validation(ValidationError::NoLanguages)));

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(feed.try_recv().is_err());
}

#[tokio::test]
async fn test_receiver_cannot_broadcast() {
    let addr = closed_addr().await;
    let receiver = Session::new(SessionConfig::receiver(endpoint(addr)), Box::new(NoFallback));
    let hello = Announcement::new("Hello", Priority::Normal, ["en"]).unwrap();
    assert!(matches!(
        receiver.broadcast(hello).await,
        Err(SessionError::NotOperator)
    ));
}

#[tokio::test]
async fn test_receiver_persists_last_announcement() {
    let addr = start_relay().await;
    let dir = tempfile::tempdir().unwrap();
    let storage = Storage::new(dir.path());

    let operator = Session::new(SessionConfig::operator(endpoint(addr)), Box::new(NoFallback));
    operator.connect();
    let mut receiver = Session::new(
        SessionConfig::receiver(endpoint(addr))
            .with_storage(storage.clone())
            .with_feed(),
        Box::new(NoFallback),
    );
    let mut feed = receiver.take_announcements().unwrap();
    receiver.connect();

    let mut status = operator.watch_status();
    wait_for_status(&mut status, WAIT, |s| s.connected_clients == 2).await;

    let notice = Announcement::new("Platform 4 closed", Priority::Warning, ["en", "fr"]).unwrap();
    operator.broadcast(notice.clone()).await.unwrap();
    tokio::time::timeout(WAIT, feed.recv()).await.unwrap().unwrap();
    receiver.shutdown().await;

    let stored: Option<Announcement> = storage.load(LAST_ANNOUNCEMENT_KEY).unwrap();
    assert_eq!(stored, Some(notice.clone()));

    let restored = Session::new(
        SessionConfig::receiver(endpoint(addr)).with_storage(storage),
        Box::new(NoFallback),
    );
    assert_eq!(restored.last_announcement(), Some(notice));
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_relay_fails_after_ten_attempts() {
    let addr = closed_addr().await;
    let session = Session::new(SessionConfig::operator(endpoint(addr)), Box::new(NoFallback));
    let mut notices = session.subscribe_notices();
    let mut status = session.watch_status();
    session.connect();

    let failed = wait_for_status(&mut status, Duration::from_secs(600), |s| {
        s.state == ConnectionState::Failed
    })
    .await;
    assert_eq!(failed.reconnect_attempts, 10);
    assert!(!failed.simulated);

    let mut seen_failed = false;
    while let Ok(notice) = notices.try_recv() {
        seen_failed |= notice == SessionNotice::ReconnectFailed;
    }
    assert!(seen_failed);

    let hello = Announcement::new("Anyone there?", Priority::Normal, ["en"]).unwrap();
    assert_eq!(
        session.broadcast(hello).await.unwrap(),
        BroadcastOutcome::Offline
    );

    session.retry_connection();
    let restarted = wait_for_status(&mut status, Duration::from_secs(60), |s| {
        s.state != ConnectionState::Failed
    })
    .await;
    assert!(restarted.reconnect_attempts <= 1);
}

#[tokio::test]
async fn test_demo_fallback_simulates_connection() {
    let addr = closed_addr().await;
    let session = Session::new(SessionConfig::operator(endpoint(addr)), Box::new(DemoFallback));
    let mut notices = session.subscribe_notices();
    let mut status = session.watch_status();
    session.connect();

    let simulated = wait_for_status(&mut status, WAIT, |s| s.simulated).await;
    assert_eq!(simulated.state, ConnectionState::Connected);
    assert!((1..=10).contains(&simulated.connected_clients));

    wait_for_notice(&mut notices, |n| matches!(n, SessionNotice::Simulated { .. })).await;

    let hello = Announcement::new("Demo", Priority::Normal, ["en"]).unwrap();
    assert_eq!(
        session.broadcast(hello).await.unwrap(),
        BroadcastOutcome::Offline
    );
}

#[tokio::test]
async fn test_server_close_triggers_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // First connection is closed by the server, the second is kept open.
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.close(None).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let session = Session::new(SessionConfig::operator(endpoint(addr)), Box::new(NoFallback));
    let mut notices = session.subscribe_notices();
    session.connect();

    wait_for_notice(&mut notices, |n| *n == SessionNotice::Connected).await;
    let lost = wait_for_notice(&mut notices, |n| {
        matches!(n, SessionNotice::Disconnected { .. })
    })
    .await;
    assert_eq!(
        lost,
        SessionNotice::Disconnected {
            reason: "io server disconnect".to_string()
        }
    );
    assert_eq!(session.status().state, ConnectionState::Reconnecting);

    wait_for_notice(&mut notices, |n| *n == SessionNotice::ReconnectAttempt(1)).await;
    wait_for_notice(&mut notices, |n| *n == SessionNotice::Connected).await;
    assert_eq!(session.status().reconnect_attempts, 0);
}

#[tokio::test]
async fn test_receiver_without_feed_keeps_only_latest() {
    let addr = start_relay().await;

    let mut operator = Session::new(
        SessionConfig::operator(endpoint(addr)).with_feed(),
        Box::new(NoFallback),
    );
    assert!(operator.take_announcements().is_none());
    operator.connect();
    let mut receiver = Session::new(SessionConfig::receiver(endpoint(addr)), Box::new(NoFallback));
    receiver.connect();

    let mut status = operator.watch_status();
    wait_for_status(&mut status, WAIT, |s| s.connected_clients == 2).await;

    for n in 0..50 {
        let announcement = Announcement::new(format!("n{}", n), Priority::Normal, ["en"]).unwrap();
        operator.broadcast(announcement).await.unwrap();
    }

    let mut last = receiver.watch_last_announcement();
    tokio::time::timeout(
        WAIT,
        last.wait_for(|a| a.as_ref().is_some_and(|a| a.text() == "n49")),
    )
    .await
    .expect("latest announcement never arrived")
    .unwrap();
    assert!(receiver.take_announcements().is_none());
}

#[tokio::test]
async fn test_shutdown_releases_relay_connection() {
    let (addr, relay) = start_relay_with_handle().await;

    let session = Session::new(SessionConfig::operator(endpoint(addr)), Box::new(NoFallback));
    let mut status = session.watch_status();
    session.connect();
    wait_for_status(&mut status, WAIT, |s| s.connected_clients == 1).await;
    assert_eq!(relay.clients_count().await, Some(1));

    session.shutdown().await;

    wait_for_relay_count(&relay, 0).await;
    let last = *status.borrow();
    assert_eq!(last, SessionStatus::default());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_pending_retry() {
    let addr = closed_addr().await;
    let session = Session::new(SessionConfig::operator(endpoint(addr)), Box::new(NoFallback));
    let mut status = session.watch_status();
    session.connect();

    wait_for_status(&mut status, Duration::from_secs(60), |s| {
        s.state == ConnectionState::Reconnecting
    })
    .await;
    session.shutdown().await;

    let last = *status.borrow();
    assert_eq!(last.state, ConnectionState::Disconnected);
    assert_eq!(last.reconnect_attempts, 0);
}

#[tokio::test]
async fn test_requested_clients_count_is_reported() {
    let (addr, relay) = start_relay_with_handle().await;

    let operator = Session::new(SessionConfig::operator(endpoint(addr)), Box::new(NoFallback));
    let mut notices = operator.subscribe_notices();
    let mut status = operator.watch_status();
    operator.connect();
    wait_for_status(&mut status, WAIT, |s| s.connected_clients == 1).await;
    wait_for_relay_count(&relay, 1).await;
    while notices.try_recv().is_ok() {}

    operator.request_clients_count();

    let reported = wait_for_notice(&mut notices, |n| {
        matches!(n, SessionNotice::ClientsCount(_))
    })
    .await;
    assert_eq!(reported, SessionNotice::ClientsCount(1));
    assert_eq!(operator.status().connected_clients, 1);
}
