//! Integration tests for the push bridge against a local websocket server.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use warden_api::TokenSource;
use warden_bridge::{BridgeConfig, BridgeError, ConnectionEvent, EventBridge, Phase};
use warden_exec::ExecError;
use warden_types::{EventBus, EventKind, NormalizedEvent};

struct FixedToken {
    token: Option<String>,
    calls: AtomicUsize,
}

impl FixedToken {
    fn ok(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: Some(token.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            token: None,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl TokenSource for FixedToken {
    async fn pipeline_token(&self) -> Result<String, ExecError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token.clone().ok_or(ExecError::NoSession)
    }
}

struct StubServer {
    url: String,
    accepted: Arc<AtomicUsize>,
    uris: Arc<Mutex<Vec<String>>>,
}

/// Serves every accepted connection with `script`.
async fn serve<F, Fut>(script: F) -> StubServer
where
    F: Fn(usize, WebSocketStream<TcpStream>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let uris = Arc::new(Mutex::new(Vec::new()));
    let script = Arc::new(script);

    let counter = accepted.clone();
    let seen = uris.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let index = counter.fetch_add(1, Ordering::SeqCst);
            let script = script.clone();
            let seen = seen.clone();
            tokio::spawn(async move {
                let callback = move |req: &Request, resp: Response| {
                    seen.lock().unwrap().push(req.uri().to_string());
                    Ok::<_, ErrorResponse>(resp)
                };
                if let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await {
                    script(index, ws).await;
                }
            });
        }
    });

    StubServer {
        url: format!("ws://{addr}/"),
        accepted,
        uris,
    }
}

async fn hold_open(mut ws: WebSocketStream<TcpStream>) {
    while let Some(Ok(_)) = ws.next().await {}
}

fn config(url: &str) -> BridgeConfig {
    BridgeConfig {
        url: url.to_string(),
        reconnect_base_ms: 10,
        reconnect_cap: 3,
        max_attempts: 4,
        stability_interval_secs: 0,
        settle_delay_ms: 10,
    }
}

async fn next_event(rx: &mut broadcast::Receiver<NormalizedEvent>) -> NormalizedEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for bus event")
        .expect("bus closed")
}

async fn wait_for<F>(rx: &mut broadcast::Receiver<ConnectionEvent>, mut pred: F) -> Vec<ConnectionEvent>
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for connection event")
            .expect("connection events closed");
        let done = pred(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

#[tokio::test]
async fn connects_with_token_in_query() {
    let server = serve(|_, ws| hold_open(ws)).await;
    let bridge = EventBridge::new(config(&server.url), FixedToken::ok("tok-123"), EventBus::new());

    bridge.connect().await.unwrap();

    assert_eq!(bridge.status().phase, Phase::Connected);
    assert_eq!(bridge.status().attempts, 0);
    let uris = server.uris.lock().unwrap().clone();
    assert_eq!(uris, vec!["/?authToken=tok-123".to_string()]);

    bridge.disconnect().await;
}

#[tokio::test]
async fn second_connect_is_refused_while_connected() {
    let server = serve(|_, ws| hold_open(ws)).await;
    let bridge = EventBridge::new(config(&server.url), FixedToken::ok("t"), EventBus::new());

    bridge.connect().await.unwrap();
    let err = bridge.connect().await.unwrap_err();
    assert!(matches!(err, BridgeError::AlreadyConnected));
    assert_eq!(server.accepted.load(Ordering::SeqCst), 1);

    bridge.disconnect().await;
}

#[tokio::test]
async fn consecutive_duplicate_frames_are_dropped() {
    let join = r#"{"type":"notification-v2","content":"{\"type\":\"group.joinRequest\",\"link\":\"group:grp_abc\",\"senderUserId\":\"usr_1\"}"}"#;
    let left = r#"{"type":"group-left","content":{"groupId":"grp_abc"}}"#;

    let server = serve(move |_, mut ws| async move {
        for frame in [join, join, left, join] {
            ws.send(Message::text(frame)).await.unwrap();
        }
        hold_open(ws).await;
    })
    .await;

    let bus = EventBus::new();
    let mut rx = bus.receiver();
    let bridge = EventBridge::new(config(&server.url), FixedToken::ok("t"), bus);
    bridge.connect().await.unwrap();

    let kinds = [
        next_event(&mut rx).await.kind,
        next_event(&mut rx).await.kind,
        next_event(&mut rx).await.kind,
    ];
    assert_eq!(
        kinds,
        [EventKind::JoinRequest, EventKind::MemberLeft, EventKind::JoinRequest]
    );

    let status = bridge.status();
    assert_eq!(status.messages_received, 3);
    assert_eq!(status.duplicates_dropped, 1);
    assert!(status.last_fingerprint.is_some());

    bridge.disconnect().await;
}

#[tokio::test]
async fn token_failures_back_off_until_exhausted() {
    let tokens = FixedToken::failing();
    let bridge = EventBridge::new(config("ws://127.0.0.1:9/"), tokens.clone(), EventBus::new());
    let mut events = bridge.events();

    let err = bridge.connect().await.unwrap_err();
    assert!(matches!(err, BridgeError::TokenUnavailable(_)));

    let seen = wait_for(&mut events, |e| {
        matches!(e, ConnectionEvent::ReconnectFailed { .. })
    })
    .await;

    let delays: Vec<u64> = seen
        .iter()
        .filter_map(|e| match e {
            ConnectionEvent::ReconnectScheduled { delay_ms, .. } => Some(*delay_ms),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![10, 20, 30, 30]);
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));

    assert_eq!(
        seen.last(),
        Some(&ConnectionEvent::ReconnectFailed { attempts: 4 })
    );
    assert!(seen
        .iter()
        .any(|e| matches!(e, ConnectionEvent::TokenUnavailable { .. })));
    assert_eq!(tokens.calls.load(Ordering::SeqCst), 5);
    assert_eq!(bridge.status().phase, Phase::Idle);
}

#[tokio::test]
async fn disconnect_cancels_pending_reconnect() {
    let tokens = FixedToken::failing();
    let mut cfg = config("ws://127.0.0.1:9/");
    cfg.reconnect_base_ms = 100;
    let bridge = EventBridge::new(cfg, tokens.clone(), EventBus::new());

    let _ = bridge.connect().await;
    assert_eq!(bridge.status().phase, Phase::ReconnectScheduled);

    bridge.disconnect().await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(tokens.calls.load(Ordering::SeqCst), 1);
    let status = bridge.status();
    assert_eq!(status.phase, Phase::Idle);
    assert!(status.manual);
}

#[tokio::test]
async fn server_close_triggers_reconnect() {
    let server = serve(|index, mut ws| async move {
        if index == 0 {
            let _ = ws.close(None).await;
        } else {
            hold_open(ws).await;
        }
    })
    .await;

    let bridge = EventBridge::new(config(&server.url), FixedToken::ok("t"), EventBus::new());
    let mut events = bridge.events();
    bridge.connect().await.unwrap();

    // First Connected is the initial socket; the second follows the reconnect.
    let mut connected = 0;
    let seen = wait_for(&mut events, |e| {
        if matches!(e, ConnectionEvent::Connected) {
            connected += 1;
        }
        connected == 2
    })
    .await;

    assert!(seen.iter().any(|e| matches!(
        e,
        ConnectionEvent::Disconnected { manual: false, .. }
    )));
    assert!(seen.iter().any(|e| matches!(
        e,
        ConnectionEvent::ReconnectScheduled { attempt: 1, .. }
    )));
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);
    assert_eq!(bridge.status().attempts, 0);

    bridge.disconnect().await;
}

#[tokio::test]
async fn force_reconnect_replaces_socket_without_auto_reconnect() {
    let server = serve(|_, ws| hold_open(ws)).await;
    let bridge = EventBridge::new(config(&server.url), FixedToken::ok("t"), EventBus::new());
    let mut events = bridge.events();

    bridge.connect().await.unwrap();
    bridge.force_reconnect().await.unwrap();

    assert_eq!(bridge.status().phase, Phase::Connected);
    assert!(!bridge.status().manual);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.accepted.load(Ordering::SeqCst), 2);

    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    assert!(!drained
        .iter()
        .any(|e| matches!(e, ConnectionEvent::ReconnectScheduled { .. })));

    bridge.disconnect().await;
}

#[tokio::test]
async fn remote_error_frames_are_not_published() {
    let server = serve(|_, mut ws| async move {
        ws.send(Message::text(r#"{"err":"session expired"}"#))
            .await
            .unwrap();
        hold_open(ws).await;
    })
    .await;

    let bus = EventBus::new();
    let mut rx = bus.receiver();
    let bridge = EventBridge::new(config(&server.url), FixedToken::ok("t"), bus);
    let mut events = bridge.events();
    bridge.connect().await.unwrap();

    let seen = wait_for(&mut events, |e| {
        matches!(e, ConnectionEvent::RemoteError { .. })
    })
    .await;
    assert_eq!(
        seen.last(),
        Some(&ConnectionEvent::RemoteError {
            message: "session expired".to_string()
        })
    );
    assert!(rx.try_recv().is_err());

    bridge.disconnect().await;
}
