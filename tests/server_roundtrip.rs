//! End-to-end server tests: subscribe, snapshot on join, live pushes, pulls.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio_tungstenite::connect_async;
use tungstenite::Message;

use avatarcast::overlay::{OverlayClient, ReconnectSchedule};
use avatarcast::protocol::{CurrentState, OverlayMessage};
use avatarcast::server;
use avatarcast::{BroadcastHub, BroadcastState, StateStore, TransitionConfig, TransitionStyle};

struct Fixture {
    store: Arc<StateStore>,
    hub: Arc<BroadcastHub>,
    handle: server::ServerHandle,
    assets: tempfile::TempDir,
}

fn sample_state(image: &str, speaking: bool) -> BroadcastState {
    BroadcastState {
        group_id: "g1".to_string(),
        group_name: "Main".to_string(),
        image: image.to_string(),
        is_speaking: speaking,
    }
}

async fn start_fixture() -> Fixture {
    let store = Arc::new(StateStore::new(TransitionConfig::default()));
    let hub = Arc::new(BroadcastHub::new(store.clone()));
    let assets = tempfile::TempDir::new().expect("assets dir");
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    let handle = server::start(
        addr,
        store.clone(),
        hub.clone(),
        assets.path().to_path_buf(),
    )
    .expect("bind server");
    Fixture {
        store,
        hub,
        handle,
        assets,
    }
}

async fn next_state_message(
    ws: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> OverlayMessage {
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("message within timeout")
        .expect("stream open")
        .expect("frame ok");
    match frame {
        Message::Text(text) => serde_json::from_str(&text).expect("valid overlay message"),
        other => panic!("expected text frame, got {other:?}"),
    }
}

#[tokio::test]
async fn joining_client_receives_the_current_state_immediately() {
    let fixture = start_fixture().await;
    fixture.store.set(sample_state("idle.png", false));

    let url = format!("ws://{}", fixture.handle.addr());
    let (mut ws, _) = connect_async(&url).await.expect("connect");

    let message = next_state_message(&mut ws).await;
    match message {
        OverlayMessage::State { data, .. } => assert_eq!(data.image, "idle.png"),
        other => panic!("expected state message, got {other:?}"),
    }

    fixture.handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn broadcasts_reach_a_connected_client_in_order() {
    let fixture = start_fixture().await;
    fixture.store.set(sample_state("idle.png", false));

    let url = format!("ws://{}", fixture.handle.addr());
    let (mut ws, _) = connect_async(&url).await.expect("connect");
    next_state_message(&mut ws).await; // snapshot

    for (image, speaking) in [("talk.png", true), ("idle.png", false)] {
        let state = sample_state(image, speaking);
        fixture.store.set(state.clone());
        fixture.hub.broadcast(state, TransitionConfig::default());
    }

    match next_state_message(&mut ws).await {
        OverlayMessage::State { data, .. } => {
            assert_eq!(data.image, "talk.png");
            assert!(data.is_speaking);
        }
        other => panic!("expected state message, got {other:?}"),
    }
    match next_state_message(&mut ws).await {
        OverlayMessage::State { data, .. } => assert_eq!(data.image, "idle.png"),
        other => panic!("expected state message, got {other:?}"),
    }

    fixture.handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn current_endpoint_reports_null_then_the_latest_state() {
    let fixture = start_fixture().await;
    let base = format!("http://{}", fixture.handle.addr());
    let client = hyper::Client::new();

    let uri: hyper::Uri = format!("{base}/api/current").parse().expect("uri");
    let response = client.get(uri.clone()).await.expect("get current");
    assert_eq!(response.status(), hyper::StatusCode::OK);
    let body = hyper::body::to_bytes(response.into_body()).await.expect("body");
    let current: CurrentState = serde_json::from_slice(&body).expect("valid json");
    assert!(current.state.is_none());
    assert_eq!(current.transition, TransitionStyle::Instant);

    fixture.store.set(sample_state("talk.png", true));
    let response = client.get(uri).await.expect("get current");
    let body = hyper::body::to_bytes(response.into_body()).await.expect("body");
    let current: CurrentState = serde_json::from_slice(&body).expect("valid json");
    let state = current.state.expect("state present after set");
    assert_eq!(state.image, "talk.png");
    assert!(state.is_speaking);

    fixture.handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn asset_requests_serve_files_and_refuse_traversal() {
    let fixture = start_fixture().await;
    std::fs::write(fixture.assets.path().join("face.png"), b"not-really-a-png")
        .expect("write asset");

    let base = format!("http://{}", fixture.handle.addr());
    let client = hyper::Client::new();

    let uri: hyper::Uri = format!("{base}/assets/face.png").parse().expect("uri");
    let response = client.get(uri).await.expect("get asset");
    assert_eq!(response.status(), hyper::StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok()),
        Some("image/png")
    );
    let body = hyper::body::to_bytes(response.into_body()).await.expect("body");
    assert_eq!(&body[..], b"not-really-a-png");

    for missing in ["/assets/nope.png", "/assets/..%2Fconfig.json", "/nowhere"] {
        let uri: hyper::Uri = format!("{base}{missing}").parse().expect("uri");
        let response = client.get(uri).await.expect("get");
        assert_eq!(
            response.status(),
            hyper::StatusCode::NOT_FOUND,
            "expected 404 for {missing}"
        );
    }

    fixture.handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn client_recovers_from_an_outage_via_the_fallback_pull() {
    // Reserve a port, then leave nothing listening on it.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("reserve port");
    let addr = listener.local_addr().expect("reserved addr");
    drop(listener);

    let (render_tx, mut render_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut client = OverlayClient::with_schedule(
        addr.to_string(),
        ReconnectSchedule::new(Duration::from_millis(50), Duration::from_millis(200)),
    );
    let client_task = tokio::spawn(async move {
        client
            .run(move |element| {
                let _ = render_tx.send(element.src().map(str::to_owned));
            })
            .await;
    });

    // Let a couple of attempts fail, then bring the server up on that port
    // already holding a state the client never saw pushed.
    tokio::time::sleep(Duration::from_millis(150)).await;
    let store = Arc::new(StateStore::new(TransitionConfig::default()));
    let hub = Arc::new(BroadcastHub::new(store.clone()));
    let assets = tempfile::TempDir::new().expect("assets dir");
    store.set(sample_state("idle.png", false));
    let handle = server::start(addr, store.clone(), hub.clone(), assets.path().to_path_buf())
        .expect("bind server");

    // The missed state arrives through the pull on the next attempt.
    let rendered = tokio::time::timeout(Duration::from_secs(5), render_rx.recv())
        .await
        .expect("render within timeout")
        .expect("render callback fired");
    assert_eq!(rendered.as_deref(), Some("idle.png"));

    // And the socket came back too: a live push reaches the client.
    let state = sample_state("talk.png", true);
    store.set(state.clone());
    hub.broadcast(state, TransitionConfig::default());
    let rendered = tokio::time::timeout(Duration::from_secs(5), render_rx.recv())
        .await
        .expect("render within timeout")
        .expect("render callback fired");
    assert_eq!(rendered.as_deref(), Some("talk.png"));

    client_task.abort();
    handle.shutdown().await.expect("clean shutdown");
}

#[tokio::test]
async fn disconnecting_a_client_does_not_disturb_the_others() {
    let fixture = start_fixture().await;
    fixture.store.set(sample_state("idle.png", false));

    let url = format!("ws://{}", fixture.handle.addr());
    let (mut first, _) = connect_async(&url).await.expect("connect first");
    let (second, _) = connect_async(&url).await.expect("connect second");
    next_state_message(&mut first).await;
    drop(second);

    // Give the server a moment to reap the dropped connection, then push.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = sample_state("talk.png", true);
    fixture.store.set(state.clone());
    fixture.hub.broadcast(state, TransitionConfig::default());

    match next_state_message(&mut first).await {
        OverlayMessage::State { data, .. } => assert_eq!(data.image, "talk.png"),
        other => panic!("expected state message, got {other:?}"),
    }

    fixture.handle.shutdown().await.expect("clean shutdown");
}
