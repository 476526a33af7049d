//! Integration tests for the lifecycle policy: disconnect grace windows,
//! token expiry, reconnect rebinding, and the live user count broadcast.

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

use drift_server::registry::{Registry, RegistryConfig};
use drift_server::routes::build_router;
use drift_server::state::AppState;

type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the server with the given GC timings (tests shrink them to
/// hundreds of milliseconds to observe expiry in real time).
async fn start_test_server(cfg: RegistryConfig) -> SocketAddr {
    let registry = Registry::new(cfg);
    let app = build_router(AppState::new(registry));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn short_timings(token_idle_ms: u64, room_reconnect_ms: u64) -> RegistryConfig {
    RegistryConfig {
        token_idle_ttl: Duration::from_millis(token_idle_ms),
        room_reconnect_ttl: Duration::from_millis(room_reconnect_ms),
        room_max_age: Duration::from_secs(600),
    }
}

async fn connect(addr: SocketAddr, token: Option<&str>) -> Ws {
    let url = match token {
        Some(t) => format!("ws://{}/ws?token={}", addr, t),
        None => format!("ws://{}/ws", addr),
    };
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect to WebSocket");
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("Failed to send frame");
}

async fn recv_frame(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Timed out waiting for frame")
            .expect("Stream ended")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => {
                return serde_json::from_str(text.as_str()).expect("Frame is JSON")
            }
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

async fn recv_type(ws: &mut Ws, ty: &str) -> Value {
    loop {
        let frame = recv_frame(ws).await;
        if frame["type"] == ty {
            return frame;
        }
    }
}

async fn health(addr: SocketAddr) -> Value {
    reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

async fn wait_for_waiting(addr: SocketAddr, n: usize) {
    for _ in 0..50 {
        if health(addr).await["waiting"] == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Waiting count never reached {}", n);
}

/// Pair two fresh clients; A initiates. Returns (a, a_id, a_token, b, b_id, room).
async fn pair(addr: SocketAddr) -> (Ws, String, String, Ws, String, String) {
    let mut a = connect(addr, None).await;
    let welcome_a = recv_type(&mut a, "welcome").await;
    let (a_id, a_token) = (
        welcome_a["user_id"].as_str().unwrap().to_string(),
        welcome_a["token"].as_str().unwrap().to_string(),
    );
    let mut b = connect(addr, None).await;
    let b_id = recv_type(&mut b, "welcome").await["user_id"]
        .as_str()
        .unwrap()
        .to_string();

    send(&mut a, json!({"type": "find_partner"})).await;
    wait_for_waiting(addr, 1).await;
    send(&mut b, json!({"type": "find_partner"})).await;
    let room = recv_type(&mut a, "room_assigned").await["room"]
        .as_str()
        .unwrap()
        .to_string();
    recv_type(&mut b, "room_assigned").await;
    (a, a_id, a_token, b, b_id, room)
}

#[tokio::test]
async fn user_count_tracks_connects_and_disconnects() {
    let addr = start_test_server(RegistryConfig::default()).await;

    let mut a = connect(addr, None).await;
    recv_type(&mut a, "welcome").await;
    let count = recv_type(&mut a, "user_count").await;
    assert_eq!(count["count"], 1);

    let b = connect(addr, None).await;
    let count = recv_type(&mut a, "user_count").await;
    assert_eq!(count["count"], 2);

    drop(b);
    let count = recv_type(&mut a, "user_count").await;
    assert_eq!(count["count"], 1);
}

#[tokio::test]
async fn partner_reconnects_within_grace_window() {
    let addr = start_test_server(short_timings(5_000, 1_500)).await;
    let (a, a_id, a_token, mut b, _b_id, room) = pair(addr).await;

    drop(a);
    let gone = recv_type(&mut b, "partner_disconnected").await;
    assert_eq!(gone["room"], room.as_str());
    assert_eq!(gone["partner_id"], a_id.as_str());

    // Back well inside the grace window.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let mut a2 = connect(addr, Some(&a_token)).await;
    let success = recv_type(&mut a2, "reconnect_success").await;
    assert_eq!(success["user_id"], a_id.as_str());
    assert_eq!(success["room"], room.as_str());

    let back = recv_type(&mut b, "partner_reconnected").await;
    assert_eq!(back["room"], room.as_str());
    assert_eq!(back["partner_id"], a_id.as_str());

    // The room survived with its original id and roles intact.
    send(&mut a2, json!({"type": "join_room", "room": room})).await;
    let joined = recv_type(&mut a2, "room_joined").await;
    assert_eq!(joined["role"], "initiator");

    // And relaying still works after the grace window would have elapsed.
    tokio::time::sleep(Duration::from_millis(1_800)).await;
    send(&mut a2, json!({"type": "offer", "room": room, "offer": {"sdp": "again"}})).await;
    let offer = recv_type(&mut b, "offer").await;
    assert_eq!(offer["offer"]["sdp"], "again");
}

#[tokio::test]
async fn abandoned_room_is_deleted_after_grace_window() {
    let addr = start_test_server(short_timings(10_000, 400)).await;
    let (a, _a_id, a_token, b, _b_id, _room) = pair(addr).await;

    drop(a);
    drop(b);
    tokio::time::sleep(Duration::from_millis(700)).await;

    let snapshot = health(addr).await;
    assert_eq!(snapshot["rooms"], 0, "grace window elapsed with nobody back");

    // The identity survives (token TTL is long here) but the room is gone.
    let mut a2 = connect(addr, Some(&a_token)).await;
    let success = recv_type(&mut a2, "reconnect_success").await;
    assert!(success.get("room").is_none());
}

#[tokio::test]
async fn idle_tokens_expire_and_reconnect_fails() {
    let addr = start_test_server(short_timings(400, 200)).await;

    let mut a = connect(addr, None).await;
    let welcome = recv_type(&mut a, "welcome").await;
    let a_token = welcome["token"].as_str().unwrap().to_string();
    drop(a);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(health(addr).await["tokens"], 0);

    // The expired token is unknown now: reconnect_failed, then a fresh identity.
    let mut a2 = connect(addr, Some(&a_token)).await;
    let failed = recv_frame(&mut a2).await;
    assert_eq!(failed["type"], "reconnect_failed");
    let welcome = recv_type(&mut a2, "welcome").await;
    assert_ne!(welcome["token"], a_token.as_str());
}

#[tokio::test]
async fn skip_after_partner_disconnect_frees_the_survivor() {
    let addr = start_test_server(short_timings(5_000, 60_000)).await;
    let (mut a, _a_id, _a_token, b, _b_id, room) = pair(addr).await;

    // B drops; the room waits for it inside a long grace window, but the
    // survivor need not: skip tears the room down immediately.
    drop(b);
    recv_type(&mut a, "partner_disconnected").await;
    send(&mut a, json!({"type": "skip"})).await;
    for _ in 0..50 {
        if health(addr).await["rooms"] == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(health(addr).await["rooms"], 0);

    // A can pair again; the dead room left no trace.
    send(&mut a, json!({"type": "find_partner"})).await;
    wait_for_waiting(addr, 1).await;
    let mut c = connect(addr, None).await;
    recv_type(&mut c, "welcome").await;
    send(&mut c, json!({"type": "find_partner"})).await;
    let assigned = recv_type(&mut a, "room_assigned").await;
    assert_ne!(assigned["room"], room.as_str(), "a fresh room id is minted");
}

#[tokio::test]
async fn join_room_authorizes_members_only() {
    let addr = start_test_server(RegistryConfig::default()).await;
    let (a, _a_id, a_token, _b, b_id, room) = pair(addr).await;

    // A second socket for A rebinds into the room and learns its role.
    let mut a2 = connect(addr, Some(&a_token)).await;
    recv_type(&mut a2, "reconnect_success").await;
    send(&mut a2, json!({"type": "join_room", "room": room})).await;
    let joined = recv_type(&mut a2, "room_joined").await;
    assert_eq!(joined["room"], room.as_str());
    assert_eq!(joined["role"], "initiator");
    assert_eq!(joined["partner_id"], b_id.as_str());

    send(&mut a2, json!({"type": "join_room", "room": "no-such-room"})).await;
    let failed = recv_type(&mut a2, "join_failed").await;
    assert_eq!(failed["reason"], "no_room");

    let mut x = connect(addr, None).await;
    recv_type(&mut x, "welcome").await;
    send(&mut x, json!({"type": "join_room", "room": room})).await;
    let failed = recv_type(&mut x, "join_failed").await;
    assert_eq!(failed["reason"], "not_authorized");

    // A's original socket was superseded; the latest one is authoritative.
    drop(a);
    tokio::time::sleep(Duration::from_millis(200)).await;
    let snapshot = health(addr).await;
    assert_eq!(snapshot["rooms"], 1, "superseded disconnect leaves the room alone");
}

#[tokio::test]
async fn health_reports_registry_counts() {
    let addr = start_test_server(RegistryConfig::default()).await;
    let (_a, _a_id, _a_token, _b, _b_id, _room) = pair(addr).await;

    let snapshot = health(addr).await;
    assert_eq!(snapshot["tokens"], 2);
    assert_eq!(snapshot["rooms"], 1);
    assert_eq!(snapshot["waiting"], 0);
    assert!(snapshot["uptime_secs"].is_u64());
}
