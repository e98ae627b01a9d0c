//! Live protocol tests for the analytics socket
//!
//! Each test spins up a real listener on an ephemeral port with
//! compressed timer settings and drives it with a tokio-tungstenite
//! client, asserting on frames and close reasons exactly as a browser
//! client would see them.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use botlist_engine::schema::{Bot, User};
use botlist_engine::socket::{handle_connection, SocketConfig};
use botlist_engine::store::Stores;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const OWNER_SESSION: &str = "aa11";
const ADMIN_SESSION: &str = "bb22";
const STRANGER_SESSION: &str = "cc33";
const BOT_ID: &str = "555";
const OTHER_BOT_ID: &str = "556";
const BOT_ADDED_AT: i64 = 1_600_000_000_000;

fn user(id: &str, admin: bool) -> User {
    User {
        id: id.to_string(),
        username: format!("user{}", id),
        admin,
        developer: false,
        certification: false,
    }
}

fn bot(id: &str, created_at: i64) -> Bot {
    Bot {
        id: id.to_string(),
        username: format!("Bot{}", id),
        short_description: "A bot".into(),
        tags: vec![],
        owners: vec!["100".into()],
        upvotes: vec![],
        created_at,
        approved: true,
    }
}

fn seeded_stores() -> Arc<Stores> {
    let stores = Stores::new();
    stores.bots.insert(bot(BOT_ID, BOT_ADDED_AT));
    stores.bots.insert(bot(OTHER_BOT_ID, BOT_ADDED_AT + 1));
    stores.sessions.insert(OWNER_SESSION, user("100", false));
    stores.sessions.insert(ADMIN_SESSION, user("200", true));
    stores.sessions.insert(STRANGER_SESSION, user("300", false));
    Arc::new(stores)
}

/// Comfortable defaults for tests that should never hit a deadline
fn lenient_config() -> SocketConfig {
    SocketConfig {
        heartbeat_timeout: Duration::from_secs(10),
        heartbeat_interval: Duration::from_millis(100),
        identify_timeout: Duration::from_secs(10),
    }
}

async fn spawn_server(stores: Arc<Stores>, config: SocketConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let stores = Arc::clone(&stores);
            let config = config.clone();
            tokio::spawn(async move {
                handle_connection(stream, stores, config).await;
            });
        }
    });
    addr
}

async fn connect(addr: SocketAddr, cookie: Option<&str>) -> Client {
    let mut request = format!("ws://{}/analytics", addr)
        .into_client_request()
        .unwrap();
    if let Some(cookie) = cookie {
        request
            .headers_mut()
            .insert("Cookie", cookie.parse().unwrap());
    }
    let (client, _) = connect_async(request).await.unwrap();
    client
}

async fn send(client: &mut Client, frame: Value) {
    client
        .send(Message::Text(frame.to_string()))
        .await
        .unwrap();
}

async fn next_frame(client: &mut Client) -> Option<Message> {
    tokio::time::timeout(Duration::from_secs(5), client.next())
        .await
        .expect("timed out waiting for a frame")
        .map(|r| r.expect("websocket error"))
}

/// Next JSON frame that is not a server heartbeat ping; `None` if the
/// server closed first
async fn next_event(client: &mut Client) -> Option<Value> {
    while let Some(msg) = next_frame(client).await {
        match msg {
            Message::Text(text) => {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["type"] != "heartbeat" {
                    return Some(value);
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Read until the server closes, returning the close reason
async fn close_reason_of(client: &mut Client) -> String {
    while let Some(msg) = next_frame(client).await {
        if let Message::Close(frame) = msg {
            return frame.map(|f| f.reason.to_string()).unwrap_or_default();
        }
    }
    panic!("connection ended without a close frame");
}

/// Assert no non-heartbeat frame shows up within `window`
async fn assert_quiet(client: &mut Client, window: Duration) {
    let quiet = async {
        while let Some(msg) = client.next().await {
            match msg.unwrap() {
                Message::Text(text) => {
                    let value: Value = serde_json::from_str(&text).unwrap();
                    assert_eq!(value["type"], "heartbeat", "unexpected frame: {}", value);
                }
                Message::Close(frame) => panic!("unexpected close: {:?}", frame),
                _ => {}
            }
        }
    };
    // Reaching the timeout means nothing unexpected arrived.
    let _ = tokio::time::timeout(window, quiet).await;
}

async fn identify(client: &mut Client, bot_id: &str) {
    send(client, json!({"type": "identify", "bot": bot_id})).await;
    let ack = next_event(client).await.expect("identify ack");
    assert_eq!(ack["type"], "identify");
    assert_eq!(ack["success"], true);
}

#[tokio::test]
async fn missing_cookie_header_closes() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, None).await;
    assert_eq!(
        close_reason_of(&mut client).await,
        "Missing cookie header from request"
    );
}

#[tokio::test]
async fn cookie_without_session_closes() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, Some("theme=dark")).await;
    assert_eq!(
        close_reason_of(&mut client).await,
        "No session cookie has been set"
    );
}

#[tokio::test]
async fn stale_session_token_closes() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, Some("session=deadbeef")).await;
    assert_eq!(
        close_reason_of(&mut client).await,
        "No user was found by that session token"
    );
}

#[tokio::test]
async fn ready_is_sent_after_session_resolution() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    let ready = next_event(&mut client).await.unwrap();
    assert_eq!(ready["type"], "ready");
    assert!(ready["time"].is_i64());
}

#[tokio::test]
async fn no_heartbeat_closes_even_without_identify() {
    // Heartbeat enforcement is independent of the identify handshake:
    // with the identify deadline far out, the heartbeat deadline is what
    // kills a silent connection.
    let config = SocketConfig {
        heartbeat_timeout: Duration::from_millis(300),
        heartbeat_interval: Duration::from_millis(100),
        identify_timeout: Duration::from_secs(10),
    };
    let addr = spawn_server(seeded_stores(), config).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    assert_eq!(
        close_reason_of(&mut client).await,
        "No heartbeat received in time"
    );
}

#[tokio::test]
async fn identify_deadline_closes_idle_connections() {
    let config = SocketConfig {
        heartbeat_timeout: Duration::from_secs(10),
        heartbeat_interval: Duration::from_millis(100),
        identify_timeout: Duration::from_millis(200),
    };
    let addr = spawn_server(seeded_stores(), config).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    assert_eq!(
        close_reason_of(&mut client).await,
        "Client did not identify in time"
    );
}

#[tokio::test]
async fn heartbeats_keep_the_connection_alive() {
    let config = SocketConfig {
        heartbeat_timeout: Duration::from_millis(300),
        heartbeat_interval: Duration::from_millis(100),
        identify_timeout: Duration::from_secs(10),
    };
    let addr = spawn_server(seeded_stores(), config).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    let ready = next_event(&mut client).await.unwrap();
    assert_eq!(ready["type"], "ready");

    // Outlive several heartbeat windows by answering the deadline.
    for _ in 0..8 {
        send(&mut client, json!({"type": "heartbeat"})).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Still open: the identify handshake goes through.
    identify(&mut client, BOT_ID).await;

    // Gone quiet: the deadline fires.
    assert_eq!(
        close_reason_of(&mut client).await,
        "No heartbeat received in time"
    );
}

#[tokio::test]
async fn identify_unknown_bot_closes() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    next_event(&mut client).await.unwrap();

    send(&mut client, json!({"type": "identify", "bot": "999"})).await;
    assert_eq!(close_reason_of(&mut client).await, "No bot exists by that ID");
}

#[tokio::test]
async fn identify_without_ownership_closes() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, Some(&format!("session={}", STRANGER_SESSION))).await;
    next_event(&mut client).await.unwrap();

    send(&mut client, json!({"type": "identify", "bot": BOT_ID})).await;
    assert_eq!(close_reason_of(&mut client).await, "You do not own that bot");
}

#[tokio::test]
async fn admin_may_identify_any_bot() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, Some(&format!("session={}", ADMIN_SESSION))).await;
    next_event(&mut client).await.unwrap();

    identify(&mut client, BOT_ID).await;
}

#[tokio::test]
async fn successful_identify_cancels_the_identify_deadline() {
    let config = SocketConfig {
        heartbeat_timeout: Duration::from_secs(10),
        heartbeat_interval: Duration::from_millis(100),
        identify_timeout: Duration::from_millis(300),
    };
    let addr = spawn_server(seeded_stores(), config).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    next_event(&mut client).await.unwrap();

    identify(&mut client, BOT_ID).await;

    // Well past the identify deadline, the connection still answers.
    tokio::time::sleep(Duration::from_millis(500)).await;
    send(
        &mut client,
        json!({"type": "request", "statistic": 0, "duration": "beginning"}),
    )
    .await;
    let data = next_event(&mut client).await.unwrap();
    assert_eq!(data["type"], "data");
}

#[tokio::test]
async fn request_before_identify_is_a_no_op() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    next_event(&mut client).await.unwrap();

    send(
        &mut client,
        json!({"type": "request", "statistic": 0, "duration": "beginning"}),
    )
    .await;
    assert_quiet(&mut client, Duration::from_millis(300)).await;

    // The connection is still usable afterwards.
    identify(&mut client, BOT_ID).await;
}

#[tokio::test]
async fn data_frame_carries_windowed_events() {
    let stores = seeded_stores();
    let now = Utc::now().timestamp_millis();
    stores.record_view(BOT_ID, None, 1_000);
    stores.record_view(BOT_ID, Some("100"), now);
    stores.record_invite(BOT_ID, None, now);

    let addr = spawn_server(stores, lenient_config()).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    next_event(&mut client).await.unwrap();
    identify(&mut client, BOT_ID).await;

    // "beginning" is the unbounded window: both views come back.
    send(
        &mut client,
        json!({"type": "request", "statistic": 0, "duration": "beginning"}),
    )
    .await;
    let data = next_event(&mut client).await.unwrap();
    assert_eq!(data["type"], "data");
    assert_eq!(data["viewCount"], 2);
    assert_eq!(data["views"][0]["timestamp"], 1_000);
    assert_eq!(data["duration"], "beginning");
    assert_eq!(data["botAddedAt"], BOT_ADDED_AT);
    assert_eq!(data["timestamp"], "Thu, 01 Jan 1970 00:00:00 GMT");

    // "today" drops the event from 1970.
    send(
        &mut client,
        json!({"type": "request", "statistic": 0, "duration": "today"}),
    )
    .await;
    let data = next_event(&mut client).await.unwrap();
    assert_eq!(data["viewCount"], 1);
    assert_eq!(data["views"][0]["timestamp"], now);

    // Kinds are independent logs with their own wire keys.
    send(
        &mut client,
        json!({"type": "request", "statistic": 1, "duration": "beginning"}),
    )
    .await;
    let data = next_event(&mut client).await.unwrap();
    assert_eq!(data["inviteCount"], 1);
    assert!(data.get("viewCount").is_none());

    send(
        &mut client,
        json!({"type": "request", "statistic": 2, "duration": "beginning"}),
    )
    .await;
    let data = next_event(&mut client).await.unwrap();
    assert_eq!(data["upvoteCount"], 0);
}

#[tokio::test]
async fn re_identify_is_ignored() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    next_event(&mut client).await.unwrap();
    identify(&mut client, BOT_ID).await;

    // A second identify neither acks nor rebinds.
    send(
        &mut client,
        json!({"type": "identify", "bot": OTHER_BOT_ID}),
    )
    .await;
    assert_quiet(&mut client, Duration::from_millis(300)).await;

    send(
        &mut client,
        json!({"type": "request", "statistic": 0, "duration": "beginning"}),
    )
    .await;
    let data = next_event(&mut client).await.unwrap();
    assert_eq!(data["botAddedAt"], BOT_ADDED_AT);
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_swallowed() {
    let addr = spawn_server(seeded_stores(), lenient_config()).await;
    let mut client = connect(addr, Some(&format!("session={}", OWNER_SESSION))).await;
    next_event(&mut client).await.unwrap();
    identify(&mut client, BOT_ID).await;

    client
        .send(Message::Text("not json at all".to_string()))
        .await
        .unwrap();
    send(&mut client, json!({"type": "warp"})).await;
    send(
        &mut client,
        json!({"type": "request", "statistic": 7, "duration": "beginning"}),
    )
    .await;
    send(
        &mut client,
        json!({"type": "request", "statistic": 0, "duration": "fortnight"}),
    )
    .await;
    assert_quiet(&mut client, Duration::from_millis(300)).await;

    // A healthy request still goes through on the same connection.
    send(
        &mut client,
        json!({"type": "request", "statistic": 0, "duration": "beginning"}),
    )
    .await;
    let data = next_event(&mut client).await.unwrap();
    assert_eq!(data["type"], "data");
}
