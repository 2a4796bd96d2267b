// tests/bridge_http.rs
//
// WhatsApp bridge backend against a fake bridge served by axum on a
// loopback port.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use shorts_drop_bot::events::EventBus;
use shorts_drop_bot::messenger::bridge::BridgeMessenger;
use shorts_drop_bot::messenger::{find_target_group, Messenger};
use shorts_drop_bot::session::SessionMonitor;

#[derive(Clone, Default)]
struct FakeBridge {
    status: Arc<Mutex<String>>,
    texts: Arc<Mutex<Vec<Value>>>,
    uploads: Arc<Mutex<Vec<(String, usize)>>>,
    api_keys: Arc<Mutex<Vec<String>>>,
}

async fn session(
    State(bridge): State<FakeBridge>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Json<Value> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        bridge.api_keys.lock().unwrap().push(key.to_string());
    }
    let status = bridge.status.lock().unwrap().clone();
    Json(json!({
        "name": name,
        "status": status,
        "me": if status == "WORKING" {
            json!({ "id": "34600111222@c.us", "pushName": "Shorts Bot" })
        } else {
            Value::Null
        }
    }))
}

async fn qr(Query(params): Query<HashMap<String, String>>) -> Result<Json<Value>, StatusCode> {
    if params.get("format").map(String::as_str) != Some("raw") {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(Json(json!({ "mimetype": "text/plain", "value": "2@pairing-code" })))
}

async fn groups() -> Json<Value> {
    Json(json!([
        { "id": "120363000000000001@g.us", "subject": "Familia" },
        { "id": { "_serialized": "120363000000000002@g.us" }, "subject": "Club Dev" },
        { "id": "120363000000000003@g.us" }
    ]))
}

async fn send_text(State(bridge): State<FakeBridge>, Json(body): Json<Value>) -> Json<Value> {
    bridge.texts.lock().unwrap().push(body);
    Json(json!({ "id": "msg-1" }))
}

async fn send_video(State(bridge): State<FakeBridge>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    bridge.uploads.lock().unwrap().push((content_type, body.len()));
    Json(json!({ "id": "msg-2" }))
}

async fn logout(State(bridge): State<FakeBridge>) -> StatusCode {
    *bridge.status.lock().unwrap() = "STOPPED".to_string();
    StatusCode::CREATED
}

async fn spawn_bridge(bridge: FakeBridge) -> String {
    let app = Router::new()
        .route("/api/sessions/:name", get(session))
        .route("/api/sessions/:name/logout", post(logout))
        .route("/api/:name/auth/qr", get(qr))
        .route("/api/:name/groups", get(groups))
        .route("/api/sendText", post(send_text))
        .route("/api/sendVideo", post(send_video))
        .with_state(bridge);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/", addr)
}

fn client(base_url: &str, api_key: Option<&str>) -> BridgeMessenger {
    BridgeMessenger::new(
        base_url,
        "default",
        api_key.map(str::to_string),
        Duration::from_millis(50),
    )
    .unwrap()
}

#[tokio::test]
async fn status_polls_drive_the_session_monitor() {
    let bridge = FakeBridge::default();
    *bridge.status.lock().unwrap() = "SCAN_QR_CODE".to_string();
    let url = spawn_bridge(bridge.clone()).await;
    let messenger = client(&url, Some("bridge-key"));

    let bus = EventBus::default();
    let mut rx = bus.subscribe();
    let monitor = SessionMonitor::new(bus);

    messenger.sync_state(&monitor).await.unwrap();
    assert_eq!(monitor.state().await.qr(), Some("2@pairing-code"));
    assert_eq!(rx.recv().await.unwrap().name(), "qr-update");

    *bridge.status.lock().unwrap() = "WORKING".to_string();
    messenger.sync_state(&monitor).await.unwrap();
    let state = monitor.state().await;
    assert!(state.is_ready());
    assert_eq!(state.user().unwrap().name, "Shorts Bot");
    assert_eq!(rx.recv().await.unwrap().name(), "user-connected");

    messenger.logout().await.unwrap();
    messenger.sync_state(&monitor).await.unwrap();
    assert!(!monitor.is_ready().await);
    assert_eq!(rx.recv().await.unwrap().name(), "session-closed");

    assert!(bridge
        .api_keys
        .lock()
        .unwrap()
        .iter()
        .all(|k| k == "bridge-key"));
}

#[tokio::test]
async fn groups_text_and_video_go_through_the_bridge() {
    let bridge = FakeBridge::default();
    let url = spawn_bridge(bridge.clone()).await;
    let messenger = client(&url, None);

    let groups = messenger.joined_groups().await.unwrap();
    assert_eq!(groups.len(), 2, "groups without a subject are skipped");
    let target = find_target_group(&groups, "club dev").unwrap();
    assert_eq!(target.id, "120363000000000002@g.us");

    messenger.send_text(&target, "hola").await.unwrap();
    let texts = bridge.texts.lock().unwrap().clone();
    assert_eq!(texts[0]["chatId"], "120363000000000002@g.us");
    assert_eq!(texts[0]["session"], "default");
    assert_eq!(texts[0]["text"], "hola");

    let dir = tempfile::tempdir().unwrap();
    let video = dir.path().join("a1.mp4");
    std::fs::write(&video, vec![7u8; 2048]).unwrap();
    messenger.send_video(&target, &video, "🎬 *Video*").await.unwrap();

    let uploads = bridge.uploads.lock().unwrap().clone();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].0.starts_with("multipart/form-data"));
    assert!(uploads[0].1 > 2048);
}

#[tokio::test]
async fn unreachable_bridge_is_an_error() {
    let messenger = client("http://127.0.0.1:9", None);
    let monitor = SessionMonitor::new(EventBus::default());

    assert!(messenger.sync_state(&monitor).await.is_err());
    assert!(messenger.joined_groups().await.is_err());
}
