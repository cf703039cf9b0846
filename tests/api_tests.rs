//! HTTP endpoint tests over the router
//!
//! Health snapshot in both renderings, the metrics exposition, admin
//! authorization (key and localhost paths), and the crash-recovery story
//! from the operator's point of view.

use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot`

use parapara_server::room::Room;
use parapara_server::{build_router, AppState, Config, Store};

fn test_config(dir: &TempDir) -> Config {
    Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    }
}

/// Router plus the state handle, with a mocked peer address.
fn setup(config: Config, peer: [u8; 4]) -> (Router, AppState) {
    let store = Arc::new(Store::open(config).expect("store should open"));
    let state = AppState::new(store);
    let app = build_router(state.clone())
        .layer(MockConnectInfo(SocketAddr::from((peer, 40000))));
    (app, state)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

fn get_with_header(uri: &str, name: &str, value: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header(name, value)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn seed_room(state: &AppState, room_id: &str, filled: usize) {
    let mut room = Room::new(room_id.to_string(), "テスト".to_string(), 1);
    for i in 0..filled {
        room.commit_frame(i, format!("data:image/png;base64,{i}"), 2);
    }
    state.store.insert_room(room).await.unwrap();
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn health_returns_json_snapshot() {
    let dir = TempDir::new().unwrap();
    let (app, state) = setup(test_config(&dir), [127, 0, 0, 1]);
    seed_room(&state, "ROOMAAA", 3).await;

    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["roomsInIndex"], 1);
    assert_eq!(body["roomsOnDisk"], 1);
    assert_eq!(body["cachedRooms"], 1);
    assert_eq!(body["connections"], 0);
    assert_eq!(body["dirtyRooms"], 1);
    assert_eq!(body["quarantineCount"], 0);
    assert!(body["counters"].is_object());
    assert!(body["dataDir"].as_str().unwrap().contains(dir.path().to_str().unwrap()));
}

#[tokio::test]
async fn healthz_is_an_alias() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = setup(test_config(&dir), [127, 0, 0, 1]);
    let response = app.oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}

#[tokio::test]
async fn health_negotiates_html() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = setup(test_config(&dir), [127, 0, 0, 1]);

    let by_param = app
        .clone()
        .oneshot(get("/health?format=html"))
        .await
        .unwrap();
    let text = body_text(by_param).await;
    assert!(text.starts_with("<!doctype html"));
    assert!(text.contains("roomsInIndex"));

    let by_accept = app
        .oneshot(get_with_header("/health", "accept", "text/html,application/xhtml+xml"))
        .await
        .unwrap();
    assert!(body_text(by_accept).await.starts_with("<!doctype html"));
}

// ============================================================================
// Metrics
// ============================================================================

#[tokio::test]
async fn metrics_exposition_renders_counters_ops_and_gauges() {
    let dir = TempDir::new().unwrap();
    let (app, state) = setup(test_config(&dir), [127, 0, 0, 1]);
    seed_room(&state, "ROOMAAA", 1).await;
    state.store.metrics.incr("ws_messages:hello");
    state.store.metrics.incr("errors:RATE_LIMIT");
    state.store.metrics.incr("malformed_json");
    state.store.metrics.record_op("submit_frame", 12);

    let response = app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("parapara_ws_messages_total{verb=\"hello\"} 1"));
    assert!(text.contains("parapara_errors_total{code=\"RATE_LIMIT\"} 1"));
    assert!(text.contains("parapara_malformed_json_total 1"));
    assert!(text.contains("parapara_op_duration_ms_sum{verb=\"submit_frame\"} 12"));
    assert!(text.contains("parapara_op_duration_ms_count{verb=\"submit_frame\"} 1"));
    assert!(text.contains("parapara_op_duration_ms_max{verb=\"submit_frame\"} 12"));
    assert!(text.contains("parapara_clients 0"));
    assert!(text.contains("parapara_rooms 1"));
    assert!(text.contains("parapara_dirty_rooms 1"));
}

// ============================================================================
// Admin authorization
// ============================================================================

#[tokio::test]
async fn admin_is_open_to_localhost_without_a_key() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = setup(test_config(&dir), [127, 0, 0, 1]);
    let response = app.oneshot(get("/admin/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["health"]["status"], "ok");
    assert_eq!(body["config"]["backupKeep"], 24);
}

#[tokio::test]
async fn admin_refuses_remote_peers_without_a_key() {
    let dir = TempDir::new().unwrap();
    let (app, _state) = setup(test_config(&dir), [203, 0, 113, 9]);
    let admin = app.clone().oneshot(get("/admin/status")).await.unwrap();
    assert_eq!(admin.status(), StatusCode::NOT_FOUND);

    // indistinguishable from an undefined path
    let undefined = app.oneshot(get("/no/such/path")).await.unwrap();
    assert_eq!(undefined.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn admin_key_authorizes_via_query_or_header() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        admin_key: Some("sekrit".to_string()),
        ..test_config(&dir)
    };
    let (app, _state) = setup(config, [203, 0, 113, 9]);

    let no_key = app.clone().oneshot(get("/admin/status")).await.unwrap();
    assert_eq!(no_key.status(), StatusCode::NOT_FOUND);

    let wrong_key = app.clone().oneshot(get("/admin/status?key=guess")).await.unwrap();
    assert_eq!(wrong_key.status(), StatusCode::NOT_FOUND);

    let by_query = app.clone().oneshot(get("/admin/status?key=sekrit")).await.unwrap();
    assert_eq!(by_query.status(), StatusCode::OK);

    let by_header = app
        .oneshot(get_with_header("/admin/status", "x-admin-key", "sekrit"))
        .await
        .unwrap();
    assert_eq!(by_header.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_quarantine_toggles_and_persists() {
    let dir = TempDir::new().unwrap();
    let (app, state) = setup(test_config(&dir), [127, 0, 0, 1]);
    seed_room(&state, "ROOMAAA", 2).await;

    let on = app
        .clone()
        .oneshot(get("/admin/quarantine?roomId=ROOMAAA&mode=on"))
        .await
        .unwrap();
    assert_eq!(on.status(), StatusCode::OK);
    let body = body_json(on).await;
    assert_eq!(body["quarantined"], true);
    assert!(state.store.is_quarantined("ROOMAAA").await);

    let toggled = app
        .clone()
        .oneshot(get("/admin/quarantine?roomId=ROOMAAA"))
        .await
        .unwrap();
    assert_eq!(body_json(toggled).await["quarantined"], false);

    let missing_id = app.oneshot(get("/admin/quarantine")).await.unwrap();
    assert_eq!(missing_id.status(), StatusCode::BAD_REQUEST);
}

// ============================================================================
// Crash recovery, as an operator sees it
// ============================================================================

#[tokio::test]
async fn health_after_index_loss_shows_recovered_rooms() {
    let dir = TempDir::new().unwrap();
    {
        let (_app, state) = setup(test_config(&dir), [127, 0, 0, 1]);
        seed_room(&state, "ROOMAAA", 4).await;
        seed_room(&state, "ROOMBBB", 9).await;
    }
    std::fs::remove_file(dir.path().join("rooms_index.json")).unwrap();

    let (app, state) = setup(test_config(&dir), [127, 0, 0, 1]);
    let response = app.oneshot(get("/health")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["roomsInIndex"], 2);
    assert_eq!(body["roomsOnDisk"], 2);

    // a recovered room is joinable again
    let result = parapara_server::ws::handlers::handle_frame(
        &state.store,
        "127.0.0.1".parse().unwrap(),
        None,
        &serde_json::json!({"t": "join_by_id", "data": {"roomId": "ROOMAAA"}}).to_string(),
    )
    .await;
    let reply = serde_json::to_value(&result.replies[0]).unwrap();
    assert_eq!(reply["t"], "room_joined");
    assert_eq!(reply["data"]["assignedFrame"], 4);
}
