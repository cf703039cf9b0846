//! Administrative endpoints
//!
//! With `ADMIN_KEY` configured, the key must arrive in the `key` query
//! parameter or the `x-admin-key` header; without it, only localhost peers
//! are accepted. Unauthorized requests get the same empty 404 as undefined
//! paths.

use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use tracing::info;

use crate::ids::normalize_room_id;
use crate::AppState;

fn authorized(
    state: &AppState,
    headers: &HeaderMap,
    params: &HashMap<String, String>,
    addr: &SocketAddr,
) -> bool {
    if let Some(key) = &state.store.config.admin_key {
        let from_query = params.get("key").map(String::as_str);
        let from_header = headers.get("x-admin-key").and_then(|v| v.to_str().ok());
        return from_query == Some(key.as_str()) || from_header == Some(key.as_str());
    }
    is_loopback(addr.ip())
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback(),
        IpAddr::V6(v6) => {
            v6.is_loopback() || v6.to_ipv4_mapped().map_or(false, |v4| v4.is_loopback())
        }
    }
}

fn not_found() -> Response {
    StatusCode::NOT_FOUND.into_response()
}

/// GET /admin/status — extended health for operators.
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers, &params, &addr) {
        return not_found();
    }
    let snapshot = super::health::snapshot(&state, true).await;
    let config = &state.store.config;
    Json(json!({
        "health": snapshot,
        "config": {
            "port": config.port,
            "roomCacheMax": config.room_cache_max,
            "roomCacheIdleMs": config.room_cache_idle_ms,
            "reservationMs": config.reservation_ms,
            "backupIntervalMs": config.backup_interval_ms,
            "backupKeep": config.backup_keep,
            "adminKeyConfigured": config.admin_key.is_some(),
        },
        "rateBuckets": state.store.limiter.bucket_count(),
    }))
    .into_response()
}

/// GET /admin/quarantine?roomId=&mode=on|off|toggle
pub async fn quarantine(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&state, &headers, &params, &addr) {
        return not_found();
    }
    let Some(room_id) = params.get("roomId").and_then(|raw| normalize_room_id(raw)) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "roomId required" })),
        )
            .into_response();
    };
    let mode = params.get("mode").map(String::as_str).unwrap_or("toggle");
    match state.store.set_quarantine(&room_id, mode).await {
        Ok(quarantined) => {
            info!(room_id = %room_id, mode, quarantined, "admin quarantine request");
            Json(json!({ "roomId": room_id, "quarantined": quarantined })).into_response()
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}
