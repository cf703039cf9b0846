//! Health snapshot
//!
//! `/health` and `/healthz` return the same snapshot; `format=html` or an
//! HTML-preferring `Accept` header switches to a table rendering for
//! humans.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{Html, IntoResponse, Json, Response};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::metrics::{rss_kb, LastError, OpStats};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUsage {
    pub rss_kb: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub connections: usize,
    pub rooms_in_index: usize,
    pub rooms_on_disk: usize,
    pub cached_rooms: usize,
    pub backup_count: usize,
    pub quarantine_count: usize,
    pub dirty_rooms: usize,
    pub data_dir: String,
    pub last_error: Option<LastError>,
    pub memory: MemoryUsage,
    pub counters: BTreeMap<String, u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ops: Option<BTreeMap<String, OpStats>>,
}

pub async fn snapshot(state: &AppState, with_ops: bool) -> HealthSnapshot {
    let store = &state.store;
    HealthSnapshot {
        status: "ok",
        uptime_secs: store.uptime_secs(),
        connections: state.connection_count(),
        rooms_in_index: store.index_len().await,
        rooms_on_disk: store.rooms_on_disk(),
        cached_rooms: store.cached_rooms().await,
        backup_count: store.backups_count(),
        quarantine_count: store.quarantine_len().await,
        dirty_rooms: store.dirty_len().await,
        data_dir: store.data().root().display().to_string(),
        last_error: store.metrics.last_error(),
        memory: MemoryUsage { rss_kb: rss_kb() },
        counters: store.metrics.counters(),
        ops: with_ops.then(|| store.metrics.ops()),
    }
}

/// GET /health, GET /healthz
pub async fn health(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let snapshot = snapshot(&state, false).await;
    if wants_html(&params, &headers) {
        Html(render_html(&snapshot)).into_response()
    } else {
        Json(snapshot).into_response()
    }
}

fn wants_html(params: &HashMap<String, String>, headers: &HeaderMap) -> bool {
    if params.get("format").map(String::as_str) == Some("html") {
        return true;
    }
    headers
        .get(header::ACCEPT)
        .and_then(|accept| accept.to_str().ok())
        .map(|accept| accept.contains("text/html"))
        .unwrap_or(false)
}

fn render_html(snapshot: &HealthSnapshot) -> String {
    let mut rows = String::new();
    let mut row = |name: &str, value: String| {
        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td></tr>\n",
            name,
            escape(&value)
        ));
    };
    row("status", snapshot.status.to_string());
    row("uptimeSecs", snapshot.uptime_secs.to_string());
    row("connections", snapshot.connections.to_string());
    row("roomsInIndex", snapshot.rooms_in_index.to_string());
    row("roomsOnDisk", snapshot.rooms_on_disk.to_string());
    row("cachedRooms", snapshot.cached_rooms.to_string());
    row("backupCount", snapshot.backup_count.to_string());
    row("quarantineCount", snapshot.quarantine_count.to_string());
    row("dirtyRooms", snapshot.dirty_rooms.to_string());
    row("dataDir", snapshot.data_dir.clone());
    row("rssKb", snapshot.memory.rss_kb.to_string());
    if let Some(last) = &snapshot.last_error {
        row("lastError", format!("{} {} {}", last.ts, last.code, last.message));
    }
    for (key, value) in &snapshot.counters {
        row(key, value.to_string());
    }
    format!(
        "<!doctype html><html><head><meta charset=\"utf-8\"><title>parapara-server health</title></head>\
         <body><h1>parapara-server</h1><table border=\"1\">\n{rows}</table></body></html>"
    )
}

fn escape(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}
