//! Text-format counter exposition
//!
//! One line per counter in the common Prometheus text format. Keys of the
//! form `name:label` are rendered with the label extracted; op-duration
//! sum/count/max lines are emitted per verb, followed by the fixed gauges.

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use std::fmt::Write;

use crate::metrics::rss_kb;
use crate::AppState;

/// GET /metrics
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = render(&state).await;
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn render(state: &AppState) -> String {
    let store = &state.store;
    let mut out = String::new();

    for (key, value) in store.metrics.counters() {
        match key.split_once(':') {
            Some((name, label)) => {
                let _ = writeln!(
                    out,
                    "parapara_{}_total{{{}=\"{}\"}} {}",
                    sanitize(name),
                    label_name(name),
                    sanitize(label),
                    value
                );
            }
            None => {
                let _ = writeln!(out, "parapara_{}_total {}", sanitize(&key), value);
            }
        }
    }

    for (verb, stats) in store.metrics.ops() {
        let verb = sanitize(&verb);
        let _ = writeln!(out, "parapara_op_duration_ms_sum{{verb=\"{verb}\"}} {}", stats.sum_ms);
        let _ = writeln!(out, "parapara_op_duration_ms_count{{verb=\"{verb}\"}} {}", stats.count);
        let _ = writeln!(out, "parapara_op_duration_ms_max{{verb=\"{verb}\"}} {}", stats.max_ms);
    }

    let _ = writeln!(out, "parapara_clients {}", state.connection_count());
    let _ = writeln!(out, "parapara_rooms {}", store.index_len().await);
    let _ = writeln!(out, "parapara_quarantine {}", store.quarantine_len().await);
    let _ = writeln!(out, "parapara_dirty_rooms {}", store.dirty_len().await);
    let _ = writeln!(out, "parapara_rss_kb {}", rss_kb());

    out
}

/// Label key for a counter family; falls back to a generic name.
fn label_name(family: &str) -> &'static str {
    match family {
        "ws_messages" => "verb",
        "errors" => "code",
        _ => "key",
    }
}

/// Metric names may only contain `[A-Za-z0-9_]`.
fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}
