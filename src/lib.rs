//! parapara-server library
//!
//! Coordination engine for the collaborative 60-frame flipbook game: room
//! store and persistence, the reservation protocol, the WebSocket message
//! state machine, and the admin/observability surface.

use axum::routing::get;
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

pub mod api;
pub mod config;
pub mod error;
pub mod ids;
pub mod metrics;
pub mod rate_limit;
pub mod room;
pub mod store;
pub mod time;
pub mod ws;

pub use config::Config;
pub use error::{Error, Result};
pub use store::Store;
pub use ws::RoomEvent;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    /// Room-scoped event fan-out; each connection subscribes and filters
    /// by its own attachment
    pub events: broadcast::Sender<RoomEvent>,
    connections: Arc<AtomicUsize>,
}

impl AppState {
    pub fn new(store: Arc<Store>) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            events,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::Relaxed)
    }
}

/// Build the application router. Anything outside these routes is a plain
/// 404, including unauthorized admin paths.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(api::health::health))
        .route("/healthz", get(api::health::health))
        .route("/metrics", get(api::metrics::metrics))
        .route("/admin/status", get(api::admin::status))
        .route("/admin/quarantine", get(api::admin::quarantine))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
