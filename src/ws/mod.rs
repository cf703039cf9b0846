//! WebSocket endpoint
//!
//! Upgrades `/ws` to a persistent text-frame channel. Each connection runs
//! one task that interleaves inbound frames with the process-wide room event
//! stream, forwarding only events for the room the connection is attached
//! to. Oversized frames are rejected by the transport before any handler
//! sees them.

pub mod handlers;
pub mod messages;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::ws::handlers::handle_frame;
use crate::ws::messages::to_wire;
use crate::AppState;

/// Maximum inbound frame size; larger frames drop the connection.
pub const MAX_WS_PAYLOAD: usize = 2_000_000;

/// One room-scoped outbound frame, pre-serialized once for all receivers.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub room_id: String,
    pub wire: String,
}

/// GET /ws
pub async fn ws_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.max_message_size(MAX_WS_PAYLOAD)
        .max_frame_size(MAX_WS_PAYLOAD)
        .on_upgrade(move |socket| handle_socket(state, addr, socket))
}

async fn handle_socket(state: AppState, addr: SocketAddr, socket: WebSocket) {
    state.connections.fetch_add(1, Ordering::Relaxed);
    debug!(peer = %addr, "connection opened");

    let (mut sink, mut stream) = socket.split();
    let mut events = state.events.subscribe();
    // last room successfully joined; scopes which broadcasts we forward
    let mut attached: Option<String> = None;

    loop {
        tokio::select! {
            inbound = stream.next() => {
                let text = match inbound {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // binary/ping/pong
                    Some(Err(err)) => {
                        debug!(peer = %addr, error = %err, "connection error");
                        break;
                    }
                };

                let result = handle_frame(&state.store, addr.ip(), attached.as_deref(), &text).await;
                if let Some(room_id) = result.attach {
                    attached = Some(room_id);
                }
                let mut closed = false;
                for reply in result.replies {
                    if sink.send(Message::Text(to_wire(reply))).await.is_err() {
                        closed = true;
                        break;
                    }
                }
                if closed {
                    break;
                }
                for (room_id, msg) in result.broadcasts {
                    // failures only mean no subscriber is listening
                    let _ = state.events.send(RoomEvent { room_id, wire: to_wire(msg) });
                }
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if attached.as_deref() == Some(event.room_id.as_str()) {
                            if sink.send(Message::Text(event.wire)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // dropped events are recoverable via resync
                        warn!(peer = %addr, skipped, "event stream lagged");
                        state.store.metrics.incr("broadcast_lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    state.connections.fetch_sub(1, Ordering::Relaxed);
    debug!(peer = %addr, "connection closed");
}
