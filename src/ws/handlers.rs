//! WebSocket message handlers
//!
//! Every verb shares the same preamble (per-verb counter, rate limit,
//! duration stats) and returns a `HandlerResult`: the point-to-point replies,
//! the room-scoped broadcasts to publish after the per-room critical section
//! is released, and an optional new room attachment for the connection.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{Error, Result};
use crate::ids::{normalize_room_id, theme_or_random};
use crate::room::{valid_data_url, Phase, Room, FRAME_COUNT, RESERVATION_REJECTED_MSG};
use crate::store::Store;
use crate::time::now_ms;
use crate::ws::messages::{
    parse_inbound, ClientMessage, CreatePayload, GetFramePayload, Inbound, JoinByIdPayload,
    JoinRoomPayload, ResyncPayload, RoomStatePayload, ServerMessage, SubmitPayload,
};

const INVALID_DATA_URL_MSG: &str = "dataUrl が不正/大きすぎる";

/// What one inbound frame produced.
#[derive(Debug, Default)]
pub struct HandlerResult {
    /// Sent to the requesting connection, in order
    pub replies: Vec<ServerMessage>,
    /// Published to every connection attached to the room
    pub broadcasts: Vec<(String, ServerMessage)>,
    /// When set, the connection re-binds its room attachment
    pub attach: Option<String>,
}

impl HandlerResult {
    fn silent() -> Self {
        Self::default()
    }

    fn reply(msg: ServerMessage) -> Self {
        Self { replies: vec![msg], ..Self::default() }
    }
}

/// Process one text frame from `addr`. Never errors: failures become
/// `error` frames (or silence, for undecodable JSON).
pub async fn handle_frame(
    store: &Arc<Store>,
    addr: IpAddr,
    attached: Option<&str>,
    text: &str,
) -> HandlerResult {
    let (verb, msg) = match parse_inbound(text) {
        Inbound::Malformed => {
            store.metrics.incr("malformed_json");
            return HandlerResult::silent();
        }
        Inbound::Unknown { verb } => {
            store.metrics.incr("unknown_verb");
            return HandlerResult::reply(ServerMessage::Error {
                code: None,
                message: format!("unknown message type: {verb}"),
                retry_after_ms: None,
            });
        }
        Inbound::Invalid { verb } => (verb, None),
        Inbound::Known { verb, msg } => (verb, Some(msg)),
    };

    store.metrics.incr(&format!("ws_messages:{verb}"));
    if let Err(err) = store.limiter.check(addr, verb, now_ms()) {
        store.metrics.incr("errors:RATE_LIMIT");
        return HandlerResult::reply(ServerMessage::from_error(&err));
    }

    let started = Instant::now();
    let result = match msg {
        None => Err(Error::Validation("invalid payload".into())),
        Some(msg) => run_handler(store, attached, msg).await,
    };
    store
        .metrics
        .record_op(verb, started.elapsed().as_millis() as u64);

    match result {
        Ok(result) => result,
        Err(err) => {
            store.metrics.incr(&format!("errors:{}", err.code()));
            debug!(verb, error = %err, "request rejected");
            HandlerResult::reply(ServerMessage::from_error(&err))
        }
    }
}

async fn run_handler(
    store: &Arc<Store>,
    attached: Option<&str>,
    msg: ClientMessage,
) -> Result<HandlerResult> {
    match msg {
        ClientMessage::Hello => Ok(HandlerResult::reply(ServerMessage::Welcome {
            protocol: 1,
            server_time: now_ms(),
        })),
        ClientMessage::CreatePublicAndSubmit(payload) => create_public(store, payload).await,
        ClientMessage::JoinRandom => join_random(store).await,
        ClientMessage::JoinById(payload) => join_by_id(store, payload).await,
        ClientMessage::JoinRoom(payload) => join_room(store, payload).await,
        ClientMessage::Resync(payload) => resync(store, attached, payload).await,
        ClientMessage::GetFrame(payload) => get_frame(store, payload).await,
        ClientMessage::SubmitFrame(payload) => submit_frame(store, payload).await,
    }
}

/// Normalize, apply the quarantine mask, and load. Absent, quarantined and
/// syntactically invalid IDs are indistinguishable to the caller.
async fn resolve_room(store: &Store, raw_id: &str) -> Result<(String, Arc<Mutex<Room>>)> {
    let room_id = normalize_room_id(raw_id).ok_or(Error::NotFound)?;
    if store.is_quarantined(&room_id).await {
        return Err(Error::NotFound);
    }
    match store.get_room(&room_id).await? {
        Some(handle) => Ok((room_id, handle)),
        None => Err(Error::NotFound),
    }
}

/// Room creation is always a frame-0 submission; there is no bare create.
async fn create_public(store: &Arc<Store>, payload: CreatePayload) -> Result<HandlerResult> {
    if !valid_data_url(&payload.data_url) {
        return Err(Error::Validation(INVALID_DATA_URL_MSG.into()));
    }
    let theme = theme_or_random(&payload.theme);
    let room_id = store.mint_unused_room_id().await?;
    let now = now_ms();
    let mut room = Room::new(room_id.clone(), theme, now);
    room.commit_frame(0, payload.data_url, now);
    let state = RoomStatePayload::from_room(&room);
    store.insert_room(room).await?;
    store.metrics.incr("rooms_created");
    store.metrics.incr("frames_committed");

    Ok(HandlerResult {
        replies: vec![ServerMessage::CreatedPublic(state)],
        broadcasts: vec![(
            room_id.clone(),
            ServerMessage::FrameCommitted { room_id: room_id.clone(), frame_index: 0 },
        )],
        attach: Some(room_id),
    })
}

async fn join_random(store: &Arc<Store>) -> Result<HandlerResult> {
    let Some(room_id) = store.random_joinable_room().await else {
        return Ok(HandlerResult::reply(ServerMessage::Error {
            code: Some("NOT_FOUND".into()),
            message: "no rooms available".into(),
            retry_after_ms: None,
        }));
    };
    match store.get_room(&room_id).await? {
        Some(handle) => assign_frame(store, room_id, handle).await,
        None => {
            // index pointed at a room whose file is gone
            store.remove_index_entry(&room_id).await;
            Ok(HandlerResult::reply(ServerMessage::Error {
                code: Some("RETRY".into()),
                message: "room list changed, retry".into(),
                retry_after_ms: None,
            }))
        }
    }
}

async fn join_by_id(store: &Arc<Store>, payload: JoinByIdPayload) -> Result<HandlerResult> {
    let (room_id, handle) = resolve_room(store, &payload.room_id).await?;
    assign_frame(store, room_id, handle).await
}

/// The shared tail of both joins: sweep, verify the room is still being
/// drawn, reserve the first free frame, persist, respond.
async fn assign_frame(
    store: &Arc<Store>,
    room_id: String,
    handle: Arc<Mutex<Room>>,
) -> Result<HandlerResult> {
    let now = now_ms();
    let mut room = handle.lock().await;
    room.sweep_reservations(now);
    room.normalize_phase();
    if room.phase != Phase::Drawing {
        // completed rooms are not editable and are masked like absent ones
        return Err(Error::NotFound);
    }
    let (frame_index, token, expires_at) =
        room.reserve_first_free(now, store.config.reservation_ms)?;
    store.save_room(&room).await?;
    store.metrics.incr("reservations_issued");

    Ok(HandlerResult {
        replies: vec![ServerMessage::RoomJoined {
            room_id: room_id.clone(),
            theme: room.theme.clone(),
            assigned_frame: frame_index,
            reservation_token: token,
            reservation_expires_at: expires_at,
            filled: room.filled(),
        }],
        broadcasts: Vec::new(),
        attach: Some(room_id),
    })
}

async fn join_room(store: &Arc<Store>, payload: JoinRoomPayload) -> Result<HandlerResult> {
    let (room_id, handle) = resolve_room(store, &payload.room_id).await?;
    let now = now_ms();
    let mut room = handle.lock().await;
    room.sweep_reservations(now);
    room.normalize_phase();

    if !payload.view {
        if let Some(token) = payload.reservation_token.as_deref().filter(|t| !t.is_empty()) {
            if room.phase != Phase::Drawing {
                return Err(Error::Phase);
            }
            if !room.reservation_is_live(token, now) {
                return Err(Error::Reservation(RESERVATION_REJECTED_MSG.into()));
            }
        }
    }

    Ok(HandlerResult {
        replies: vec![ServerMessage::RoomState(RoomStatePayload::from_room(&room))],
        broadcasts: Vec::new(),
        attach: Some(room_id),
    })
}

async fn resync(
    store: &Arc<Store>,
    attached: Option<&str>,
    payload: ResyncPayload,
) -> Result<HandlerResult> {
    let raw_id = payload
        .room_id
        .filter(|id| !id.is_empty())
        .or_else(|| attached.map(String::from))
        .ok_or(Error::NotFound)?;
    let (room_id, handle) = resolve_room(store, &raw_id).await?;
    let now = now_ms();
    let mut room = handle.lock().await;
    room.sweep_reservations(now);
    room.normalize_phase();
    Ok(HandlerResult {
        replies: vec![ServerMessage::RoomState(RoomStatePayload::from_room(&room))],
        broadcasts: Vec::new(),
        attach: Some(room_id),
    })
}

async fn get_frame(store: &Arc<Store>, payload: GetFramePayload) -> Result<HandlerResult> {
    let frame_index = validate_frame_index(payload.frame_index)?;
    let (room_id, handle) = resolve_room(store, &payload.room_id).await?;
    let room = handle.lock().await;
    match room.frames[frame_index].as_ref().filter(|f| !f.is_empty()) {
        // uncommitted frames are not answered; clients poll after
        // frame_committed broadcasts
        None => Ok(HandlerResult::silent()),
        Some(data_url) => Ok(HandlerResult::reply(ServerMessage::FrameData {
            room_id,
            frame_index,
            data_url: data_url.clone(),
        })),
    }
}

/// The critical write path.
async fn submit_frame(store: &Arc<Store>, payload: SubmitPayload) -> Result<HandlerResult> {
    let (room_id, handle) = resolve_room(store, &payload.room_id).await?;

    let now = now_ms();
    let mut room = handle.lock().await;
    room.normalize_phase();
    if room.phase == Phase::Playback {
        return Err(Error::Phase);
    }
    room.sweep_reservations(now);

    let frame_index = validate_frame_index(payload.frame_index)?;
    if payload.reservation_token.is_empty() {
        return Err(Error::Reservation(RESERVATION_REJECTED_MSG.into()));
    }
    room.check_reservation(&payload.reservation_token, frame_index, now)?;
    if room.committed[frame_index] {
        return Err(Error::Conflict("already submitted".into()));
    }
    if !valid_data_url(&payload.data_url) {
        return Err(Error::Validation(INVALID_DATA_URL_MSG.into()));
    }

    room.commit_frame(frame_index, payload.data_url, now);
    room.release_reservation(&payload.reservation_token);
    store.save_room(&room).await?;
    store.metrics.incr("frames_committed");

    let mut broadcasts = vec![(
        room_id.clone(),
        ServerMessage::FrameCommitted { room_id: room_id.clone(), frame_index },
    )];
    if room.is_complete() {
        store.metrics.incr("rooms_completed");
        broadcasts.push((
            room_id.clone(),
            ServerMessage::StartPlayback { room_id: room_id.clone() },
        ));
        broadcasts.push((
            room_id.clone(),
            ServerMessage::RoomState(RoomStatePayload::from_room(&room)),
        ));
    }

    Ok(HandlerResult {
        replies: vec![ServerMessage::Submitted { room_id, frame_index }],
        broadcasts,
        attach: None,
    })
}

fn validate_frame_index(raw: Option<i64>) -> Result<usize> {
    match raw {
        Some(i) if (0..FRAME_COUNT as i64).contains(&i) => Ok(i as usize),
        _ => Err(Error::Validation("frameIndex out of range".into())),
    }
}
