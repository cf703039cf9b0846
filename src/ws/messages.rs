//! Wire message types
//!
//! Inbound frames arrive as `{t, data}` and are parsed in two stages so a
//! frame that is not JSON at all can be silently dropped, while a known verb
//! with a broken payload gets a validation error. Outbound frames are always
//! wrapped in the versioned envelope `{v, ts, t, data}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;
use crate::room::{Phase, Room, FPS, FRAME_COUNT};
use crate::time::now_ms;

// ---- inbound -------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawInbound {
    t: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePayload {
    #[serde(default)]
    pub theme: String,
    #[serde(default)]
    pub data_url: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinByIdPayload {
    #[serde(default)]
    pub room_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub view: bool,
    #[serde(default)]
    pub reservation_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResyncPayload {
    #[serde(default)]
    pub room_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetFramePayload {
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub frame_index: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitPayload {
    #[serde(default)]
    pub room_id: String,
    #[serde(default)]
    pub frame_index: Option<i64>,
    #[serde(default)]
    pub reservation_token: String,
    #[serde(default)]
    pub data_url: String,
}

/// A fully parsed inbound message.
#[derive(Debug)]
pub enum ClientMessage {
    Hello,
    CreatePublicAndSubmit(CreatePayload),
    JoinRandom,
    JoinById(JoinByIdPayload),
    JoinRoom(JoinRoomPayload),
    Resync(ResyncPayload),
    GetFrame(GetFramePayload),
    SubmitFrame(SubmitPayload),
}

/// Outcome of parsing one text frame.
#[derive(Debug)]
pub enum Inbound {
    Known { verb: &'static str, msg: ClientMessage },
    /// Known verb, payload that does not deserialize
    Invalid { verb: &'static str },
    Unknown { verb: String },
    /// Not a `{t, data}` JSON object at all; dropped without response
    Malformed,
}

pub fn parse_inbound(text: &str) -> Inbound {
    let raw: RawInbound = match serde_json::from_str(text) {
        Ok(raw) => raw,
        Err(_) => return Inbound::Malformed,
    };
    fn payload<T: serde::de::DeserializeOwned>(
        verb: &'static str,
        data: Value,
        wrap: impl FnOnce(T) -> ClientMessage,
    ) -> Inbound {
        match serde_json::from_value(data) {
            Ok(parsed) => Inbound::Known { verb, msg: wrap(parsed) },
            Err(_) => Inbound::Invalid { verb },
        }
    }
    match raw.t.as_str() {
        "hello" => Inbound::Known { verb: "hello", msg: ClientMessage::Hello },
        "join_random" => Inbound::Known { verb: "join_random", msg: ClientMessage::JoinRandom },
        "create_public_and_submit" => payload(
            "create_public_and_submit",
            raw.data,
            ClientMessage::CreatePublicAndSubmit,
        ),
        "join_by_id" => payload("join_by_id", raw.data, ClientMessage::JoinById),
        "join_room" => payload("join_room", raw.data, ClientMessage::JoinRoom),
        "resync" => payload("resync", raw.data, ClientMessage::Resync),
        "get_frame" => payload("get_frame", raw.data, ClientMessage::GetFrame),
        "submit_frame" => payload("submit_frame", raw.data, ClientMessage::SubmitFrame),
        _ => Inbound::Unknown { verb: raw.t },
    }
}

// ---- outbound ------------------------------------------------------------

/// The `room_state` payload. Never carries frame payloads; clients fetch
/// those one at a time with `get_frame`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStatePayload {
    pub room_id: String,
    pub theme: String,
    pub frame_count: usize,
    pub fps: u32,
    pub phase: Phase,
    pub created_at: i64,
    pub updated_at: i64,
    pub filled: Vec<bool>,
    pub completed: bool,
}

impl RoomStatePayload {
    pub fn from_room(room: &Room) -> Self {
        Self {
            room_id: room.room_id.clone(),
            theme: room.theme.clone(),
            frame_count: FRAME_COUNT,
            fps: FPS,
            phase: room.phase,
            created_at: room.created_at,
            updated_at: room.updated_at,
            filled: room.filled(),
            completed: room.is_complete(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "t", content = "data", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome {
        protocol: u32,
        server_time: i64,
    },
    CreatedPublic(RoomStatePayload),
    RoomJoined {
        room_id: String,
        theme: String,
        assigned_frame: usize,
        reservation_token: String,
        reservation_expires_at: i64,
        filled: Vec<bool>,
    },
    RoomState(RoomStatePayload),
    FrameData {
        room_id: String,
        frame_index: usize,
        data_url: String,
    },
    FrameCommitted {
        room_id: String,
        frame_index: usize,
    },
    Submitted {
        room_id: String,
        frame_index: usize,
    },
    StartPlayback {
        room_id: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        retry_after_ms: Option<i64>,
    },
}

impl ServerMessage {
    /// The standard rendering of a handler failure.
    pub fn from_error(err: &Error) -> Self {
        let retry_after_ms = match err {
            Error::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        };
        ServerMessage::Error {
            code: Some(err.code().to_string()),
            message: err.client_message(),
            retry_after_ms,
        }
    }
}

/// Versioned outbound envelope.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub v: u32,
    pub ts: i64,
    #[serde(flatten)]
    pub msg: ServerMessage,
}

/// Serialize an outbound message in its envelope.
pub fn to_wire(msg: ServerMessage) -> String {
    let envelope = Envelope { v: 1, ts: now_ms(), msg };
    // the envelope contains nothing unserializable
    serde_json::to_string(&envelope).unwrap_or_else(|_| {
        r#"{"v":1,"ts":0,"t":"error","data":{"message":"server error"}}"#.to_string()
    })
}
