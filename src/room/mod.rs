//! Room data model
//!
//! A room is 60 frame slots plus theme, timestamps, phase and the live
//! reservation maps. The disk shape is a separate DTO so the inverse
//! reservation map never hits the file; it is rebuilt on load.

mod reservation;

pub use reservation::{Reservation, RESERVATION_REJECTED_MSG};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Number of frame slots in every room
pub const FRAME_COUNT: usize = 60;
/// Playback rate reported in `room_state`
pub const FPS: u32 = 12;

const DATA_URL_PREFIX: &str = "data:image/";
const DATA_URL_MAX_BYTES: usize = 1_500_000;

/// Accept only `data:image/...` payloads of at most 1,500,000 bytes.
/// No further parsing of the payload is performed.
pub fn valid_data_url(raw: &str) -> bool {
    raw.starts_with(DATA_URL_PREFIX) && raw.len() <= DATA_URL_MAX_BYTES
}

/// Room lifecycle phase. PLAYBACK is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "DRAWING")]
    Drawing,
    #[serde(rename = "PLAYBACK")]
    Playback,
}

/// In-memory room state.
#[derive(Debug, Clone)]
pub struct Room {
    pub room_id: String,
    pub theme: String,
    /// Exactly `FRAME_COUNT` slots; `None` or empty string means uncommitted
    pub frames: Vec<Option<String>>,
    /// Parallel to `frames`; `committed[i]` iff `frames[i]` is non-empty
    pub committed: Vec<bool>,
    pub created_at: i64,
    pub updated_at: i64,
    pub phase: Phase,
    /// token -> reservation
    pub reservations: HashMap<String, Reservation>,
    /// frame index -> owning token; authoritative for frame ownership
    pub reserved_by_frame: HashMap<usize, String>,
}

impl Room {
    /// Fresh DRAWING room with all slots empty.
    pub fn new(room_id: String, theme: String, now_ms: i64) -> Self {
        Self {
            room_id,
            theme,
            frames: vec![None; FRAME_COUNT],
            committed: vec![false; FRAME_COUNT],
            created_at: now_ms,
            updated_at: now_ms,
            phase: Phase::Drawing,
            reservations: HashMap::new(),
            reserved_by_frame: HashMap::new(),
        }
    }

    pub fn filled_count(&self) -> usize {
        self.committed.iter().filter(|c| **c).count()
    }

    pub fn is_complete(&self) -> bool {
        self.committed.iter().all(|c| *c)
    }

    /// Derive `phase` from `committed`. Must run before every external
    /// observation; the stored phase exists only for persistence.
    pub fn normalize_phase(&mut self) {
        self.phase = if self.is_complete() {
            Phase::Playback
        } else {
            Phase::Drawing
        };
    }

    /// Write an image payload into a slot. The caller has already checked
    /// the reservation; this only flips state and the timestamp.
    pub fn commit_frame(&mut self, frame_index: usize, data_url: String, now_ms: i64) {
        self.frames[frame_index] = Some(data_url);
        self.committed[frame_index] = true;
        self.updated_at = now_ms;
        self.normalize_phase();
    }

    /// The `filled` boolean view sent in `room_state` and join responses.
    pub fn filled(&self) -> Vec<bool> {
        self.committed.clone()
    }
}

/// On-disk shape of a room. Reservations are stored as `[token, record]`
/// pairs; `reservedByFrame` is never stored.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomFile {
    pub room_id: String,
    pub theme: String,
    pub frames: Vec<Option<String>>,
    pub committed: Vec<bool>,
    pub created_at: i64,
    pub updated_at: i64,
    pub phase: Phase,
    #[serde(default)]
    pub reservations: Vec<(String, Reservation)>,
}

impl From<&Room> for RoomFile {
    fn from(room: &Room) -> Self {
        let mut reservations: Vec<(String, Reservation)> = room
            .reservations
            .iter()
            .map(|(tok, res)| (tok.clone(), res.clone()))
            .collect();
        reservations.sort_by(|a, b| a.0.cmp(&b.0));
        Self {
            room_id: room.room_id.clone(),
            theme: room.theme.clone(),
            frames: room.frames.clone(),
            committed: room.committed.clone(),
            created_at: room.created_at,
            updated_at: room.updated_at,
            phase: room.phase,
            reservations,
        }
    }
}

impl RoomFile {
    /// Reconstruct the in-memory room. Slot vectors are forced back to
    /// `FRAME_COUNT`, `committed` is re-derived from `frames`, the inverse
    /// reservation map is rebuilt over uncommitted frames only, and the
    /// phase is normalized.
    pub fn into_room(self) -> Room {
        let mut frames = self.frames;
        frames.resize(FRAME_COUNT, None);

        let committed: Vec<bool> = frames
            .iter()
            .map(|slot| slot.as_deref().map_or(false, |s| !s.is_empty()))
            .collect();

        let mut reservations = HashMap::new();
        let mut reserved_by_frame = HashMap::new();
        for (token, res) in self.reservations {
            if res.frame_index < FRAME_COUNT && !committed[res.frame_index] {
                reserved_by_frame
                    .entry(res.frame_index)
                    .or_insert_with(|| token.clone());
            }
            reservations.insert(token, res);
        }

        let mut room = Room {
            room_id: self.room_id,
            theme: self.theme,
            frames,
            committed,
            created_at: self.created_at,
            updated_at: self.updated_at,
            phase: self.phase,
            reservations,
            reserved_by_frame,
        };
        room.normalize_phase();
        room
    }
}
