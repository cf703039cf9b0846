//! Room-ID and reservation-token minting
//!
//! Room IDs are 7 characters from `[A-Z0-9]`; tokens are 24 characters from a
//! mixed-case alphanumeric alphabet, long enough that collisions are not a
//! practical concern at the expected concurrency.

use rand::Rng;

const ROOM_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_ID_LEN: usize = 7;

const TOKEN_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_LEN: usize = 24;

/// Fallback pool when a room is created with a blank theme.
pub const THEME_POOL: &[&str] = &[
    "走る犬",
    "跳ねるボール",
    "咲く花",
    "泳ぐ魚",
    "飛ぶ鳥",
    "歩くロボット",
    "回る風車",
    "流れ星",
];

/// Mint a fresh 7-character room ID. Uniqueness is the caller's job
/// (creation retries on collision against the index).
pub fn mint_room_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ROOM_ID_LEN)
        .map(|_| ROOM_ID_ALPHABET[rng.gen_range(0..ROOM_ID_ALPHABET.len())] as char)
        .collect()
}

/// Mint an opaque reservation token.
pub fn mint_reservation_token() -> String {
    let mut rng = rand::thread_rng();
    (0..TOKEN_LEN)
        .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
        .collect()
}

/// Trim, upper-case and validate a client-supplied room ID.
/// Returns `None` when the result does not match `^[A-Z0-9]{6,12}$`.
pub fn normalize_room_id(raw: &str) -> Option<String> {
    let id = raw.trim().to_ascii_uppercase();
    if (6..=12).contains(&id.len()) && id.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
    {
        Some(id)
    } else {
        None
    }
}

/// Trimmed theme, or a random pick from the pool when blank.
pub fn theme_or_random(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        let mut rng = rand::thread_rng();
        THEME_POOL[rng.gen_range(0..THEME_POOL.len())].to_string()
    } else {
        trimmed.to_string()
    }
}
