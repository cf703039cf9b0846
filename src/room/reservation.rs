//! Frame reservations
//!
//! A reservation grants the sole right to commit one frame until it expires.
//! `reserved_by_frame` is authoritative for ownership; a token present in
//! `reservations` whose frame points at a different token is an orphan and is
//! ignored until `sweep` removes it.

use serde::{Deserialize, Serialize};

use super::{Room, FRAME_COUNT};
use crate::error::{Error, Result};
use crate::ids::mint_reservation_token;

pub const RESERVATION_REJECTED_MSG: &str = "予約が無効または期限切れです";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub frame_index: usize,
    pub expires_at: i64,
}

impl Reservation {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.expires_at <= now_ms
    }
}

impl Room {
    /// Drop every reservation that is expired, commits-over, out of range,
    /// or orphaned by the inverse map. Idempotent; called at the start of
    /// any handler that touches reservations and on deserialization.
    pub fn sweep_reservations(&mut self, now_ms: i64) {
        let committed = &self.committed;
        let reserved_by_frame = &mut self.reserved_by_frame;
        self.reservations.retain(|token, res| {
            let live = !res.is_expired(now_ms)
                && res.frame_index < FRAME_COUNT
                && !committed[res.frame_index]
                && reserved_by_frame.get(&res.frame_index) == Some(token);
            if !live {
                if reserved_by_frame.get(&res.frame_index) == Some(token) {
                    reserved_by_frame.remove(&res.frame_index);
                }
            }
            live
        });
        let reservations = &self.reservations;
        self.reserved_by_frame
            .retain(|_, token| reservations.contains_key(token));
    }

    /// Reserve a specific frame. Precondition: not committed, not reserved.
    pub fn reserve_frame(&mut self, frame_index: usize, now_ms: i64, ttl_ms: i64) -> Result<(String, i64)> {
        if frame_index >= FRAME_COUNT {
            return Err(Error::Validation("frameIndex out of range".into()));
        }
        if self.committed[frame_index] {
            return Err(Error::Conflict("already submitted".into()));
        }
        if self.reserved_by_frame.contains_key(&frame_index) {
            return Err(Error::Conflict("frame already reserved".into()));
        }
        let token = mint_reservation_token();
        let expires_at = now_ms + ttl_ms;
        self.reservations
            .insert(token.clone(), Reservation { frame_index, expires_at });
        self.reserved_by_frame.insert(frame_index, token.clone());
        Ok((token, expires_at))
    }

    /// Reserve the smallest frame index that is neither committed nor
    /// reserved. Errors when every slot is taken.
    pub fn reserve_first_free(&mut self, now_ms: i64, ttl_ms: i64) -> Result<(usize, String, i64)> {
        let frame_index = (0..FRAME_COUNT)
            .find(|i| !self.committed[*i] && !self.reserved_by_frame.contains_key(i))
            .ok_or_else(|| Error::Conflict("no empty frame".into()))?;
        let (token, expires_at) = self.reserve_frame(frame_index, now_ms, ttl_ms)?;
        Ok((frame_index, token, expires_at))
    }

    /// Look up a live reservation without consuming it.
    pub fn reservation_is_live(&self, token: &str, now_ms: i64) -> bool {
        match self.reservations.get(token) {
            Some(res) => {
                !res.is_expired(now_ms)
                    && self.reserved_by_frame.get(&res.frame_index).map(String::as_str)
                        == Some(token)
            }
            None => false,
        }
    }

    /// Verify that `token` currently grants the right to commit
    /// `frame_index`, without consuming it.
    pub fn check_reservation(&self, token: &str, frame_index: usize, now_ms: i64) -> Result<()> {
        let res = self
            .reservations
            .get(token)
            .ok_or_else(|| Error::Reservation(RESERVATION_REJECTED_MSG.into()))?;
        if res.is_expired(now_ms) {
            return Err(Error::Reservation(RESERVATION_REJECTED_MSG.into()));
        }
        // the inverse map decides ownership; an orphaned token is invalid
        if self.reserved_by_frame.get(&res.frame_index).map(String::as_str) != Some(token) {
            return Err(Error::Reservation(RESERVATION_REJECTED_MSG.into()));
        }
        if res.frame_index != frame_index {
            return Err(Error::Reservation("frame mismatch".into()));
        }
        Ok(())
    }

    /// Remove a redeemed reservation from both maps.
    pub fn release_reservation(&mut self, token: &str) {
        if let Some(res) = self.reservations.remove(token) {
            if self.reserved_by_frame.get(&res.frame_index).map(String::as_str) == Some(token) {
                self.reserved_by_frame.remove(&res.frame_index);
            }
        }
    }

    /// Redeem a token for the right to commit `frame_index`, removing it
    /// from both maps on success.
    pub fn consume_reservation(&mut self, token: &str, frame_index: usize, now_ms: i64) -> Result<()> {
        self.check_reservation(token, frame_index, now_ms)?;
        self.release_reservation(token);
        Ok(())
    }
}
