//! Error types for parapara-server
//!
//! One enum per the error taxonomy; each variant maps to a stable wire code
//! carried in outbound `error` frames so clients never match on prose.

use thiserror::Error;

/// Crate-wide result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to clients or logged by background tasks.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed roomId, out-of-range frameIndex, invalid dataUrl
    #[error("{0}")]
    Validation(String),

    /// Room absent, quarantined, or completed when requested for editing.
    /// Always the same message so quarantine decisions do not leak.
    #[error("room not found")]
    NotFound,

    /// Reservation token missing, expired, or mismatched
    #[error("{0}")]
    Reservation(String),

    /// Submission to a room already in playback
    #[error("not accepting submissions")]
    Phase,

    /// Frame already committed, or no frame left to reserve
    #[error("{0}")]
    Conflict(String),

    /// Too-frequent messages of one verb from one source
    #[error("rate limited")]
    RateLimited { retry_after_ms: i64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-readable code for the wire `error` frame.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "VALIDATION",
            Error::NotFound => "NOT_FOUND",
            Error::Reservation(_) => "RESERVATION",
            Error::Phase => "PHASE",
            Error::Conflict(_) => "CONFLICT",
            Error::RateLimited { .. } => "RATE_LIMIT",
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "INTERNAL",
        }
    }

    /// Message shown to the client. Internal failures are collapsed to a
    /// generic string; the detail goes to the log and the last-error slot.
    pub fn client_message(&self) -> String {
        match self {
            Error::Io(_) | Error::Json(_) | Error::Internal(_) => "server error".to_string(),
            other => other.to_string(),
        }
    }

    /// True for the variants that indicate a server-side fault.
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Io(_) | Error::Json(_) | Error::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_is_uniform() {
        assert_eq!(Error::NotFound.to_string(), "room not found");
    }

    #[test]
    fn internal_detail_is_not_shown_to_clients() {
        let err = Error::Internal("disk exploded".into());
        assert_eq!(err.client_message(), "server error");
        assert_eq!(err.code(), "INTERNAL");
    }

    #[test]
    fn rate_limit_code() {
        let err = Error::RateLimited { retry_after_ms: 1200 };
        assert_eq!(err.code(), "RATE_LIMIT");
    }
}
