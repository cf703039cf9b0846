//! Per-source, per-verb rate limiting
//!
//! Fixed-window buckets keyed by `(remote address, verb)`. Buckets are
//! created lazily with the verb's configured window and max, and a
//! background sweep drops buckets whose window has closed.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;

use crate::error::{Error, Result};

/// Window and message budget for one verb.
#[derive(Debug, Clone, Copy)]
pub struct VerbLimit {
    pub window_ms: i64,
    pub max: u32,
}

/// Per-verb limits. Anything not listed uses the default bucket.
pub fn limit_for(verb: &str) -> VerbLimit {
    match verb {
        "hello" => VerbLimit { window_ms: 10_000, max: 120 },
        "get_frame" => VerbLimit { window_ms: 10_000, max: 90 },
        "join_room" => VerbLimit { window_ms: 10_000, max: 40 },
        "resync" => VerbLimit { window_ms: 10_000, max: 30 },
        "join_random" | "join_by_id" => VerbLimit { window_ms: 10_000, max: 18 },
        "create_public_and_submit" => VerbLimit { window_ms: 60_000, max: 12 },
        "submit_frame" => VerbLimit { window_ms: 60_000, max: 10 },
        _ => VerbLimit { window_ms: 10_000, max: 50 },
    }
}

#[derive(Debug)]
struct Bucket {
    count: u32,
    reset_at: i64,
}

/// Process-wide limiter shared by every connection.
#[derive(Debug, Default)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<(IpAddr, String), Bucket>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one message of `verb` from `addr`. Over-budget messages get a
    /// `RateLimited` error carrying the retry hint.
    pub fn check(&self, addr: IpAddr, verb: &str, now_ms: i64) -> Result<()> {
        let limit = limit_for(verb);
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry((addr, verb.to_string()))
            .or_insert_with(|| Bucket { count: 0, reset_at: now_ms + limit.window_ms });
        if now_ms >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now_ms + limit.window_ms;
        }
        bucket.count += 1;
        if bucket.count > limit.max {
            return Err(Error::RateLimited {
                retry_after_ms: (bucket.reset_at - now_ms).max(0),
            });
        }
        Ok(())
    }

    /// Drop buckets whose window has already closed.
    pub fn sweep(&self, now_ms: i64) -> usize {
        let mut buckets = self.buckets.lock().unwrap();
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.reset_at > now_ms);
        before - buckets.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn localhost() -> IpAddr {
        "127.0.0.1".parse().unwrap()
    }

    #[test]
    fn submit_frame_limit_is_ten_per_minute() {
        let limiter = RateLimiter::new();
        for _ in 0..10 {
            limiter.check(localhost(), "submit_frame", 0).unwrap();
        }
        let err = limiter.check(localhost(), "submit_frame", 1_000).unwrap_err();
        match err {
            Error::RateLimited { retry_after_ms } => {
                assert_eq!(retry_after_ms, 59_000);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn window_reset_restores_budget() {
        let limiter = RateLimiter::new();
        for _ in 0..13 {
            let _ = limiter.check(localhost(), "create_public_and_submit", 0);
        }
        assert!(limiter.check(localhost(), "create_public_and_submit", 0).is_err());
        assert!(limiter.check(localhost(), "create_public_and_submit", 60_000).is_ok());
    }

    #[test]
    fn sources_and_verbs_are_independent() {
        let limiter = RateLimiter::new();
        let other: IpAddr = "10.0.0.9".parse().unwrap();
        for _ in 0..10 {
            limiter.check(localhost(), "submit_frame", 0).unwrap();
        }
        assert!(limiter.check(localhost(), "submit_frame", 0).is_err());
        assert!(limiter.check(other, "submit_frame", 0).is_ok());
        assert!(limiter.check(localhost(), "hello", 0).is_ok());
    }

    #[test]
    fn sweep_drops_closed_windows() {
        let limiter = RateLimiter::new();
        limiter.check(localhost(), "hello", 0).unwrap();
        limiter.check(localhost(), "resync", 0).unwrap();
        assert_eq!(limiter.bucket_count(), 2);
        assert_eq!(limiter.sweep(10_000), 2);
        assert_eq!(limiter.bucket_count(), 0);
    }
}
