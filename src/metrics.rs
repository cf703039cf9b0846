//! Process-wide counters and operation timing
//!
//! Counter keys are either a bare name (`malformed_json`) or `name:label`
//! (`ws_messages:submit_frame`); the label half becomes a Prometheus label in
//! the `/metrics` rendering. Locks are sync and never held across awaits.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Mutex;

/// Aggregate duration stats for one WS verb.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpStats {
    pub sum_ms: u64,
    pub count: u64,
    pub max_ms: u64,
}

/// Most recent internal fault, surfaced by /health and /admin/status.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastError {
    pub ts: i64,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<BTreeMap<String, u64>>,
    ops: Mutex<BTreeMap<String, OpStats>>,
    last_error: Mutex<Option<LastError>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, key: &str) {
        self.incr_by(key, 1);
    }

    pub fn incr_by(&self, key: &str, n: u64) {
        let mut counters = self.counters.lock().unwrap();
        *counters.entry(key.to_string()).or_insert(0) += n;
    }

    /// Record one handler invocation of `verb` taking `elapsed_ms`.
    pub fn record_op(&self, verb: &str, elapsed_ms: u64) {
        let mut ops = self.ops.lock().unwrap();
        let stats = ops.entry(verb.to_string()).or_default();
        stats.sum_ms += elapsed_ms;
        stats.count += 1;
        stats.max_ms = stats.max_ms.max(elapsed_ms);
    }

    pub fn set_last_error(&self, ts: i64, code: &str, message: &str) {
        *self.last_error.lock().unwrap() = Some(LastError {
            ts,
            code: code.to_string(),
            message: message.to_string(),
        });
    }

    pub fn last_error(&self) -> Option<LastError> {
        self.last_error.lock().unwrap().clone()
    }

    pub fn counters(&self) -> BTreeMap<String, u64> {
        self.counters.lock().unwrap().clone()
    }

    pub fn ops(&self) -> BTreeMap<String, OpStats> {
        self.ops.lock().unwrap().clone()
    }
}

/// Resident set size in kilobytes, 0 where the proc filesystem is absent.
pub fn rss_kb() -> u64 {
    #[cfg(target_os = "linux")]
    {
        let status = match std::fs::read_to_string("/proc/self/status") {
            Ok(status) => status,
            Err(_) => return 0,
        };
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                return rest.trim().trim_end_matches("kB").trim().parse().unwrap_or(0);
            }
        }
        0
    }
    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}
