//! Server configuration
//!
//! Resolution order: command-line argument, then environment variable, then
//! compiled default. Only the port and data directory are exposed as CLI
//! flags; the tuning knobs are environment-only.

use std::path::PathBuf;

/// Runtime configuration, resolved once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP port the HTTP/WebSocket server binds to
    pub port: u16,
    /// Root of the persisted state (`rooms/`, `rooms_index.json`, ...)
    pub data_dir: PathBuf,
    /// Admin key; `None` restricts admin endpoints to localhost peers
    pub admin_key: Option<String>,
    /// Maximum number of rooms held in the in-memory cache
    pub room_cache_max: usize,
    /// Cache entries idle longer than this are evicted (milliseconds)
    pub room_cache_idle_ms: i64,
    /// Lifetime of a frame reservation (milliseconds)
    pub reservation_ms: i64,
    /// Minimum interval between incremental backups (milliseconds)
    pub backup_interval_ms: i64,
    /// Number of backup directories retained by rotation
    pub backup_keep: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            data_dir: PathBuf::from("./data"),
            admin_key: None,
            room_cache_max: 80,
            room_cache_idle_ms: 300_000,
            reservation_ms: 180_000,
            backup_interval_ms: 1_800_000,
            backup_keep: 24,
        }
    }
}

impl Config {
    /// Load configuration from the process environment.
    ///
    /// Unparseable values fall back to the default for that knob rather than
    /// aborting startup.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT", defaults.port),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            admin_key: std::env::var("ADMIN_KEY").ok().filter(|k| !k.is_empty()),
            room_cache_max: env_parse("ROOM_CACHE_MAX", defaults.room_cache_max),
            room_cache_idle_ms: env_parse("ROOM_CACHE_IDLE_MS", defaults.room_cache_idle_ms),
            reservation_ms: env_parse("RESERVATION_MS", defaults.reservation_ms),
            backup_interval_ms: env_parse("BACKUP_INTERVAL_MS", defaults.backup_interval_ms),
            backup_keep: env_parse("BACKUP_KEEP", defaults.backup_keep),
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.parse().unwrap_or(default),
        Err(_) => default,
    }
}
