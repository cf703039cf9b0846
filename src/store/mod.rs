//! Room store
//!
//! Bounded in-memory cache of active rooms over the persistence layer, plus
//! the process-wide index, quarantine set, dirty set, metrics and rate
//! limiter. Persistence is write-through: a room is saved before any handler
//! result becomes visible, so evictable cache entries are always clean.

pub mod backup;
pub mod persist;

use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ids::mint_room_id;
use crate::metrics::Metrics;
use crate::rate_limit::RateLimiter;
use crate::room::Room;
use crate::time::now_ms;
use persist::{DataDir, Index, IndexEntry};

const EVICTION_TICK: Duration = Duration::from_secs(15);
const BACKUP_TICK: Duration = Duration::from_secs(30);
const LIMITER_SWEEP_TICK: Duration = Duration::from_secs(60);

struct CacheEntry {
    room: Arc<Mutex<Room>>,
    last_access: Instant,
}

/// Process-wide state, passed explicitly to every handler.
pub struct Store {
    pub config: Config,
    data: DataDir,
    rooms: Mutex<HashMap<String, CacheEntry>>,
    index: Mutex<Index>,
    quarantine: Mutex<HashSet<String>>,
    dirty: Mutex<HashSet<String>>,
    pub metrics: Metrics,
    pub limiter: RateLimiter,
    started: Instant,
}

impl Store {
    /// Open the data directory, loading (or rebuilding) the index and the
    /// quarantine set.
    pub fn open(config: Config) -> Result<Self> {
        let data = DataDir::new(config.data_dir.clone());
        data.ensure()?;
        let index = persist::load_or_rebuild_index(&data)?;
        let quarantine = persist::load_quarantine(&data)?;
        info!(
            data_dir = %data.root().display(),
            rooms = index.len(),
            quarantined = quarantine.len(),
            "store opened"
        );
        Ok(Self {
            config,
            data,
            rooms: Mutex::new(HashMap::new()),
            index: Mutex::new(index),
            quarantine: Mutex::new(quarantine),
            dirty: Mutex::new(HashSet::new()),
            metrics: Metrics::new(),
            limiter: RateLimiter::new(),
            started: Instant::now(),
        })
    }

    pub fn data(&self) -> &DataDir {
        &self.data
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    /// Fetch a room handle, reading through to disk on cache miss. The
    /// loaded room is swept and phase-normalized before exposure.
    pub async fn get_room(&self, room_id: &str) -> Result<Option<Arc<Mutex<Room>>>> {
        {
            let mut rooms = self.rooms.lock().await;
            if let Some(entry) = rooms.get_mut(room_id) {
                entry.last_access = Instant::now();
                return Ok(Some(entry.room.clone()));
            }
        }

        let Some(mut room) = persist::load_room(&self.data, room_id)? else {
            return Ok(None);
        };
        room.sweep_reservations(now_ms());
        room.normalize_phase();
        self.metrics.incr("rooms_loaded");

        let mut rooms = self.rooms.lock().await;
        // A concurrent miss may have loaded the same room; the first insert
        // wins so every caller shares one instance.
        let entry = rooms.entry(room_id.to_string()).or_insert_with(|| CacheEntry {
            room: Arc::new(Mutex::new(room)),
            last_access: Instant::now(),
        });
        entry.last_access = Instant::now();
        Ok(Some(entry.room.clone()))
    }

    /// Persist a newly created room and expose it through the cache.
    pub async fn insert_room(&self, room: Room) -> Result<Arc<Mutex<Room>>> {
        self.save_room(&room).await?;
        let room_id = room.room_id.clone();
        let handle = Arc::new(Mutex::new(room));
        let mut rooms = self.rooms.lock().await;
        rooms.insert(
            room_id,
            CacheEntry { room: handle.clone(), last_access: Instant::now() },
        );
        Ok(handle)
    }

    /// Write-through save: atomic room file, refreshed index entry
    /// (persisted), dirty mark for the next backup. On failure the cache
    /// entry is dropped so the next access reloads the durable state.
    pub async fn save_room(&self, room: &Room) -> Result<()> {
        if let Err(err) = persist::save_room(&self.data, room) {
            error!(room_id = %room.room_id, error = %err, "room save failed");
            self.metrics.incr("errors:INTERNAL");
            self.metrics.set_last_error(now_ms(), "INTERNAL", &err.to_string());
            self.rooms.lock().await.remove(&room.room_id);
            return Err(Error::Internal(format!("failed to persist room {}", room.room_id)));
        }

        {
            let mut index = self.index.lock().await;
            index.insert(room.room_id.clone(), IndexEntry::from_room(room));
            if let Err(err) = persist::atomic_write_json(&self.data.index_file(), &*index) {
                // the index is rebuildable; the room write already succeeded
                warn!(error = %err, "index write failed");
                self.metrics.incr("errors:INDEX_WRITE");
            }
        }
        self.dirty.lock().await.insert(room.room_id.clone());
        self.metrics.incr("rooms_saved");
        Ok(())
    }

    /// Mint a room ID unused by the cache, the index, and the disk.
    pub async fn mint_unused_room_id(&self) -> Result<String> {
        loop {
            let id = mint_room_id();
            let in_index = self.index.lock().await.contains_key(&id);
            let in_cache = self.rooms.lock().await.contains_key(&id);
            if in_index || in_cache || self.data.room_file(&id).exists() {
                self.metrics.incr("room_id_collisions");
                continue;
            }
            return Ok(id);
        }
    }

    // ---- index ----------------------------------------------------------

    pub async fn index_len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn index_entry(&self, room_id: &str) -> Option<IndexEntry> {
        self.index.lock().await.get(room_id).cloned()
    }

    /// Drop a stale index entry whose room file has disappeared.
    pub async fn remove_index_entry(&self, room_id: &str) {
        let mut index = self.index.lock().await;
        if index.remove(room_id).is_some() {
            warn!(room_id = %room_id, "dropped stale index entry");
            if let Err(err) = persist::atomic_write_json(&self.data.index_file(), &*index) {
                warn!(error = %err, "index write failed");
            }
        }
    }

    /// Uniform random pick over joinable rooms: in the index, not
    /// quarantined, not completed, fewer than 60 frames filled.
    pub async fn random_joinable_room(&self) -> Option<String> {
        let index = self.index.lock().await;
        let quarantine = self.quarantine.lock().await;
        let candidates: Vec<&String> = index
            .iter()
            .filter(|(id, entry)| {
                !entry.completed
                    && entry.filled_count < crate::room::FRAME_COUNT
                    && !quarantine.contains(*id)
            })
            .map(|(id, _)| id)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let pick = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[pick].clone())
    }

    // ---- quarantine ------------------------------------------------------

    pub async fn is_quarantined(&self, room_id: &str) -> bool {
        self.quarantine.lock().await.contains(room_id)
    }

    pub async fn quarantine_len(&self) -> usize {
        self.quarantine.lock().await.len()
    }

    /// Apply `on`, `off` or `toggle`; persists atomically and returns the
    /// resulting membership.
    pub async fn set_quarantine(&self, room_id: &str, mode: &str) -> Result<bool> {
        let mut quarantine = self.quarantine.lock().await;
        let quarantined = match mode {
            "on" => {
                quarantine.insert(room_id.to_string());
                true
            }
            "off" => {
                quarantine.remove(room_id);
                false
            }
            "toggle" => {
                if quarantine.remove(room_id) {
                    false
                } else {
                    quarantine.insert(room_id.to_string());
                    true
                }
            }
            other => return Err(Error::Validation(format!("unknown mode: {other}"))),
        };
        persist::save_quarantine(&self.data, &quarantine)?;
        info!(room_id = %room_id, quarantined, "quarantine updated");
        self.metrics.incr("quarantine_updates");
        Ok(quarantined)
    }

    // ---- dirty set / backup ---------------------------------------------

    pub async fn dirty_len(&self) -> usize {
        self.dirty.lock().await.len()
    }

    pub async fn dirty_snapshot(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.dirty.lock().await.iter().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn clear_dirty(&self, ids: &[String]) {
        let mut dirty = self.dirty.lock().await;
        for id in ids {
            dirty.remove(id);
        }
    }

    pub async fn index_snapshot(&self) -> Index {
        self.index.lock().await.clone()
    }

    // ---- cache maintenance ----------------------------------------------

    pub async fn cached_rooms(&self) -> usize {
        self.rooms.lock().await.len()
    }

    pub fn rooms_on_disk(&self) -> usize {
        persist::scan_room_ids(&self.data).map(|ids| ids.len()).unwrap_or(0)
    }

    pub fn backups_count(&self) -> usize {
        std::fs::read_dir(self.data.backups_dir())
            .map(|entries| entries.filter_map(|e| e.ok()).filter(|e| e.path().is_dir()).count())
            .unwrap_or(0)
    }

    /// One maintenance pass: expire reservations of cached rooms, then idle
    /// eviction, then size eviction. Entries with an outstanding handle are
    /// never evicted.
    pub async fn maintain_cache(&self) -> usize {
        // reservation expiry over cached rooms
        let handles: Vec<Arc<Mutex<Room>>> = {
            let rooms = self.rooms.lock().await;
            rooms.values().map(|e| e.room.clone()).collect()
        };
        let now = now_ms();
        for handle in handles {
            handle.lock().await.sweep_reservations(now);
        }

        let idle_limit = Duration::from_millis(self.config.room_cache_idle_ms.max(0) as u64);
        let mut evicted: usize = 0;
        let mut rooms = self.rooms.lock().await;

        rooms.retain(|_, entry| {
            let in_use = Arc::strong_count(&entry.room) > 1;
            let keep = in_use || entry.last_access.elapsed() < idle_limit;
            if !keep {
                evicted += 1;
            }
            keep
        });

        if rooms.len() > self.config.room_cache_max {
            let mut by_age: Vec<(String, Instant)> = rooms
                .iter()
                .filter(|(_, e)| Arc::strong_count(&e.room) == 1)
                .map(|(id, e)| (id.clone(), e.last_access))
                .collect();
            by_age.sort_by_key(|(_, at)| *at);
            let excess = rooms.len().saturating_sub(self.config.room_cache_max);
            for (id, _) in by_age.into_iter().take(excess) {
                rooms.remove(&id);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.metrics.incr_by("cache_evictions", evicted as u64);
            debug!(evicted, cached = rooms.len(), "cache maintenance");
        }
        evicted
    }
}

/// Detached background loops: cache maintenance, incremental backups, rate
/// bucket pruning. Transient failures are logged and never fatal.
pub fn spawn_background_tasks(store: Arc<Store>) {
    let cache_store = store.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(EVICTION_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            cache_store.maintain_cache().await;
        }
    });

    let backup_store = store.clone();
    tokio::spawn(async move {
        let mut last_backup = now_ms();
        let mut tick = tokio::time::interval(BACKUP_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            let now = now_ms();
            if now - last_backup < backup_store.config.backup_interval_ms {
                continue;
            }
            match backup::run_backup(&backup_store).await {
                Ok(Some(report)) => {
                    last_backup = now;
                    info!(
                        rooms = report.rooms,
                        pruned = report.pruned,
                        dir = %report.dir.display(),
                        "incremental backup complete"
                    );
                }
                Ok(None) => {} // nothing dirty
                Err(err) => {
                    error!(error = %err, "backup failed");
                    backup_store.metrics.incr("errors:BACKUP");
                    backup_store
                        .metrics
                        .set_last_error(now_ms(), "INTERNAL", &err.to_string());
                }
            }
        }
    });

    tokio::spawn(async move {
        let mut tick = tokio::time::interval(LIMITER_SWEEP_TICK);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            store.limiter.sweep(now_ms());
        }
    });
}
