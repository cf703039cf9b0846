//! Incremental backups
//!
//! Each backup snapshots the rooms dirtied since the previous one into a
//! stamped directory alongside the current index and a manifest, then prunes
//! the oldest directories beyond the retention count. Stamps sort lexically
//! in creation order, so pruning is a sort-and-truncate.

use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::warn;

use super::persist::atomic_write_json;
use super::Store;
use crate::error::Result;
use crate::time::{backup_stamp, now_ms};

/// What one backup pass did.
#[derive(Debug)]
pub struct BackupReport {
    pub dir: PathBuf,
    pub rooms: usize,
    pub pruned: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    created_at: i64,
    rooms: Vec<String>,
}

/// Run one incremental backup. Returns `Ok(None)` when the dirty set is
/// empty (nothing to snapshot). The interval gate lives with the caller.
pub async fn run_backup(store: &Store) -> Result<Option<BackupReport>> {
    let dirty = store.dirty_snapshot().await;
    if dirty.is_empty() {
        return Ok(None);
    }

    let dir = store.data().backups_dir().join(backup_stamp());
    fs::create_dir_all(&dir)?;

    let index = store.index_snapshot().await;
    atomic_write_json(&dir.join("rooms_index.json"), &index)?;
    atomic_write_json(
        &dir.join("manifest.json"),
        &Manifest { created_at: now_ms(), rooms: dirty.clone() },
    )?;

    let mut copied = 0;
    for room_id in &dirty {
        let src = store.data().room_file(room_id);
        match fs::copy(&src, dir.join(format!("{room_id}.json"))) {
            Ok(_) => copied += 1,
            Err(err) => {
                // a dirty room whose file vanished is not fatal to the pass
                warn!(room_id = %room_id, error = %err, "backup copy failed");
            }
        }
    }

    store.clear_dirty(&dirty).await;
    store.metrics.incr("backups_run");

    let pruned = prune_backups(store)?;
    Ok(Some(BackupReport { dir, rooms: copied, pruned }))
}

/// Remove the oldest backup directories beyond `backup_keep`, by lexical
/// (= chronological) name order.
pub fn prune_backups(store: &Store) -> Result<usize> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(store.data().backups_dir())?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    let keep = store.config.backup_keep;
    let mut pruned = 0;
    if dirs.len() > keep {
        let excess = dirs.len() - keep;
        for dir in dirs.into_iter().take(excess) {
            match fs::remove_dir_all(&dir) {
                Ok(()) => pruned += 1,
                Err(err) => warn!(dir = %dir.display(), error = %err, "backup prune failed"),
            }
        }
    }
    Ok(pruned)
}
