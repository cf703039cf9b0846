//! Data-directory layout and atomic JSON persistence
//!
//! Every write lands in a `*.tmp_<pid>_<ts>` sibling first and is renamed
//! over the target, so readers only ever see complete documents. Readers
//! skip tmp leftovers when scanning.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::Result;
use crate::room::{Room, RoomFile, FRAME_COUNT};
use crate::time::now_ms;

/// Resolved layout under the configured data directory.
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rooms_dir(&self) -> PathBuf {
        self.root.join("rooms")
    }

    pub fn room_file(&self, room_id: &str) -> PathBuf {
        self.rooms_dir().join(format!("{room_id}.json"))
    }

    pub fn index_file(&self) -> PathBuf {
        self.root.join("rooms_index.json")
    }

    pub fn quarantine_file(&self) -> PathBuf {
        self.root.join("quarantine.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    /// Create the directory skeleton. Startup fails on error; everything
    /// else assumes the layout exists.
    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(self.rooms_dir())?;
        fs::create_dir_all(self.backups_dir())?;
        Ok(())
    }
}

/// Serialize `value` and atomically replace `path` via tmp+rename.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = tmp_path(path);
    let bytes = serde_json::to_vec(value)?;
    if let Err(err) = fs::write(&tmp, &bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    if let Err(err) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(err.into());
    }
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(format!(".tmp_{}_{}", std::process::id(), now_ms()));
    PathBuf::from(name)
}

/// Parse a JSON file into `T`. `Ok(None)` when the file does not exist.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Load one room from disk. `Ok(None)` when no file exists.
pub fn load_room(data: &DataDir, room_id: &str) -> Result<Option<Room>> {
    let file: Option<RoomFile> = read_json_opt(&data.room_file(room_id))?;
    Ok(file.map(RoomFile::into_room))
}

/// Persist one room atomically.
pub fn save_room(data: &DataDir, room: &Room) -> Result<()> {
    atomic_write_json(&data.room_file(&room.room_id), &RoomFile::from(room))
}

/// Index entry: the metadata needed for random selection without loading
/// the full room.
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub theme: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub filled_count: usize,
    pub completed: bool,
}

impl IndexEntry {
    pub fn from_room(room: &Room) -> Self {
        let filled_count = room.filled_count();
        Self {
            theme: room.theme.clone(),
            created_at: room.created_at,
            updated_at: room.updated_at,
            filled_count,
            completed: room.is_complete() || filled_count >= FRAME_COUNT,
        }
    }
}

pub type Index = HashMap<String, IndexEntry>;

/// Room IDs present on disk, tmp files excluded.
pub fn scan_room_ids(data: &DataDir) -> Result<Vec<String>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(data.rooms_dir())? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(id) = name.strip_suffix(".json") {
            if !id.contains(".tmp_") {
                ids.push(id.to_string());
            }
        }
    }
    ids.sort();
    Ok(ids)
}

/// Load `rooms_index.json`, or rebuild it from the room files when it is
/// missing or unparseable, atomically writing the rebuilt copy.
pub fn load_or_rebuild_index(data: &DataDir) -> Result<Index> {
    match read_json_opt::<Index>(&data.index_file()) {
        Ok(Some(index)) => {
            info!(rooms = index.len(), "room index loaded");
            return Ok(index);
        }
        Ok(None) => info!("room index missing, rebuilding from room files"),
        Err(err) => warn!(error = %err, "room index unreadable, rebuilding from room files"),
    }
    let index = rebuild_index(data)?;
    atomic_write_json(&data.index_file(), &index)?;
    info!(rooms = index.len(), "room index rebuilt");
    Ok(index)
}

/// Scan every room file and derive a fresh index. Corrupt room files are
/// skipped with a warning rather than aborting startup.
pub fn rebuild_index(data: &DataDir) -> Result<Index> {
    let mut index = Index::new();
    for room_id in scan_room_ids(data)? {
        match load_room(data, &room_id) {
            Ok(Some(room)) => {
                index.insert(room.room_id.clone(), IndexEntry::from_room(&room));
            }
            Ok(None) => {}
            Err(err) => {
                warn!(room_id = %room_id, error = %err, "skipping unreadable room file");
            }
        }
    }
    Ok(index)
}

/// Load the quarantine set; absent file means empty.
pub fn load_quarantine(data: &DataDir) -> Result<HashSet<String>> {
    let ids: Option<Vec<String>> = read_json_opt(&data.quarantine_file())?;
    Ok(ids.unwrap_or_default().into_iter().collect())
}

/// Persist the quarantine set atomically, sorted for a stable file.
pub fn save_quarantine(data: &DataDir, set: &HashSet<String>) -> Result<()> {
    let mut ids: Vec<&String> = set.iter().collect();
    ids.sort();
    atomic_write_json(&data.quarantine_file(), &ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Room;
    use tempfile::TempDir;

    fn data_dir() -> (TempDir, DataDir) {
        let tmp = TempDir::new().unwrap();
        let data = DataDir::new(tmp.path().to_path_buf());
        data.ensure().unwrap();
        (tmp, data)
    }

    #[test]
    fn atomic_write_leaves_no_tmp_file() {
        let (_tmp, data) = data_dir();
        let room = Room::new("ROOM001".into(), "t".into(), 0);
        save_room(&data, &room).unwrap();
        let names: Vec<String> = fs::read_dir(data.rooms_dir())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["ROOM001.json"]);
    }

    #[test]
    fn scan_skips_tmp_leftovers() {
        let (_tmp, data) = data_dir();
        let room = Room::new("ROOM001".into(), "t".into(), 0);
        save_room(&data, &room).unwrap();
        fs::write(data.rooms_dir().join("ROOM002.json.tmp_1_2"), b"{").unwrap();
        assert_eq!(scan_room_ids(&data).unwrap(), vec!["ROOM001".to_string()]);
    }

    #[test]
    fn index_rebuild_matches_rooms_on_disk() {
        let (_tmp, data) = data_dir();
        let mut r1 = Room::new("ROOMAAA".into(), "a".into(), 1);
        r1.commit_frame(0, "data:image/png;base64,AA".into(), 2);
        let r2 = Room::new("ROOMBBB".into(), "b".into(), 3);
        save_room(&data, &r1).unwrap();
        save_room(&data, &r2).unwrap();

        let index = load_or_rebuild_index(&data).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index["ROOMAAA"].filled_count, 1);
        assert!(!index["ROOMAAA"].completed);
        assert_eq!(index["ROOMBBB"].filled_count, 0);
        // rebuilt index was persisted
        assert!(data.index_file().exists());
    }

    #[test]
    fn corrupt_index_is_rebuilt() {
        let (_tmp, data) = data_dir();
        let room = Room::new("ROOMAAA".into(), "t".into(), 1);
        save_room(&data, &room).unwrap();
        fs::write(data.index_file(), b"{ not json").unwrap();
        let index = load_or_rebuild_index(&data).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.contains_key("ROOMAAA"));
    }

    #[test]
    fn corrupt_room_file_is_skipped_by_rebuild() {
        let (_tmp, data) = data_dir();
        let room = Room::new("ROOMAAA".into(), "t".into(), 1);
        save_room(&data, &room).unwrap();
        fs::write(data.rooms_dir().join("BADROOM.json"), b"oops").unwrap();
        let index = rebuild_index(&data).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn quarantine_roundtrip() {
        let (_tmp, data) = data_dir();
        assert!(load_quarantine(&data).unwrap().is_empty());
        let set: HashSet<String> = ["ROOMAAA".to_string(), "ROOMBBB".to_string()].into();
        save_quarantine(&data, &set).unwrap();
        assert_eq!(load_quarantine(&data).unwrap(), set);
    }
}
