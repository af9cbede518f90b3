//! `VolumeStore`: append-only sharded log of raw items.
//!
//! Volumes are fixed-size buckets of `volume_size` turns (default 100 000),
//! subdivided into files of `file_size` turns each (default 10 000). A
//! top-level manifest tracks `{total_turns, latest_volume, created_at}`.
//! Writes append to the tail file; reads stream the target file. At most
//! `preload_volumes` most-recent volumes are kept fully cached in memory;
//! older volumes load lazily and are not evicted once read, since the
//! in-memory `Item` is cheap relative to the disk round trip it replaces.
use crate::error::RecallResult;
use crate::types::Item;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

const ARCHIVE_DIR: &str = "L3_archive";
const MANIFEST_FILE: &str = "manifest.json";
const ID_INDEX_FILE: &str = "memory_id_index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VolumeManifest {
    total_turns: u64,
    latest_volume: u64,
    created_at: DateTime<Utc>,
}

impl Default for VolumeManifest {
    fn default() -> Self {
        Self {
            total_turns: 0,
            latest_volume: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct VolumeFileEntry {
    file_name: String,
    start_turn: u64,
    end_turn: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct VolumeIndex {
    files: Vec<VolumeFileEntry>,
}

/// Append-only sharded log of raw `Item`s with O(1) lookup by turn number
/// and by item id, and an exhaustive substring-scan fallback that
/// guarantees 100% literal recall even when structured indexes miss.
pub struct VolumeStore {
    data_root: PathBuf,
    volume_size: u64,
    file_size: u64,
    preload_volumes: usize,

    manifest: Mutex<VolumeManifest>,
    /// item id -> turn number, the fast path for `get_by_id`.
    id_index: DashMap<String, u64>,
    /// turn -> item, populated for the `preload_volumes` most-recent
    /// volumes and for anything read on demand.
    cache: DashMap<u64, Item>,
    /// one lock per volume id, serializing appends within that volume.
    volume_locks: DashMap<u64, Mutex<()>>,
}

impl VolumeStore {
    pub fn open(data_root: impl Into<PathBuf>, volume_size: u64, file_size: u64, preload_volumes: usize) -> RecallResult<Self> {
        let data_root = data_root.into();
        fs::create_dir_all(data_root.join(ARCHIVE_DIR))?;

        let manifest = load_manifest(&data_root).unwrap_or_default();
        let id_index = load_id_index(&data_root).unwrap_or_default();

        let store = Self {
            data_root,
            volume_size,
            file_size,
            preload_volumes,
            manifest: Mutex::new(manifest),
            id_index,
            cache: DashMap::new(),
            volume_locks: DashMap::new(),
        };

        store.preload_recent_volumes()?;
        Ok(store)
    }

    fn volume_dir(&self, volume_id: u64) -> PathBuf {
        self.data_root
            .join(ARCHIVE_DIR)
            .join(format!("volume_{:04}", volume_id))
    }

    fn volume_of_turn(&self, turn: u64) -> u64 {
        turn / self.volume_size
    }

    fn volume_lock(&self, volume_id: u64) -> dashmap::mapref::one::Ref<'_, u64, Mutex<()>> {
        self.volume_locks.entry(volume_id).or_insert_with(|| Mutex::new(()));
        self.volume_locks.get(&volume_id).unwrap()
    }

    fn preload_recent_volumes(&self) -> RecallResult<()> {
        let manifest = self.manifest.lock();
        if manifest.total_turns == 0 {
            return Ok(());
        }
        let latest = manifest.latest_volume;
        let start = latest.saturating_sub(self.preload_volumes as u64 - 1);
        drop(manifest);
        for v in start..=latest {
            let _ = self.load_volume_into_cache(v);
        }
        Ok(())
    }

    fn load_volume_into_cache(&self, volume_id: u64) -> RecallResult<()> {
        let dir = self.volume_dir(volume_id);
        if !dir.exists() {
            return Ok(());
        }
        let index = load_volume_index(&dir).unwrap_or_default();
        for entry in &index.files {
            let path = dir.join(&entry.file_name);
            for item in read_jsonl_tolerant(&path)? {
                self.cache.insert(item.turn_number, item);
            }
        }
        Ok(())
    }

    /// Assign the next turn number and durably append `item`.
    pub fn append(&self, mut item: Item) -> RecallResult<u64> {
        let turn = {
            let mut manifest = self.manifest.lock();
            let turn = manifest.total_turns;
            manifest.total_turns += 1;
            manifest.latest_volume = self.volume_of_turn(turn);
            turn
        };
        item.turn_number = turn;

        let volume_id = self.volume_of_turn(turn);
        let lock_ref = self.volume_lock(volume_id);
        let _guard = lock_ref.lock();

        self.append_to_volume(volume_id, &item)?;
        drop(_guard);

        self.id_index.insert(item.id.clone(), turn);
        self.cache.insert(turn, item);

        self.persist_manifest()?;
        self.persist_id_index()?;

        Ok(turn)
    }

    fn append_to_volume(&self, volume_id: u64, item: &Item) -> RecallResult<()> {
        let dir = self.volume_dir(volume_id);
        fs::create_dir_all(&dir)?;

        let mut index = load_volume_index(&dir).unwrap_or_default();
        let volume_start = volume_id * self.volume_size;

        let needs_new_file = match index.files.last() {
            None => true,
            Some(last) => (last.end_turn - last.start_turn) >= self.file_size,
        };

        if needs_new_file {
            let start = index
                .files
                .last()
                .map(|f| f.end_turn)
                .unwrap_or(volume_start);
            let end = start + self.file_size;
            let file_name = format!("turns_{:05}_{:05}.jsonl", start, end);
            index.files.push(VolumeFileEntry {
                file_name,
                start_turn: start,
                end_turn: start,
            });
        }

        let last = index.files.last_mut().unwrap();
        let path = dir.join(&last.file_name);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(item)?;
        writeln!(file, "{}", line)?;
        file.flush()?;
        last.end_turn += 1;

        save_volume_index(&dir, &index)?;
        Ok(())
    }

    pub fn get_by_turn(&self, turn: u64) -> RecallResult<Option<Item>> {
        if let Some(item) = self.cache.get(&turn) {
            return Ok(Some(item.clone()));
        }
        let volume_id = self.volume_of_turn(turn);
        self.load_volume_into_cache(volume_id)?;
        Ok(self.cache.get(&turn).map(|i| i.clone()))
    }

    /// O(1) average via the id -> turn index; falls back to a full linear
    /// scan of every volume so no id is ever silently lost even if the
    /// in-memory index had to be rebuilt.
    pub fn get_by_id(&self, id: &str) -> RecallResult<Option<Item>> {
        if let Some(turn) = self.id_index.get(id) {
            return self.get_by_turn(*turn);
        }
        for item in self.scan_all()? {
            if item.id == id {
                self.id_index.insert(item.id.clone(), item.turn_number);
                return Ok(Some(item));
            }
        }
        Ok(None)
    }

    /// Exhaustive substring scan over loaded and unloaded volumes; the
    /// last-resort matcher that makes recall close to 100% for tokens
    /// every structured index missed.
    pub fn search_content(&self, substr: &str, max_results: usize) -> RecallResult<Vec<Item>> {
        let mut results = Vec::new();
        for item in self.scan_all()? {
            if item.content.contains(substr) {
                results.push(item);
                if results.len() >= max_results {
                    break;
                }
            }
        }
        Ok(results)
    }

    /// Iterate every item across every volume, cache-first.
    fn scan_all(&self) -> RecallResult<Vec<Item>> {
        let total = self.manifest.lock().total_turns;
        if total == 0 {
            return Ok(Vec::new());
        }
        let max_volume = self.volume_of_turn(total.saturating_sub(1));
        let mut items = Vec::new();
        for v in 0..=max_volume {
            self.load_volume_into_cache(v)?;
        }
        for turn in 0..total {
            if let Some(item) = self.cache.get(&turn) {
                items.push(item.clone());
            }
        }
        Ok(items)
    }

    pub fn total_turns(&self) -> u64 {
        self.manifest.lock().total_turns
    }

    pub fn flush(&self) -> RecallResult<()> {
        self.persist_manifest()?;
        self.persist_id_index()?;
        Ok(())
    }

    pub fn clear(&self) -> RecallResult<()> {
        let _ = fs::remove_dir_all(self.data_root.join(ARCHIVE_DIR));
        fs::create_dir_all(self.data_root.join(ARCHIVE_DIR))?;
        *self.manifest.lock() = VolumeManifest::default();
        self.id_index.clear();
        self.cache.clear();
        self.volume_locks.clear();
        self.flush()
    }

    /// Remove an item's id from the index; used by `Engine::delete`. The
    /// underlying log entry is never rewritten (content is immutable once
    /// appended) — this only stops `get_by_id`'s fast path from finding it.
    pub fn forget_id(&self, id: &str) {
        if let Some((_, turn)) = self.id_index.remove(id) {
            self.cache.remove(&turn);
        }
    }

    fn persist_manifest(&self) -> RecallResult<()> {
        let manifest = self.manifest.lock().clone();
        let path = self.data_root.join(MANIFEST_FILE);
        let data = serde_json::to_string_pretty(&manifest)?;
        fs::write(path, data)?;
        Ok(())
    }

    fn persist_id_index(&self) -> RecallResult<()> {
        let map: std::collections::HashMap<String, u64> = self
            .id_index
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();
        let path = self.data_root.join(ID_INDEX_FILE);
        let data = serde_json::to_string(&map)?;
        fs::write(path, data)?;
        Ok(())
    }
}

fn load_manifest(data_root: &Path) -> Option<VolumeManifest> {
    let path = data_root.join(MANIFEST_FILE);
    let data = fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

fn load_id_index(data_root: &Path) -> Option<DashMap<String, u64>> {
    let path = data_root.join(ID_INDEX_FILE);
    let data = fs::read_to_string(path).ok()?;
    let map: std::collections::HashMap<String, u64> = serde_json::from_str(&data).ok()?;
    Some(map.into_iter().collect())
}

fn load_volume_index(dir: &Path) -> Option<VolumeIndex> {
    let path = dir.join("volume_index.json");
    let data = fs::read_to_string(path).ok()?;
    serde_json::from_str(&data).ok()
}

fn save_volume_index(dir: &Path, index: &VolumeIndex) -> RecallResult<()> {
    let path = dir.join("volume_index.json");
    let data = serde_json::to_string(index)?;
    fs::write(path, data)?;
    Ok(())
}

/// Read a JSONL file, tolerating a partial trailing line (the crash
/// recovery requirement: the last line may be cut off mid-write).
fn read_jsonl_tolerant(path: &Path) -> RecallResult<Vec<Item>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut items = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Item>(&line) {
            Ok(item) => items.push(item),
            Err(_) => {
                tracing::warn!(path = %path.display(), "skipping unparseable (likely partial) JSONL line");
                continue;
            }
        }
    }
    Ok(items)
}

impl std::fmt::Debug for VolumeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VolumeStore")
            .field("total_turns", &self.total_turns())
            .field("data_root", &self.data_root)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewItem, Scope};
    use tempfile::tempdir;

    fn new_item(content: &str) -> Item {
        Item::from_new(
            NewItem {
                content: content.to_string(),
                scope: Scope::default(),
                ..Default::default()
            },
            uuid::Uuid::new_v4().to_string(),
            0,
        )
    }

    #[test]
    fn append_assigns_monotonic_turns() {
        let dir = tempdir().unwrap();
        let store = VolumeStore::open(dir.path(), 100_000, 10_000, 2).unwrap();

        let t0 = store.append(new_item("hello alice")).unwrap();
        let t1 = store.append(new_item("hello bob")).unwrap();
        assert_eq!(t0, 0);
        assert_eq!(t1, 1);
        assert_eq!(store.total_turns(), 2);
    }

    #[test]
    fn get_by_id_and_get_by_turn_round_trip() {
        let dir = tempdir().unwrap();
        let store = VolumeStore::open(dir.path(), 100_000, 10_000, 2).unwrap();
        let item = new_item("unique content marker 12345");
        let id = item.id.clone();
        let turn = store.append(item).unwrap();

        let by_turn = store.get_by_turn(turn).unwrap().unwrap();
        assert_eq!(by_turn.id, id);

        let by_id = store.get_by_id(&id).unwrap().unwrap();
        assert_eq!(by_id.turn_number, turn);
    }

    #[test]
    fn search_content_finds_substring() {
        let dir = tempdir().unwrap();
        let store = VolumeStore::open(dir.path(), 100_000, 10_000, 2).unwrap();
        store.append(new_item("the rare token zzqx9 appears here")).unwrap();
        store.append(new_item("unrelated content")).unwrap();

        let results = store.search_content("zzqx9", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn reload_from_disk_preserves_all_items() {
        let dir = tempdir().unwrap();
        {
            let store = VolumeStore::open(dir.path(), 100_000, 10_000, 2).unwrap();
            for i in 0..25 {
                store.append(new_item(&format!("item number {}", i))).unwrap();
            }
            store.flush().unwrap();
        }

        let store = VolumeStore::open(dir.path(), 100_000, 10_000, 2).unwrap();
        assert_eq!(store.total_turns(), 25);
        let results = store.search_content("item number 7", 10).unwrap();
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn clear_removes_everything() {
        let dir = tempdir().unwrap();
        let store = VolumeStore::open(dir.path(), 100_000, 10_000, 2).unwrap();
        store.append(new_item("something")).unwrap();
        store.clear().unwrap();
        assert_eq!(store.total_turns(), 0);
        assert!(store.search_content("something", 10).unwrap().is_empty());
    }

    #[test]
    fn file_rotation_across_multiple_files_within_a_volume() {
        let dir = tempdir().unwrap();
        // tiny file_size to force rotation quickly
        let store = VolumeStore::open(dir.path(), 1_000, 3, 2).unwrap();
        for i in 0..10 {
            store.append(new_item(&format!("row {}", i))).unwrap();
        }
        assert_eq!(store.total_turns(), 10);
        for i in 0..10 {
            assert!(store.get_by_turn(i).unwrap().is_some());
        }
    }
}
