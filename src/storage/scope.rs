//! `ScopeStore`: per-tenant working memory, plus the `FocusSet` LRU-ish
//! cache of recently-referenced entities.
use crate::error::RecallResult;
use crate::types::{MetaMap, Scope};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A working-memory record. Unlike `Item` in `VolumeStore`, this record can
/// be edited in place by `update` — the append-only log entry it was
/// derived from is never touched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeRecord {
    pub id: String,
    pub content: String,
    pub metadata: MetaMap,
    pub created_at: chrono::DateTime<Utc>,
}

/// One JSON file per scope at `<data_root>/data/<user>/<character>/<session>/memories.json`.
pub struct ScopeStore {
    path: PathBuf,
    records: Mutex<Vec<ScopeRecord>>,
    focus: Mutex<FocusSet>,
}

impl ScopeStore {
    pub fn open(data_root: &Path, scope: &Scope) -> RecallResult<Self> {
        let dir = data_root.join("data").join(scope.path_segment());
        fs::create_dir_all(&dir)?;
        let path = dir.join("memories.json");
        let records = if path.exists() {
            let data = fs::read_to_string(&path)?;
            serde_json::from_str(&data).unwrap_or_default()
        } else {
            Vec::new()
        };
        Ok(Self {
            path,
            records: Mutex::new(records),
            focus: Mutex::new(FocusSet::new(200)),
        })
    }

    fn persist(&self, records: &[ScopeRecord]) -> RecallResult<()> {
        let data = serde_json::to_string(records)?;
        fs::write(&self.path, data)?;
        Ok(())
    }

    pub fn add(&self, id: impl Into<String>, content: impl Into<String>, metadata: MetaMap) -> RecallResult<ScopeRecord> {
        let record = ScopeRecord {
            id: id.into(),
            content: content.into(),
            metadata,
            created_at: Utc::now(),
        };
        let mut records = self.records.lock().unwrap();
        records.push(record.clone());
        self.persist(&records)?;
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<ScopeRecord> {
        self.records.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }

    pub fn search(&self, substr: &str, limit: usize) -> Vec<ScopeRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.content.contains(substr))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn get_all(&self, limit: usize) -> Vec<ScopeRecord> {
        self.records.lock().unwrap().iter().take(limit).cloned().collect()
    }

    pub fn get_recent(&self, limit: usize) -> Vec<ScopeRecord> {
        let records = self.records.lock().unwrap();
        records.iter().rev().take(limit).cloned().collect()
    }

    pub fn update(&self, id: &str, content: Option<String>, metadata: Option<MetaMap>) -> RecallResult<bool> {
        let mut records = self.records.lock().unwrap();
        if let Some(r) = records.iter_mut().find(|r| r.id == id) {
            if let Some(c) = content {
                r.content = c;
            }
            if let Some(m) = metadata {
                r.metadata = m;
            }
            self.persist(&records)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn delete(&self, id: &str) -> RecallResult<bool> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        let removed = records.len() != before;
        if removed {
            self.persist(&records)?;
        }
        Ok(removed)
    }

    pub fn clear(&self) -> RecallResult<()> {
        let mut records = self.records.lock().unwrap();
        records.clear();
        self.persist(&records)?;
        self.focus.lock().unwrap().clear();
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register that `entity_name` was referenced at `now_turn`.
    pub fn touch_focus(&self, entity_name: &str, now_turn: u64) {
        self.focus.lock().unwrap().touch(entity_name, now_turn);
    }

    /// The current top-n focused entities by recency/frequency score.
    pub fn top_focus(&self, n: usize) -> Vec<String> {
        self.focus.lock().unwrap().top(n)
    }
}

/// A bounded, explicitly-scored "focus" set of recently-referenced
/// entities with an explicit eviction policy: score =
/// `access_count / (now_turn - last_access + 1)`, lowest score evicted
/// first once `capacity` is exceeded.
#[derive(Debug)]
struct FocusSet {
    capacity: usize,
    entries: HashMap<String, FocusEntry>,
}

#[derive(Debug, Clone, Copy)]
struct FocusEntry {
    access_count: u64,
    last_access: u64,
}

impl FocusSet {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
        }
    }

    fn score(entry: &FocusEntry, now_turn: u64) -> f64 {
        let recency = (now_turn.saturating_sub(entry.last_access) + 1) as f64;
        entry.access_count as f64 / recency
    }

    fn touch(&mut self, name: &str, now_turn: u64) {
        let entry = self.entries.entry(name.to_string()).or_insert(FocusEntry {
            access_count: 0,
            last_access: now_turn,
        });
        entry.access_count += 1;
        entry.last_access = now_turn;

        if self.entries.len() > self.capacity {
            if let Some(evict_key) = self
                .entries
                .iter()
                .min_by(|a, b| {
                    Self::score(a.1, now_turn)
                        .partial_cmp(&Self::score(b.1, now_turn))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(k, _)| k.clone())
            {
                self.entries.remove(&evict_key);
            }
        }
    }

    fn top(&self, n: usize) -> Vec<String> {
        let now = self.entries.values().map(|e| e.last_access).max().unwrap_or(0);
        let mut scored: Vec<(&String, f64)> = self
            .entries
            .iter()
            .map(|(k, v)| (k, Self::score(v, now)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().take(n).map(|(k, _)| k.clone()).collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_get_update_delete_round_trip() {
        let dir = tempdir().unwrap();
        let store = ScopeStore::open(dir.path(), &Scope::default()).unwrap();

        let record = store.add("m1", "hello world", MetaMap::new()).unwrap();
        assert_eq!(record.id, "m1");
        assert_eq!(store.get("m1").unwrap().content, "hello world");

        store.update("m1", Some("hello rust".to_string()), None).unwrap();
        assert_eq!(store.get("m1").unwrap().content, "hello rust");

        assert!(store.delete("m1").unwrap());
        assert!(store.get("m1").is_none());
    }

    #[test]
    fn search_matches_substring() {
        let dir = tempdir().unwrap();
        let store = ScopeStore::open(dir.path(), &Scope::default()).unwrap();
        store.add("m1", "DeepSeek R1 released", MetaMap::new()).unwrap();
        store.add("m2", "unrelated", MetaMap::new()).unwrap();

        let results = store.search("DeepSeek", 10);
        assert_eq!(results.len(), 1);
    }

    #[test]
    fn clear_empties_store_and_focus() {
        let dir = tempdir().unwrap();
        let store = ScopeStore::open(dir.path(), &Scope::default()).unwrap();
        store.add("m1", "x", MetaMap::new()).unwrap();
        store.touch_focus("Alice", 1);
        store.clear().unwrap();
        assert!(store.is_empty());
        assert!(store.top_focus(10).is_empty());
    }

    #[test]
    fn focus_set_evicts_lowest_score_over_capacity() {
        let mut focus = FocusSet::new(2);
        focus.touch("alice", 1);
        focus.touch("alice", 2);
        focus.touch("bob", 3);
        focus.touch("carol", 4); // should evict bob (lower score than alice/carol)

        let top = focus.top(10);
        assert!(top.contains(&"alice".to_string()));
        assert!(top.contains(&"carol".to_string()));
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn reload_from_disk_preserves_records() {
        let dir = tempdir().unwrap();
        {
            let store = ScopeStore::open(dir.path(), &Scope::default()).unwrap();
            store.add("m1", "persisted", MetaMap::new()).unwrap();
        }
        let store = ScopeStore::open(dir.path(), &Scope::default()).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("m1").unwrap().content, "persisted");
    }
}
