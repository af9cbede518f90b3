//! `InvertedIndex`: lower-cased keyword -> set of item ids, WAL-backed.
use super::wal;
use crate::error::RecallResult;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalEntry {
    keyword: String,
    item_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    map: std::collections::HashMap<String, HashSet<String>>,
}

pub struct InvertedIndex {
    snapshot_path: PathBuf,
    wal_path: PathBuf,
    map: DashMap<String, HashSet<String>>,
    wal_lines: AtomicUsize,
    compact_threshold: usize,
}

impl InvertedIndex {
    pub fn open(data_root: &std::path::Path, compact_threshold: usize) -> RecallResult<Self> {
        let dir = data_root.join("indexes");
        std::fs::create_dir_all(&dir)?;
        let snapshot_path = dir.join("inverted_index.json");
        let wal_path = dir.join("inverted_wal.jsonl");

        let map = DashMap::new();
        if let Ok(data) = std::fs::read_to_string(&snapshot_path) {
            if let Ok(snap) = serde_json::from_str::<Snapshot>(&data) {
                for (k, v) in snap.map {
                    map.insert(k, v);
                }
            }
        }

        let replayed: Vec<WalEntry> = wal::replay(&wal_path)?;
        let wal_len = replayed.len();
        for entry in replayed {
            map.entry(entry.keyword).or_default().insert(entry.item_id);
        }

        let index = Self {
            snapshot_path,
            wal_path,
            map,
            wal_lines: AtomicUsize::new(wal_len),
            compact_threshold,
        };
        if wal_len > 0 {
            index.compact()?;
        }
        Ok(index)
    }

    pub fn add(&self, keyword: &str, item_id: &str) -> RecallResult<()> {
        let keyword = keyword.to_lowercase();
        self.map.entry(keyword.clone()).or_default().insert(item_id.to_string());
        wal::append_line(
            &self.wal_path,
            &WalEntry {
                keyword,
                item_id: item_id.to_string(),
            },
        )?;
        let count = self.wal_lines.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.compact_threshold {
            self.compact()?;
        }
        Ok(())
    }

    pub fn add_batch(&self, pairs: &[(String, String)]) -> RecallResult<()> {
        for (keyword, item_id) in pairs {
            self.add(keyword, item_id)?;
        }
        Ok(())
    }

    pub fn search(&self, keyword: &str) -> HashSet<String> {
        self.map
            .get(&keyword.to_lowercase())
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn search_all(&self, keywords: &[String]) -> HashSet<String> {
        let mut iter = keywords.iter();
        let Some(first) = iter.next() else {
            return HashSet::new();
        };
        let mut result = self.search(first);
        for kw in iter {
            let set = self.search(kw);
            result = result.intersection(&set).cloned().collect();
            if result.is_empty() {
                break;
            }
        }
        result
    }

    pub fn search_any(&self, keywords: &[String]) -> HashSet<String> {
        let mut result = HashSet::new();
        for kw in keywords {
            result.extend(self.search(kw));
        }
        result
    }

    pub fn remove_by_ids(&self, ids: &HashSet<String>) {
        self.map.retain(|_, v| {
            v.retain(|id| !ids.contains(id));
            !v.is_empty()
        });
    }

    /// Rewrite the in-memory map to a snapshot atomically and truncate the
    /// WAL, so it never needs replaying on the next crash recovery.
    pub fn compact(&self) -> RecallResult<()> {
        let snapshot = Snapshot {
            map: self.map.iter().map(|e| (e.key().clone(), e.value().clone())).collect(),
        };
        wal::write_snapshot_atomic(&self.snapshot_path, &snapshot)?;
        wal::truncate(&self.wal_path)?;
        self.wal_lines.store(0, Ordering::SeqCst);
        Ok(())
    }

    /// Force-persist; callers invoke this from `Engine::close` so the WAL
    /// never needs recovery on the next startup.
    pub fn flush(&self) -> RecallResult<()> {
        self.compact()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) -> RecallResult<()> {
        self.map.clear();
        self.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_and_search() {
        let dir = tempdir().unwrap();
        let idx = InvertedIndex::open(dir.path(), 10_000).unwrap();
        idx.add("DeepSeek", "m1").unwrap();
        idx.add("AI", "m1").unwrap();
        idx.add("AI", "m2").unwrap();

        assert_eq!(idx.search("deepseek"), HashSet::from(["m1".to_string()]));
        assert_eq!(idx.search("ai"), HashSet::from(["m1".to_string(), "m2".to_string()]));
    }

    #[test]
    fn search_all_is_intersection_search_any_is_union() {
        let dir = tempdir().unwrap();
        let idx = InvertedIndex::open(dir.path(), 10_000).unwrap();
        idx.add("rust", "m1").unwrap();
        idx.add("rust", "m2").unwrap();
        idx.add("async", "m1").unwrap();

        let all = idx.search_all(&["rust".to_string(), "async".to_string()]);
        assert_eq!(all, HashSet::from(["m1".to_string()]));

        let any = idx.search_any(&["rust".to_string(), "async".to_string()]);
        assert_eq!(any, HashSet::from(["m1".to_string(), "m2".to_string()]));
    }

    #[test]
    fn compact_truncates_wal_and_preserves_state_on_reload() {
        let dir = tempdir().unwrap();
        {
            let idx = InvertedIndex::open(dir.path(), 3).unwrap();
            idx.add("a", "m1").unwrap();
            idx.add("b", "m1").unwrap();
            idx.add("c", "m1").unwrap(); // triggers compaction at threshold 3
        }
        assert!(!dir.path().join("indexes/inverted_wal.jsonl").exists());

        let idx = InvertedIndex::open(dir.path(), 3).unwrap();
        assert_eq!(idx.search("a"), HashSet::from(["m1".to_string()]));
    }

    #[test]
    fn snapshot_union_replay_equals_in_memory_map_after_crash() {
        let dir = tempdir().unwrap();
        {
            let idx = InvertedIndex::open(dir.path(), 10_000).unwrap();
            idx.add("x", "m1").unwrap();
            idx.compact().unwrap();
            idx.add("y", "m2").unwrap(); // stays in WAL, simulating a crash before next compaction
        }

        let idx = InvertedIndex::open(dir.path(), 10_000).unwrap();
        assert_eq!(idx.search("x"), HashSet::from(["m1".to_string()]));
        assert_eq!(idx.search("y"), HashSet::from(["m2".to_string()]));
    }

    #[test]
    fn remove_by_ids_drops_entries() {
        let dir = tempdir().unwrap();
        let idx = InvertedIndex::open(dir.path(), 10_000).unwrap();
        idx.add("a", "m1").unwrap();
        idx.add("a", "m2").unwrap();

        idx.remove_by_ids(&HashSet::from(["m1".to_string()]));
        assert_eq!(idx.search("a"), HashSet::from(["m2".to_string()]));
    }
}
