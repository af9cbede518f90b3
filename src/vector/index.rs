//! The `AnnIndex` contract shared by `FlatIndex` and `IvfHnswIndex`, plus
//! the brute-force `FlatIndex` implementation.
use crate::error::RecallResult;
use crate::types::Scope;
use crate::vector::types::Vector;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// One scored hit: `(item_id, cosine_score)`.
pub type ScoredId = (String, f32);

pub trait AnnIndex: Send + Sync {
    fn add(&self, item_id: &str, vector: Vector, scope: Option<&Scope>) -> RecallResult<()>;
    fn search(&self, query: &Vector, top_k: usize, scope: Option<&Scope>) -> Vec<ScoredId>;
    fn remove(&self, item_id: &str);
    fn flush(&self) -> RecallResult<()>;
    fn rebuild(&self) -> RecallResult<()>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    vector: Vector,
    scope: Option<Scope>,
    tombstoned: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    entries: HashMap<String, Entry>,
}

/// Exhaustive cosine-similarity scan. Correct by construction; used directly
/// for small corpora and as the reference the IVF-HNSW index degrades to
/// before it has accumulated enough vectors to train.
pub struct FlatIndex {
    path: std::path::PathBuf,
    entries: RwLock<HashMap<String, Entry>>,
}

impl FlatIndex {
    pub fn open(data_root: &std::path::Path, name: &str) -> RecallResult<Self> {
        let dir = data_root.join("indexes");
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(format!("vector_{name}.json"));
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str::<Snapshot>(&data).ok())
            .map(|s| s.entries)
            .unwrap_or_default();
        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }
}

impl AnnIndex for FlatIndex {
    fn add(&self, item_id: &str, vector: Vector, scope: Option<&Scope>) -> RecallResult<()> {
        let mut entries = self.entries.write().unwrap();
        entries.insert(
            item_id.to_string(),
            Entry {
                vector: vector.normalized(),
                scope: scope.cloned(),
                tombstoned: false,
            },
        );
        Ok(())
    }

    fn search(&self, query: &Vector, top_k: usize, scope: Option<&Scope>) -> Vec<ScoredId> {
        let query = query.clone().normalized();
        let entries = self.entries.read().unwrap();
        let mut scored: Vec<ScoredId> = entries
            .iter()
            .filter(|(_, e)| !e.tombstoned)
            .filter(|(_, e)| match (scope, &e.scope) {
                (Some(s), Some(es)) => s == es,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .map(|(id, e)| (id.clone(), query.cosine_similarity(&e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        scored
    }

    fn remove(&self, item_id: &str) {
        if let Some(entry) = self.entries.write().unwrap().get_mut(item_id) {
            entry.tombstoned = true;
        }
    }

    fn flush(&self) -> RecallResult<()> {
        let entries = self.entries.read().unwrap();
        let snapshot = Snapshot {
            entries: entries.clone(),
        };
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(&snapshot)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn rebuild(&self) -> RecallResult<()> {
        self.entries.write().unwrap().retain(|_, e| !e.tombstoned);
        self.flush()
    }

    fn len(&self) -> usize {
        self.entries.read().unwrap().values().filter(|e| !e.tombstoned).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_returns_results_sorted_descending_by_score() {
        let dir = tempfile::tempdir().unwrap();
        let idx = FlatIndex::open(dir.path(), "test").unwrap();
        idx.add("a", Vector::new(vec![1.0, 0.0]), None).unwrap();
        idx.add("b", Vector::new(vec![0.0, 1.0]), None).unwrap();
        idx.add("c", Vector::new(vec![0.9, 0.1]), None).unwrap();

        let results = idx.search(&Vector::new(vec![1.0, 0.0]), 10, None);
        assert_eq!(results[0].0, "a");
        assert!(results[0].1 >= results[1].1);
    }

    #[test]
    fn scope_filter_excludes_other_scopes() {
        let dir = tempfile::tempdir().unwrap();
        let idx = FlatIndex::open(dir.path(), "test").unwrap();
        let alice = Scope::for_user("alice");
        let bob = Scope::for_user("bob");
        idx.add("a", Vector::new(vec![1.0, 0.0]), Some(&alice)).unwrap();
        idx.add("b", Vector::new(vec![1.0, 0.0]), Some(&bob)).unwrap();

        let results = idx.search(&Vector::new(vec![1.0, 0.0]), 10, Some(&alice));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn remove_tombstones_and_rebuild_drops_it() {
        let dir = tempfile::tempdir().unwrap();
        let idx = FlatIndex::open(dir.path(), "test").unwrap();
        idx.add("a", Vector::new(vec![1.0, 0.0]), None).unwrap();
        idx.remove("a");
        assert!(idx.search(&Vector::new(vec![1.0, 0.0]), 10, None).is_empty());
        idx.rebuild().unwrap();
        assert_eq!(idx.len(), 0);
    }

    #[test]
    fn reload_from_disk_preserves_vectors() {
        let dir = tempfile::tempdir().unwrap();
        {
            let idx = FlatIndex::open(dir.path(), "test").unwrap();
            idx.add("a", Vector::new(vec![1.0, 0.0]), None).unwrap();
            idx.flush().unwrap();
        }
        let idx = FlatIndex::open(dir.path(), "test").unwrap();
        assert_eq!(idx.len(), 1);
    }
}
