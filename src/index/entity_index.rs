//! `EntityIndex`: name/alias -> `Entity` lookup, backed by a WAL snapshot of
//! the same shape as `InvertedIndex`, but storing full `Entity` records
//! rather than keyword sets.
use super::wal;
use crate::entity::{Entity, EntityType};
use crate::error::RecallResult;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WalEntry {
    entity: Entity,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    entities: Vec<Entity>,
}

pub struct EntityIndex {
    snapshot_path: PathBuf,
    wal_path: PathBuf,
    entities: DashMap<String, Entity>,
}

impl EntityIndex {
    pub fn open(data_root: &std::path::Path) -> RecallResult<Self> {
        let dir = data_root.join("indexes");
        std::fs::create_dir_all(&dir)?;
        let snapshot_path = dir.join("entity_index.json");
        let wal_path = dir.join("entity_wal.jsonl");

        let entities = DashMap::new();
        if let Ok(data) = std::fs::read_to_string(&snapshot_path) {
            if let Ok(snap) = serde_json::from_str::<Snapshot>(&data) {
                for e in snap.entities {
                    entities.insert(e.id.clone(), e);
                }
            }
        }
        for entry in wal::replay::<WalEntry>(&wal_path)? {
            entities.insert(entry.entity.id.clone(), entry.entity);
        }

        Ok(Self {
            snapshot_path,
            wal_path,
            entities,
        })
    }

    fn persist(&self, entity: &Entity) -> RecallResult<()> {
        wal::append_line(&self.wal_path, &WalEntry { entity: entity.clone() })
    }

    /// Record an occurrence of `name` at `item_id`, creating the entity if
    /// it doesn't already exist (by exact case-insensitive name/alias
    /// match), or merging into the existing one otherwise.
    pub fn add_occurrence(
        &self,
        name: &str,
        entity_type: EntityType,
        item_id: &str,
    ) -> RecallResult<Entity> {
        if let Some(existing_id) = self.find_id_by_name(name) {
            let mut entity = self.entities.get_mut(&existing_id).unwrap();
            entity.turn_references.insert(item_id.to_string());
            entity.bump_confidence(0.1);
            entity.maybe_upgrade_type(&entity_type);
            let snapshot = entity.clone();
            drop(entity);
            self.persist(&snapshot)?;
            return Ok(snapshot);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let mut entity = Entity::new(id, name, entity_type);
        entity.turn_references.insert(item_id.to_string());
        self.entities.insert(entity.id.clone(), entity.clone());
        self.persist(&entity)?;
        Ok(entity)
    }

    fn find_id_by_name(&self, name: &str) -> Option<String> {
        self.entities
            .iter()
            .find(|e| e.value().matches_name(name))
            .map(|e| e.key().clone())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Entity> {
        self.entities.iter().find(|e| e.value().matches_name(name)).map(|e| e.value().clone())
    }

    pub fn get_by_id(&self, id: &str) -> Option<Entity> {
        self.entities.get(id).map(|e| e.value().clone())
    }

    /// Substring-contains search over name and aliases, case-insensitive.
    pub fn search(&self, prefix: &str) -> Vec<Entity> {
        let needle = prefix.to_lowercase();
        self.entities
            .iter()
            .filter(|e| {
                e.value().name.to_lowercase().contains(&needle)
                    || e.value().aliases.iter().any(|a| a.to_lowercase().contains(&needle))
            })
            .map(|e| e.value().clone())
            .collect()
    }

    /// Top-n entities by confidence, then by reference count.
    pub fn get_top(&self, n: usize) -> Vec<Entity> {
        let mut all: Vec<Entity> = self.entities.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.turn_references.len().cmp(&a.turn_references.len()))
        });
        all.truncate(n);
        all
    }

    /// Store a generated summary for `entity_id`, stamping
    /// `last_summary_update`. No-op if the entity no longer exists (e.g. it
    /// was deleted between the summarizer reading it and writing back).
    pub fn set_summary(&self, entity_id: &str, summary: String) -> RecallResult<()> {
        let Some(mut entry) = self.entities.get_mut(entity_id) else {
            return Ok(());
        };
        entry.summary = Some(summary);
        entry.last_summary_update = Some(chrono::Utc::now());
        let snapshot = entry.clone();
        drop(entry);
        self.persist(&snapshot)
    }

    pub fn remove_by_item_ids(&self, item_ids: &HashSet<String>) -> RecallResult<()> {
        let mut touched = Vec::new();
        for mut entry in self.entities.iter_mut() {
            let before = entry.turn_references.len();
            entry.turn_references.retain(|id| !item_ids.contains(id));
            if entry.turn_references.len() != before {
                touched.push(entry.value().clone());
            }
        }
        self.entities.retain(|_, e| !e.turn_references.is_empty());
        for entity in touched {
            if self.entities.contains_key(&entity.id) {
                self.persist(&entity)?;
            }
        }
        self.compact()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn all(&self) -> Vec<Entity> {
        self.entities.iter().map(|e| e.value().clone()).collect()
    }

    pub fn compact(&self) -> RecallResult<()> {
        let snapshot = Snapshot {
            entities: self.entities.iter().map(|e| e.value().clone()).collect(),
        };
        wal::write_snapshot_atomic(&self.snapshot_path, &snapshot)?;
        wal::truncate(&self.wal_path)?;
        Ok(())
    }

    pub fn flush(&self) -> RecallResult<()> {
        self.compact()
    }

    pub fn clear(&self) -> RecallResult<()> {
        self.entities.clear();
        self.compact()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn add_occurrence_creates_then_merges_by_exact_name() {
        let dir = tempdir().unwrap();
        let idx = EntityIndex::open(dir.path()).unwrap();

        let e1 = idx.add_occurrence("Alice", EntityType::Unknown, "m1").unwrap();
        assert_eq!(e1.turn_references.len(), 1);

        let e2 = idx.add_occurrence("alice", EntityType::Person, "m2").unwrap();
        assert_eq!(e2.id, e1.id);
        assert_eq!(e2.turn_references.len(), 2);
        assert_eq!(e2.entity_type, EntityType::Person);
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn search_is_substring_contains_not_prefix() {
        let dir = tempdir().unwrap();
        let idx = EntityIndex::open(dir.path()).unwrap();
        idx.add_occurrence("Shanghai Tower", EntityType::Location, "m1").unwrap();

        assert_eq!(idx.search("hai Tow").len(), 1);
        assert_eq!(idx.search("nope").len(), 0);
    }

    #[test]
    fn get_top_orders_by_confidence_then_reference_count() {
        let dir = tempdir().unwrap();
        let idx = EntityIndex::open(dir.path()).unwrap();
        idx.add_occurrence("Alice", EntityType::Person, "m1").unwrap();
        idx.add_occurrence("Bob", EntityType::Person, "m1").unwrap();
        idx.add_occurrence("Bob", EntityType::Person, "m2").unwrap();

        let top = idx.get_top(2);
        assert_eq!(top[0].name, "Bob");
    }

    #[test]
    fn remove_by_item_ids_drops_entities_with_no_references_left() {
        let dir = tempdir().unwrap();
        let idx = EntityIndex::open(dir.path()).unwrap();
        idx.add_occurrence("Alice", EntityType::Person, "m1").unwrap();

        idx.remove_by_item_ids(&HashSet::from(["m1".to_string()])).unwrap();
        assert!(idx.get_by_name("alice").is_none());
    }

    #[test]
    fn reload_from_disk_preserves_entities() {
        let dir = tempdir().unwrap();
        {
            let idx = EntityIndex::open(dir.path()).unwrap();
            idx.add_occurrence("Alice", EntityType::Person, "m1").unwrap();
        }
        let idx = EntityIndex::open(dir.path()).unwrap();
        assert_eq!(idx.len(), 1);
        assert!(idx.get_by_name("Alice").is_some());
    }
}
