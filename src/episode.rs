//! Episode model: a coarse grouping of the facts extracted from one
//! ingestion call. Gated by `Config::episode_tracking_enabled`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub content: String,
    pub source_type: Option<String>,
    pub source_description: Option<String>,
    pub memory_ids: Vec<String>,
    pub relation_ids: Vec<String>,
    pub entity_edges: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Episode {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            source_type: None,
            source_description: None,
            memory_ids: Vec::new(),
            relation_ids: Vec::new(),
            entity_edges: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// In-memory episode store, keyed by id. Persisted as a single JSON
/// document the way `KnowledgeGraph` is (§4.13 Maintainer compacts it
/// alongside the other small stores).
#[derive(Debug, Default)]
pub struct EpisodeStore {
    episodes: dashmap::DashMap<String, Episode>,
}

impl EpisodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, episode: Episode) {
        self.episodes.insert(episode.id.clone(), episode);
    }

    pub fn get(&self, id: &str) -> Option<Episode> {
        self.episodes.get(id).map(|e| e.clone())
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn remove_by_memory_id(&self, memory_id: &str) {
        self.episodes.retain(|_, ep| {
            ep.memory_ids.retain(|m| m != memory_id);
            !ep.memory_ids.is_empty()
        });
    }

    pub fn all(&self) -> Vec<Episode> {
        self.episodes.iter().map(|e| e.value().clone()).collect()
    }

    pub fn clear(&self) {
        self.episodes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remove_by_memory_id_drops_episode_when_it_empties() {
        let store = EpisodeStore::new();
        let mut ep = Episode::new("ep1", "summary");
        ep.memory_ids.push("m1".to_string());
        store.insert(ep);

        store.remove_by_memory_id("m1");
        assert!(store.get("ep1").is_none());
    }

    #[test]
    fn remove_by_memory_id_keeps_episode_with_remaining_refs() {
        let store = EpisodeStore::new();
        let mut ep = Episode::new("ep1", "summary");
        ep.memory_ids.push("m1".to_string());
        ep.memory_ids.push("m2".to_string());
        store.insert(ep);

        store.remove_by_memory_id("m1");
        let ep = store.get("ep1").unwrap();
        assert_eq!(ep.memory_ids, vec!["m2".to_string()]);
    }
}
