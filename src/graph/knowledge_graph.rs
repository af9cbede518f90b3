//! `KnowledgeGraph`: entity nodes plus typed, time-scoped relation edges,
//! indexed bidirectionally for O(degree) neighbor lookup.
use crate::error::RecallResult;
use crate::relation::Relation;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphData {
    relations: HashMap<String, Relation>,
    outgoing: HashMap<String, HashSet<String>>,
    incoming: HashMap<String, HashSet<String>>,
}

pub struct KnowledgeGraph {
    path: std::path::PathBuf,
    data: Mutex<GraphData>,
}

impl KnowledgeGraph {
    pub fn open(data_root: &std::path::Path) -> RecallResult<Self> {
        std::fs::create_dir_all(data_root.join("data"))?;
        let path = data_root.join("data").join("knowledge_graph.json");
        let data = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    fn persist(&self, data: &GraphData) -> RecallResult<()> {
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string(data)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Insert a relation; a duplicate `(source, type, target)` merges
    /// evidence into the existing representative record rather than
    /// creating a second edge.
    pub fn add_relation(&self, relation: Relation) -> RecallResult<Relation> {
        let mut data = self.data.lock().unwrap();
        let key = relation.key();
        let existing_id = data
            .relations
            .values()
            .find(|r| r.key() == key)
            .map(|r| r.id.clone());

        let result = if let Some(id) = existing_id {
            let stored = data.relations.get_mut(&id).unwrap();
            stored.merge_evidence(&relation);
            stored.clone()
        } else {
            data.outgoing
                .entry(relation.source_entity_id.clone())
                .or_default()
                .insert(relation.id.clone());
            data.incoming
                .entry(relation.target_entity_id.clone())
                .or_default()
                .insert(relation.id.clone());
            data.relations.insert(relation.id.clone(), relation.clone());
            relation
        };
        self.persist(&data)?;
        Ok(result)
    }

    pub fn get_relation(&self, id: &str) -> Option<Relation> {
        self.data.lock().unwrap().relations.get(id).cloned()
    }

    /// Capped breadth-first traversal from `entity_id` out to `depth` hops,
    /// optionally restricted to the given relation types.
    pub fn neighbors(&self, entity_id: &str, depth: usize, types: Option<&[String]>) -> Vec<Relation> {
        let data = self.data.lock().unwrap();
        let mut visited_entities = HashSet::from([entity_id.to_string()]);
        let mut frontier = vec![entity_id.to_string()];
        let mut found = Vec::new();

        for _ in 0..depth.max(1) {
            let mut next_frontier = Vec::new();
            for node in &frontier {
                let edge_ids = data
                    .outgoing
                    .get(node)
                    .into_iter()
                    .chain(data.incoming.get(node))
                    .flatten();
                for edge_id in edge_ids {
                    if let Some(relation) = data.relations.get(edge_id) {
                        if let Some(types) = types {
                            if !types.contains(&relation.relation_type) {
                                continue;
                            }
                        }
                        found.push(relation.clone());
                        let other = if relation.source_entity_id == *node {
                            &relation.target_entity_id
                        } else {
                            &relation.source_entity_id
                        };
                        if visited_entities.insert(other.clone()) {
                            next_frontier.push(other.clone());
                        }
                    }
                }
            }
            frontier = next_frontier;
            if frontier.is_empty() {
                break;
            }
        }
        found
    }

    /// Rewrite every edge endpoint from `old_id` to `new_id`, used when two
    /// entity mentions resolve to a single canonical entity.
    pub fn rewrite_entity(&self, old_id: &str, new_id: &str) -> RecallResult<()> {
        let mut data = self.data.lock().unwrap();
        for relation in data.relations.values_mut() {
            if relation.source_entity_id == old_id {
                relation.source_entity_id = new_id.to_string();
            }
            if relation.target_entity_id == old_id {
                relation.target_entity_id = new_id.to_string();
            }
        }
        if let Some(ids) = data.outgoing.remove(old_id) {
            data.outgoing.entry(new_id.to_string()).or_default().extend(ids);
        }
        if let Some(ids) = data.incoming.remove(old_id) {
            data.incoming.entry(new_id.to_string()).or_default().extend(ids);
        }
        self.persist(&data)
    }

    pub fn len(&self) -> usize {
        self.data.lock().unwrap().relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) -> RecallResult<()> {
        let mut data = self.data.lock().unwrap();
        *data = GraphData::default();
        self.persist(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(source: &str, rtype: &str, target: &str) -> Relation {
        Relation {
            id: uuid::Uuid::new_v4().to_string(),
            source_entity_id: source.to_string(),
            target_entity_id: target.to_string(),
            relation_type: rtype.to_string(),
            fact: format!("{source} {rtype} {target}"),
            valid_at: None,
            invalid_at: None,
            confidence: 0.8,
            source_text: "seed".to_string(),
            evidence: vec![],
        }
    }

    #[test]
    fn duplicate_source_type_target_merges_rather_than_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let graph = KnowledgeGraph::open(dir.path()).unwrap();
        graph.add_relation(relation("alice", "WORKS_AT", "acme")).unwrap();
        graph.add_relation(relation("alice", "WORKS_AT", "acme")).unwrap();
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn neighbors_follows_edges_bidirectionally() {
        let dir = tempfile::tempdir().unwrap();
        let graph = KnowledgeGraph::open(dir.path()).unwrap();
        graph.add_relation(relation("alice", "WORKS_AT", "acme")).unwrap();

        assert_eq!(graph.neighbors("alice", 1, None).len(), 1);
        assert_eq!(graph.neighbors("acme", 1, None).len(), 1);
    }

    #[test]
    fn neighbors_respects_type_filter() {
        let dir = tempfile::tempdir().unwrap();
        let graph = KnowledgeGraph::open(dir.path()).unwrap();
        graph.add_relation(relation("alice", "WORKS_AT", "acme")).unwrap();
        graph.add_relation(relation("alice", "LIVES_IN", "shanghai")).unwrap();

        let filtered = graph.neighbors("alice", 1, Some(&["WORKS_AT".to_string()]));
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].relation_type, "WORKS_AT");
    }

    #[test]
    fn rewrite_entity_updates_all_edge_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let graph = KnowledgeGraph::open(dir.path()).unwrap();
        graph.add_relation(relation("alice_mention_1", "WORKS_AT", "acme")).unwrap();
        graph.rewrite_entity("alice_mention_1", "alice_canonical").unwrap();

        let neighbors = graph.neighbors("alice_canonical", 1, None);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].source_entity_id, "alice_canonical");
    }

    #[test]
    fn reload_from_disk_preserves_relations() {
        let dir = tempfile::tempdir().unwrap();
        {
            let graph = KnowledgeGraph::open(dir.path()).unwrap();
            graph.add_relation(relation("alice", "WORKS_AT", "acme")).unwrap();
        }
        let graph = KnowledgeGraph::open(dir.path()).unwrap();
        assert_eq!(graph.len(), 1);
    }
}
