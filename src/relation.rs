//! Relation / temporal fact model used by the knowledge graph.
use serde::{Deserialize, Serialize};

/// A typed, optionally time-scoped edge between two entities.
///
/// Invariant: for a given `(source_entity_id, relation_type, target_entity_id)`
/// key, the graph keeps a single representative record and merges evidence
/// on duplicate insertion rather than duplicating the edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: String,
    pub source_entity_id: String,
    pub target_entity_id: String,
    /// SCREAMING_SNAKE_CASE relation type, e.g. "WORKS_AT".
    pub relation_type: String,
    pub fact: String,
    pub valid_at: Option<String>,
    pub invalid_at: Option<String>,
    pub confidence: f32,
    pub source_text: String,
    /// Additional evidence sentences merged in on duplicate insertion.
    pub evidence: Vec<String>,
}

impl Relation {
    pub fn key(&self) -> (String, String, String) {
        (
            self.source_entity_id.clone(),
            self.relation_type.clone(),
            self.target_entity_id.clone(),
        )
    }

    /// Merge a duplicate insertion's evidence into this record, raising
    /// confidence toward the stronger of the two and appending the new
    /// source sentence if it is not already recorded.
    pub fn merge_evidence(&mut self, other: &Relation) {
        if other.confidence > self.confidence {
            self.confidence = other.confidence;
        }
        if !self.source_text.is_empty() && self.source_text != other.source_text {
            self.evidence.push(other.source_text.clone());
        }
        if other.valid_at.is_some() {
            self.valid_at = other.valid_at.clone();
        }
        if other.invalid_at.is_some() {
            self.invalid_at = other.invalid_at.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(source_text: &str, confidence: f32) -> Relation {
        Relation {
            id: "r1".to_string(),
            source_entity_id: "e1".to_string(),
            target_entity_id: "e2".to_string(),
            relation_type: "WORKS_AT".to_string(),
            fact: "Alice works at Acme".to_string(),
            valid_at: None,
            invalid_at: None,
            confidence,
            source_text: source_text.to_string(),
            evidence: Vec::new(),
        }
    }

    #[test]
    fn merge_evidence_keeps_higher_confidence_and_appends_sentence() {
        let mut r1 = rel("Alice joined Acme in 2020", 0.6);
        let r2 = rel("Alice has worked at Acme since 2020", 0.9);
        r1.merge_evidence(&r2);
        assert_eq!(r1.confidence, 0.9);
        assert_eq!(r1.evidence, vec!["Alice has worked at Acme since 2020"]);
    }
}
