//! Entity model and the type registry that constrains extraction.
use crate::types::MetaMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Built-in entity types plus an open extension point for user-defined
/// types, registered through `EntityTypeRegistry`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Person,
    Location,
    Organization,
    Item,
    Concept,
    Event,
    Time,
    Unknown,
    Custom(String),
}

impl EntityType {
    pub fn as_str(&self) -> &str {
        match self {
            EntityType::Person => "PERSON",
            EntityType::Location => "LOCATION",
            EntityType::Organization => "ORGANIZATION",
            EntityType::Item => "ITEM",
            EntityType::Concept => "CONCEPT",
            EntityType::Event => "EVENT",
            EntityType::Time => "TIME",
            EntityType::Unknown => "UNKNOWN",
            EntityType::Custom(s) => s.as_str(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "PERSON" => EntityType::Person,
            "LOCATION" => EntityType::Location,
            "ORGANIZATION" => EntityType::Organization,
            "ITEM" => EntityType::Item,
            "CONCEPT" => EntityType::Concept,
            "EVENT" => EntityType::Event,
            "TIME" => EntityType::Time,
            "UNKNOWN" => EntityType::Unknown,
            other => EntityType::Custom(other.to_string()),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, EntityType::Unknown)
    }
}

/// A user-defined entry in the type registry, used to constrain extraction
/// and inform downstream prompts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityTypeDefinition {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub attribute_definitions: Vec<String>,
    pub examples: Vec<String>,
}

/// Registry of built-in plus user-defined entity types.
#[derive(Debug, Clone, Default)]
pub struct EntityTypeRegistry {
    custom: Vec<EntityTypeDefinition>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builtin_names() -> &'static [&'static str] {
        &[
            "PERSON",
            "LOCATION",
            "ORGANIZATION",
            "ITEM",
            "CONCEPT",
            "EVENT",
            "TIME",
        ]
    }

    pub fn register(&mut self, def: EntityTypeDefinition) {
        self.custom.retain(|d| d.name != def.name);
        self.custom.push(def);
    }

    pub fn get(&self, name: &str) -> Option<&EntityTypeDefinition> {
        self.custom.iter().find(|d| d.name == name)
    }

    pub fn is_known(&self, name: &str) -> bool {
        Self::builtin_names().contains(&name) || self.get(name).is_some()
    }
}

/// An entity recognized by the extractor and tracked across ingested items.
///
/// Invariant: every name and alias maps back to exactly one entity id; on
/// merge, alias sets and `turn_references` union rather than overwrite.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub name: String,
    pub aliases: HashSet<String>,
    pub entity_type: EntityType,
    pub turn_references: HashSet<String>,
    pub confidence: f32,
    pub summary: Option<String>,
    pub attributes: MetaMap,
    pub last_summary_update: Option<DateTime<Utc>>,
}

impl Entity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            aliases: HashSet::new(),
            entity_type,
            turn_references: HashSet::new(),
            confidence: 0.5,
            summary: None,
            attributes: MetaMap::new(),
            last_summary_update: None,
        }
    }

    /// Raise confidence toward the ceiling of 1.0 by a fixed step on every
    /// re-mention.
    pub fn bump_confidence(&mut self, step: f32) {
        self.confidence = (self.confidence + step).min(1.0);
    }

    /// Upgrade an `UNKNOWN` type to a concrete one supplied by a later call;
    /// never downgrades a concrete type back to `UNKNOWN`.
    pub fn maybe_upgrade_type(&mut self, candidate: &EntityType) {
        if self.entity_type.is_unknown() && !candidate.is_unknown() {
            self.entity_type = candidate.clone();
        }
    }

    pub fn merge_aliases<I: IntoIterator<Item = String>>(&mut self, aliases: I) {
        self.aliases.extend(aliases);
    }

    pub fn merge_references<I: IntoIterator<Item = String>>(&mut self, refs: I) {
        self.turn_references.extend(refs);
    }

    /// Whether this entity's name or any alias matches `name` case-insensitively.
    pub fn matches_name(&self, name: &str) -> bool {
        let name_lower = name.to_lowercase();
        self.name.to_lowercase() == name_lower
            || self.aliases.iter().any(|a| a.to_lowercase() == name_lower)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_caps_at_one() {
        let mut e = Entity::new("e1", "Alice", EntityType::Person);
        e.confidence = 0.95;
        e.bump_confidence(0.2);
        assert!((e.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn unknown_upgrades_but_concrete_does_not_downgrade() {
        let mut e = Entity::new("e1", "Acme", EntityType::Unknown);
        e.maybe_upgrade_type(&EntityType::Organization);
        assert_eq!(e.entity_type, EntityType::Organization);
        e.maybe_upgrade_type(&EntityType::Person);
        assert_eq!(e.entity_type, EntityType::Organization);
    }

    #[test]
    fn matches_name_is_case_insensitive_over_aliases() {
        let mut e = Entity::new("e1", "DeepSeek", EntityType::Organization);
        e.aliases.insert("DS".to_string());
        assert!(e.matches_name("deepseek"));
        assert!(e.matches_name("ds"));
        assert!(!e.matches_name("openai"));
    }
}
