//! Shared data model: scopes, metadata values, and the ingested `Item`.
//!
//! These types are the canonical representation carried across every store
//! and index in the crate. `Item` content is immutable after it is appended
//! to `VolumeStore`; updates are modeled as new items or as edits of the
//! working-memory record, never as a rewrite of the underlying log entry.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A tagged union standing in for a dynamically-typed metadata dict.
/// Unknown keys are tolerated on load; callers get typed accessors instead
/// of probing a `serde_json::Value` by hand everywhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    String(String),
    Number(f64),
    Bool(bool),
    List(Vec<MetaValue>),
    Map(HashMap<String, MetaValue>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetaValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetaValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MetaValue]> {
        match self {
            MetaValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&HashMap<String, MetaValue>> {
        match self {
            MetaValue::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(s: &str) -> Self {
        MetaValue::String(s.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(s: String) -> Self {
        MetaValue::String(s)
    }
}

impl From<f64> for MetaValue {
    fn from(n: f64) -> Self {
        MetaValue::Number(n)
    }
}

impl From<bool> for MetaValue {
    fn from(b: bool) -> Self {
        MetaValue::Bool(b)
    }
}

/// An open string → `MetaValue` map, used for `Item::metadata` and
/// `Entity::attributes`.
pub type MetaMap = HashMap<String, MetaValue>;

/// A tenant partition: `(user_id, character_id, session_id)`. All three
/// fields default to `"default"`. Scopes are never implicitly merged:
/// `Retriever` filters out ids from any scope other than the one it was
/// invoked with, even if an index fails to enforce the boundary itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub user_id: String,
    pub character_id: String,
    pub session_id: String,
}

impl Default for Scope {
    fn default() -> Self {
        Self {
            user_id: "default".to_string(),
            character_id: "default".to_string(),
            session_id: "default".to_string(),
        }
    }
}

impl Scope {
    pub fn new(
        user_id: impl Into<String>,
        character_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            character_id: character_id.into(),
            session_id: session_id.into(),
        }
    }

    /// Scope for a single user, leaving character/session at their defaults.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    /// `true` for the one scope that `DELETE /v1/memories` refuses to wipe
    /// without an explicit confirmation elsewhere in the call chain.
    pub fn is_default_user(&self) -> bool {
        self.user_id == "default"
    }

    /// Relative filesystem path segment for this scope's working-memory
    /// file: `<user>/<character>/<session>`.
    pub fn path_segment(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.user_id)
            .join(&self.character_id)
            .join(&self.session_id)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.user_id, self.character_id, self.session_id)
    }
}

/// The unit of ingestion. Content is immutable after `VolumeStore::append`;
/// everything else (tags, category, metadata) may be edited via
/// `ScopeStore::update`, which rewrites the working-memory record but never
/// the underlying log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: String,
    pub scope: Scope,
    pub content: String,
    pub turn_number: u64,
    pub created_at: DateTime<Utc>,
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub event_time: Option<String>,
    pub metadata: MetaMap,
}

/// Fields a caller supplies when adding an item; `Engine::add` fills in
/// `id`, `turn_number`, and `created_at`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewItem {
    pub content: String,
    #[serde(default)]
    pub scope: Scope,
    pub source: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub event_time: Option<String>,
    #[serde(default)]
    pub metadata: MetaMap,
}

impl Item {
    pub fn from_new(new: NewItem, id: String, turn_number: u64) -> Self {
        Self {
            id,
            scope: new.scope,
            content: new.content,
            turn_number,
            created_at: Utc::now(),
            source: new.source,
            tags: new.tags,
            category: new.category,
            content_type: new.content_type,
            event_time: new.event_time,
            metadata: new.metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_scope_is_all_default() {
        let s = Scope::default();
        assert_eq!(s.user_id, "default");
        assert_eq!(s.character_id, "default");
        assert_eq!(s.session_id, "default");
        assert!(s.is_default_user());
    }

    #[test]
    fn for_user_keeps_other_fields_default() {
        let s = Scope::for_user("alice");
        assert_eq!(s.user_id, "alice");
        assert_eq!(s.character_id, "default");
        assert!(!s.is_default_user());
    }

    #[test]
    fn path_segment_joins_all_three() {
        let s = Scope::new("alice", "bot", "s1");
        assert_eq!(s.path_segment(), std::path::PathBuf::from("alice/bot/s1"));
    }

    #[test]
    fn meta_value_accessors() {
        let v = MetaValue::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
        assert_eq!(v.as_f64(), None);
    }
}
