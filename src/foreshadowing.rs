//! Foreshadowing: a user-planted hint with a deferred resolution.
//!
//! The auto-trigger cadence is exposed as a config knob
//! (`foreshadowing_check_interval`) but the analyzer stays a stub that
//! only fires on explicit `plant`/`resolve` calls.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ForeshadowingStatus {
    Unresolved,
    PossiblyTriggered,
    Resolved,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Foreshadowing {
    pub id: String,
    pub content: String,
    pub trigger_keywords: Vec<String>,
    pub related_entities: Vec<String>,
    pub status: ForeshadowingStatus,
    pub importance: f32,
    pub created_turn: u64,
    pub resolution_turn: Option<u64>,
    pub resolution_content: Option<String>,
}

impl Foreshadowing {
    pub fn plant(
        id: impl Into<String>,
        content: impl Into<String>,
        created_turn: u64,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            trigger_keywords: Vec::new(),
            related_entities: Vec::new(),
            status: ForeshadowingStatus::Unresolved,
            importance: 0.5,
            created_turn,
            resolution_turn: None,
            resolution_content: None,
        }
    }

    pub fn resolve(&mut self, resolution_turn: u64, content: impl Into<String>) {
        self.status = ForeshadowingStatus::Resolved;
        self.resolution_turn = Some(resolution_turn);
        self.resolution_content = Some(content.into());
    }

    /// Cheap heuristic scan used by callers that want to flag a
    /// foreshadowing as `PossiblyTriggered` without a full analyzer pass:
    /// any of its trigger keywords appearing in newly ingested content.
    pub fn mark_if_triggered(&mut self, content: &str) {
        if self.status != ForeshadowingStatus::Unresolved {
            return;
        }
        let lower = content.to_lowercase();
        if self
            .trigger_keywords
            .iter()
            .any(|kw| lower.contains(&kw.to_lowercase()))
        {
            self.status = ForeshadowingStatus::PossiblyTriggered;
        }
    }
}

/// In-memory foreshadowing store.
#[derive(Debug, Default)]
pub struct ForeshadowingStore {
    items: dashmap::DashMap<String, Foreshadowing>,
}

impl ForeshadowingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plant(&self, f: Foreshadowing) {
        self.items.insert(f.id.clone(), f);
    }

    pub fn resolve(&self, id: &str, resolution_turn: u64, content: impl Into<String>) -> bool {
        if let Some(mut f) = self.items.get_mut(id) {
            f.resolve(resolution_turn, content);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: &str) -> Option<Foreshadowing> {
        self.items.get(id).map(|f| f.clone())
    }

    pub fn all(&self) -> Vec<Foreshadowing> {
        self.items.iter().map(|f| f.value().clone()).collect()
    }

    /// Scan all unresolved entries against freshly ingested content,
    /// applying `Foreshadowing::mark_if_triggered` to each.
    pub fn scan_new_content(&self, content: &str) {
        for mut entry in self.items.iter_mut() {
            entry.mark_if_triggered(content);
        }
    }

    pub fn clear(&self) {
        self.items.clear();
    }
}
