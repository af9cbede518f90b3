//! Shared result types produced by every extraction mode.
use crate::entity::EntityType;
use serde::{Deserialize, Serialize};

/// One entity mention surfaced by an extractor, not yet resolved against
/// the `EntityIndex`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: EntityType,
    pub confidence: f32,
    pub source_text: String,
}

/// One relation mention, named by raw entity strings rather than ids — the
/// caller resolves `subject`/`object` against the `EntityIndex` before
/// writing a `Relation` into the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f32,
    pub source_text: String,
    pub temporal_info: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemporalMarkerType {
    Point,
    Start,
    End,
    Duration,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalMarker {
    pub text: String,
    pub marker_type: TemporalMarkerType,
    pub start: usize,
    pub end: usize,
}

/// Which strategy produced an `ExtractionResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractionMode {
    Rules,
    Adaptive,
    Llm,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<ExtractedEntity>,
    pub relations: Vec<ExtractedRelation>,
    pub temporal_markers: Vec<TemporalMarker>,
    pub keywords: Vec<String>,
    pub complexity_score: f32,
    pub llm_used: bool,
}

impl ExtractionResult {
    pub fn empty() -> Self {
        Self::default()
    }
}
