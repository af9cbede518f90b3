//! Entity/relation/keyword/temporal-marker extraction in three modes:
//! RULES (free, regex/dictionary based), LLM (full quality, costs budget),
//! and ADAPTIVE (RULES always, LLM only above a complexity threshold and
//! within budget).
mod adaptive;
mod llm;
mod rules;
mod types;

pub use adaptive::{assess_complexity, AdaptiveExtractor, DEFAULT_COMPLEXITY_THRESHOLD};
pub use llm::{LlmClient, LlmExtractor};
pub use rules::RulesExtractor;
pub use types::{
    ExtractedEntity, ExtractedRelation, ExtractionMode, ExtractionResult, TemporalMarker,
    TemporalMarkerType,
};
