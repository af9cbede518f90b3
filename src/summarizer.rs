//! Entity summary generation, gated by `Config::entity_summary_enabled`:
//! once an entity's `turn_references` cross a threshold, produce a short
//! free-text summary — from an LLM collaborator when one is configured,
//! or a templated fallback built from the entity's type and top aliases
//! otherwise, mirroring the extractor's own fail-open design: summarization
//! degrading to a template is never an error.
use std::sync::Arc;

use crate::entity::Entity;
use crate::extraction::LlmClient;

/// Below this many distinct turn references, an entity is considered too
/// thin to summarize yet.
const DEFAULT_MIN_REFERENCES: usize = 3;

pub struct EntitySummarizer {
    llm: Option<Arc<dyn LlmClient>>,
    min_references: usize,
}

impl EntitySummarizer {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm, min_references: DEFAULT_MIN_REFERENCES }
    }

    pub fn with_min_references(mut self, min_references: usize) -> Self {
        self.min_references = min_references;
        self
    }

    /// Whether `entity` has enough evidence to (re)generate a summary.
    pub fn should_summarize(&self, entity: &Entity) -> bool {
        entity.turn_references.len() >= self.min_references
    }

    /// Produce a summary, falling back to a template if no LLM collaborator
    /// is configured or the call fails. Never returns `Err`.
    pub async fn summarize(&self, entity: &Entity) -> String {
        if let Some(llm) = &self.llm {
            let prompt = format!(
                "Summarize what is known about the {} entity \"{}\" in one sentence. \
                 Known aliases: {}. Mentioned in {} turns. Respond with the sentence only.",
                entity.entity_type.as_str(),
                entity.name,
                aliases_preview(entity, 5),
                entity.turn_references.len(),
            );
            if let Ok(summary) = llm.complete(&prompt, 128).await {
                let trimmed = summary.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
        template_summary(entity)
    }
}

fn aliases_preview(entity: &Entity, n: usize) -> String {
    let mut aliases: Vec<&String> = entity.aliases.iter().collect();
    aliases.sort();
    aliases.truncate(n);
    if aliases.is_empty() {
        "none".to_string()
    } else {
        aliases.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
    }
}

fn template_summary(entity: &Entity) -> String {
    if entity.aliases.is_empty() {
        format!(
            "{} ({}), referenced in {} turn(s).",
            entity.name,
            entity.entity_type.as_str(),
            entity.turn_references.len()
        )
    } else {
        format!(
            "{} ({}, also known as {}), referenced in {} turn(s).",
            entity.name,
            entity.entity_type.as_str(),
            aliases_preview(entity, 3),
            entity.turn_references.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityType;

    #[tokio::test]
    async fn template_fallback_used_without_llm_client() {
        let mut entity = Entity::new("e1", "Acme Corp", EntityType::Organization);
        entity.turn_references.insert("m1".to_string());
        entity.turn_references.insert("m2".to_string());
        entity.turn_references.insert("m3".to_string());

        let summarizer = EntitySummarizer::new(None);
        assert!(summarizer.should_summarize(&entity));
        let summary = summarizer.summarize(&entity).await;
        assert!(summary.contains("Acme Corp"));
        assert!(summary.contains("ORGANIZATION"));
    }

    #[test]
    fn should_summarize_respects_threshold() {
        let mut entity = Entity::new("e1", "Bob", EntityType::Person);
        entity.turn_references.insert("m1".to_string());
        let summarizer = EntitySummarizer::new(None);
        assert!(!summarizer.should_summarize(&entity));
    }
}
