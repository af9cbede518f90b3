//! ADAPTIVE mode: always run the free rules pass, then call the LLM only
//! when the text's assessed complexity clears a threshold and the budget
//! allows it.
use crate::budget::BudgetManager;
use crate::extraction::llm::{LlmClient, LlmExtractor};
use crate::extraction::rules::RulesExtractor;
use crate::extraction::types::ExtractionResult;
use std::collections::HashSet;
use std::sync::Arc;

pub const DEFAULT_COMPLEXITY_THRESHOLD: f32 = 0.6;

/// Weighted complexity score in `[0, 1]`; higher means more likely to
/// benefit from an LLM pass. Weighs text length, entity density, entity
/// count, temporal-marker presence, and local-extraction confidence.
pub fn assess_complexity(text: &str, local_result: &ExtractionResult) -> f32 {
    let mut score = 0.0f32;
    let len = text.chars().count();

    if len > 500 {
        score += 0.15;
    }
    if len > 1000 {
        score += 0.15;
    }

    let entity_count = local_result.entities.len();
    let entity_density = entity_count as f32 / (len as f32 / 100.0).max(1.0);
    if entity_density > 0.5 {
        score += 0.2;
    }
    if entity_count > 3 {
        score += 0.15;
    }
    if entity_count > 5 {
        score += 0.1;
    }

    if !local_result.temporal_markers.is_empty() {
        score += 0.15;
    }

    if !local_result.entities.is_empty() {
        let avg_confidence: f32 =
            local_result.entities.iter().map(|e| e.confidence).sum::<f32>() / entity_count as f32;
        if avg_confidence < 0.6 {
            score += 0.2;
        }
    }

    let sentence_count = text.split(['.', '!', '?', '。', '！', '？']).count();
    if sentence_count > 5 {
        score += 0.1;
    }

    score.min(1.0)
}

/// Merge an LLM pass over the same text into the free local pass: the LLM
/// result wins on name collision, local-only entities/relations survive at
/// a discounted confidence, and keyword/temporal-marker sets union.
fn merge_results(local: ExtractionResult, llm: ExtractionResult) -> ExtractionResult {
    let llm_entity_names: HashSet<String> = llm.entities.iter().map(|e| e.name.to_lowercase()).collect();
    let mut entities = llm.entities;
    for mut entity in local.entities {
        if !llm_entity_names.contains(&entity.name.to_lowercase()) {
            entity.confidence *= 0.8;
            entities.push(entity);
        }
    }

    let llm_relation_keys: HashSet<(String, String, String)> = llm
        .relations
        .iter()
        .map(|r| (r.subject.to_lowercase(), r.predicate.clone(), r.object.to_lowercase()))
        .collect();
    let mut relations = llm.relations;
    for mut relation in local.relations {
        let key = (
            relation.subject.to_lowercase(),
            relation.predicate.clone(),
            relation.object.to_lowercase(),
        );
        if !llm_relation_keys.contains(&key) {
            relation.confidence *= 0.7;
            relations.push(relation);
        }
    }

    let mut temporal_markers = llm.temporal_markers;
    let seen_texts: HashSet<String> = temporal_markers.iter().map(|m| m.text.clone()).collect();
    for marker in local.temporal_markers {
        if !seen_texts.contains(&marker.text) {
            temporal_markers.push(marker);
        }
    }

    let mut keywords: HashSet<String> = local.keywords.into_iter().collect();
    keywords.extend(llm.keywords);

    ExtractionResult {
        entities,
        relations,
        temporal_markers,
        keywords: keywords.into_iter().collect(),
        complexity_score: local.complexity_score,
        llm_used: true,
    }
}

pub struct AdaptiveExtractor<C> {
    rules: RulesExtractor,
    llm: Option<LlmExtractor<C>>,
    budget: Option<Arc<BudgetManager>>,
    complexity_threshold: f32,
}

impl<C: LlmClient> AdaptiveExtractor<C> {
    pub fn new(llm_client: Option<C>, budget: Option<Arc<BudgetManager>>) -> Self {
        Self {
            rules: RulesExtractor::new(),
            llm: llm_client.map(LlmExtractor::new),
            budget,
            complexity_threshold: DEFAULT_COMPLEXITY_THRESHOLD,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.complexity_threshold = threshold;
        self
    }

    pub async fn extract(&self, text: &str) -> ExtractionResult {
        if text.is_empty() {
            return ExtractionResult::empty();
        }

        let mut local_result = self.rules.extract(text);
        let complexity = assess_complexity(text, &local_result);
        local_result.complexity_score = complexity;

        let mut need_llm = complexity >= self.complexity_threshold;

        if need_llm {
            if let Some(budget) = &self.budget {
                let estimated_tokens = (text.chars().count() / 4) as u64 + 200;
                let estimated_cost = budget.estimate_cost(estimated_tokens, 200, None);
                if !budget.can_afford(estimated_cost, false) {
                    need_llm = false;
                }
            }
        }

        if need_llm {
            if let Some(llm) = &self.llm {
                let llm_result = llm.extract(text).await;
                if llm_result.llm_used {
                    return merge_results(local_result, llm_result);
                }
            }
        }

        local_result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::BudgetConfig;
    use crate::error::RecallResult;
    use async_trait::async_trait;

    struct StubClient(String);

    #[async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> RecallResult<String> {
            Ok(self.0.clone())
        }
        fn model(&self) -> &str {
            "stub"
        }
    }

    #[test]
    fn short_plain_text_scores_low_complexity() {
        let extractor = RulesExtractor::new();
        let local = extractor.extract("hi there");
        assert!(assess_complexity("hi there", &local) < DEFAULT_COMPLEXITY_THRESHOLD);
    }

    #[test]
    fn long_entity_dense_text_scores_high_complexity() {
        let extractor = RulesExtractor::new();
        let text = "GitHub, Discord, Reddit, Twitter, Amazon and OpenAI all use ChatGPT, Claude and DeepSeek. "
            .repeat(20);
        let local = extractor.extract(&text);
        assert!(assess_complexity(&text, &local) >= DEFAULT_COMPLEXITY_THRESHOLD);
    }

    #[tokio::test]
    async fn low_complexity_text_never_invokes_llm() {
        let extractor: AdaptiveExtractor<StubClient> =
            AdaptiveExtractor::new(Some(StubClient(r#"{"entities":[],"relations":[]}"#.to_string())), None);
        let result = extractor.extract("hi").await;
        assert!(!result.llm_used);
    }

    #[tokio::test]
    async fn high_complexity_text_merges_in_llm_entities() {
        let dir = tempfile::tempdir().unwrap();
        let budget = Arc::new(crate::budget::BudgetManager::open(dir.path(), BudgetConfig::default()).unwrap());
        let extractor: AdaptiveExtractor<StubClient> = AdaptiveExtractor::new(
            Some(StubClient(
                r#"{"entities":[{"name":"Zephyrine","type":"PERSON","confidence":0.9}],"relations":[]}"#.to_string(),
            )),
            Some(budget),
        )
        .with_threshold(0.0);
        let result = extractor.extract("Zephyrine met with the committee about the quarterly roadmap.").await;
        assert!(result.llm_used);
        assert!(result.entities.iter().any(|e| e.name == "Zephyrine"));
    }
}
