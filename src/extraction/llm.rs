//! LLM-backed entity/relation extraction. The wire protocol to any given
//! provider is out of scope; `LlmClient` is the abstract seam callers plug
//! a real HTTP client into.
use crate::entity::EntityType;
use crate::error::RecallResult;
use crate::extraction::rules::RulesExtractor;
use crate::extraction::types::{ExtractedEntity, ExtractedRelation, ExtractionResult};
use async_trait::async_trait;
use serde::Deserialize;

/// Abstract completion call. A concrete implementation wraps a vendor's
/// chat-completions endpoint; this crate only needs `complete`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> RecallResult<String>;
    fn model(&self) -> &str;
}

/// Lets a type-erased client stand in wherever `AdaptiveExtractor<C>` or
/// `LlmExtractor<C>` is generic over a concrete `LlmClient`, so `Engine` can
/// hold a single `Arc<dyn LlmClient>` instead of choosing a concrete type.
#[async_trait]
impl LlmClient for std::sync::Arc<dyn LlmClient> {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> RecallResult<String> {
        (**self).complete(prompt, max_tokens).await
    }

    fn model(&self) -> &str {
        (**self).model()
    }
}

#[derive(Debug, Deserialize)]
struct RawEntity {
    name: String,
    #[serde(rename = "type")]
    entity_type: String,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct RawRelation {
    subject: String,
    predicate: String,
    object: String,
    #[serde(default)]
    temporal: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default)]
    relations: Vec<RawRelation>,
}

const EXTRACTION_PROMPT_TEMPLATE: &str = r#"Extract entities, relations and temporal information from the text below.

Text:
{text}

Respond as JSON:
{
  "entities": [{"name": "...", "type": "PERSON|LOCATION|ORGANIZATION|ITEM|CONCEPT", "confidence": 0.9}],
  "relations": [{"subject": "...", "predicate": "RELATION_TYPE", "object": "...", "temporal": "optional"}]
}

Only extract what the text explicitly states. Empty arrays are fine."#;

/// Closes any braces/brackets/strings left open by a truncated response —
/// a cut-off JSON array is repaired by closing every open container in
/// reverse, down to arbitrary nesting depth.
fn close_balanced(body: &str) -> String {
    let mut stack = Vec::new();
    let mut in_string = false;
    let mut escaped = false;
    for c in body.chars() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => stack.push('}'),
            '[' => stack.push(']'),
            '}' | ']' => {
                stack.pop();
            }
            _ => {}
        }
    }
    let mut result = body.trim_end().trim_end_matches(',').to_string();
    if in_string {
        result.push('"');
    }
    while let Some(closer) = stack.pop() {
        result.push(closer);
    }
    result
}

/// Extracts a JSON object from a completion response, recovering from a
/// truncated tail by balancing braces/brackets/strings left open.
fn extract_json_object(response: &str) -> Option<String> {
    let trimmed = response.trim();
    let body = if let Some(start) = trimmed.find("```json") {
        trimmed[start + "```json".len()..]
            .split("```")
            .next()
            .unwrap_or("")
            .trim()
    } else if trimmed.starts_with("```") {
        trimmed
            .trim_start_matches("```")
            .split("```")
            .next()
            .unwrap_or("")
            .trim()
    } else {
        trimmed
    };

    if !body.starts_with('{') {
        return None;
    }
    if serde_json::from_str::<serde_json::Value>(body).is_ok() {
        return Some(body.to_string());
    }
    let repaired = close_balanced(body);
    if serde_json::from_str::<serde_json::Value>(&repaired).is_ok() {
        Some(repaired)
    } else {
        None
    }
}

/// Pure-LLM extraction, falling back to `RulesExtractor` output whenever the
/// LLM call fails or returns unparseable JSON — an LLM outage never empties
/// the extraction pipeline.
pub struct LlmExtractor<C> {
    client: C,
    fallback: RulesExtractor,
}

impl<C: LlmClient> LlmExtractor<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            fallback: RulesExtractor::new(),
        }
    }

    pub async fn extract(&self, text: &str) -> ExtractionResult {
        let prompt = EXTRACTION_PROMPT_TEMPLATE.replace("{text}", text);
        match self.client.complete(&prompt, 1000).await {
            Ok(response) => match self.parse_response(&response, text) {
                Some(result) => result,
                None => self.fallback_result(text),
            },
            Err(_) => self.fallback_result(text),
        }
    }

    fn fallback_result(&self, text: &str) -> ExtractionResult {
        let mut result = self.fallback.extract(text);
        result.llm_used = false;
        result
    }

    fn parse_response(&self, response: &str, text: &str) -> Option<ExtractionResult> {
        let json_str = extract_json_object(response)?;
        let raw: RawExtraction = serde_json::from_str(&json_str).ok()?;

        let snippet: String = text.chars().take(100).collect();
        let entities = raw
            .entities
            .into_iter()
            .filter(|e| !e.name.is_empty())
            .map(|e| ExtractedEntity {
                name: e.name,
                entity_type: EntityType::from_str(&e.entity_type),
                confidence: e.confidence.unwrap_or(0.8),
                source_text: snippet.clone(),
            })
            .collect();

        let relations = raw
            .relations
            .into_iter()
            .filter(|r| !r.subject.is_empty() && !r.object.is_empty())
            .map(|r| ExtractedRelation {
                subject: r.subject,
                predicate: r.predicate,
                object: r.object,
                confidence: 0.8,
                source_text: snippet.clone(),
                temporal_info: r.temporal,
            })
            .collect();

        Some(ExtractionResult {
            entities,
            relations,
            temporal_markers: Vec::new(),
            keywords: self.fallback.extract_keywords(text),
            complexity_score: 0.0,
            llm_used: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RecallError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubClient {
        response: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> RecallResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
        fn model(&self) -> &str {
            "stub"
        }
    }

    struct FailingClient;

    #[async_trait]
    impl LlmClient for FailingClient {
        async fn complete(&self, _prompt: &str, _max_tokens: u32) -> RecallResult<String> {
            Err(RecallError::Validation("no provider configured".into()))
        }
        fn model(&self) -> &str {
            "none"
        }
    }

    #[tokio::test]
    async fn parses_well_formed_json_response() {
        let client = StubClient {
            response: r#"{"entities":[{"name":"Alice","type":"PERSON","confidence":0.95}],"relations":[{"subject":"Alice","predicate":"WORKS_AT","object":"Acme"}]}"#.to_string(),
            calls: AtomicUsize::new(0),
        };
        let extractor = LlmExtractor::new(client);
        let result = extractor.extract("Alice works at Acme").await;
        assert!(result.llm_used);
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.relations.len(), 1);
    }

    #[tokio::test]
    async fn recovers_from_truncated_json_tail() {
        let client = StubClient {
            response: r#"{"entities":[{"name":"Alice","type":"PERSON","confidence":0.9}],"relations":[{"subject":"Alice","predicate":"WORKS_AT","object":"Ac"#.to_string(),
            calls: AtomicUsize::new(0),
        };
        let extractor = LlmExtractor::new(client);
        let result = extractor.extract("Alice works at Acme").await;
        assert!(result.llm_used);
        assert_eq!(result.entities.len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_rules_when_client_errors() {
        let extractor = LlmExtractor::new(FailingClient);
        let result = extractor.extract("GitHub is where Alice works").await;
        assert!(!result.llm_used);
    }
}
