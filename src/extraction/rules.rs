//! Zero-cost, NLP-free entity and relation extraction.
//!
//! Combines a known-entity dictionary, quoted-substring extraction,
//! proper-noun detection, and a relation-pattern table. There is no NER or
//! POS-tagging pass here — no Rust equivalent is pulled into this stack —
//! so this extractor relies on the dictionary and regex techniques alone
//! and leans on the LLM extractor (`extraction::llm`) to cover what a
//! statistical tagger would otherwise catch.
use crate::entity::EntityType;
use crate::extraction::types::{
    ExtractedEntity, ExtractedRelation, ExtractionResult, TemporalMarker, TemporalMarkerType,
};
use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const MAX_TEXT_LENGTH: usize = 10_000;

const STOPWORDS: &[&str] = &[
    "的", "了", "是", "在", "和", "有", "这", "那", "就", "都", "也", "还", "要", "我", "你", "他",
    "她", "它", "我们", "你们", "他们", "这个", "那个", "什么", "怎么", "为什么", "可以", "能够",
    "应该", "比如", "然后", "所以", "因为", "但是", "如果", "虽然", "不过", "而且", "或者", "以及",
    "通过", "一个", "一些", "很多", "非常", "特别", "其实", "可能", "例如", "包括", "等等", "之类",
    "这种", "那种", "各种", "某些", "目前", "现在", "以前", "之前", "之后", "后来", "当时",
    "the", "a", "an", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do",
    "does", "did", "will", "would", "can", "could", "should", "may", "might", "must", "this",
    "that", "these", "those", "it", "its", "and", "or", "but", "if", "then", "else", "when",
    "where", "how", "why", "for", "to", "from", "with", "by", "at", "in", "on", "of",
];

/// Platform/product/brand names the dictionary pass recognizes directly,
/// bypassing the weaker regex heuristics below.
const KNOWN_ENTITIES: &[(&str, EntityType)] = &[
    ("github", EntityType::Organization),
    ("discord", EntityType::Organization),
    ("reddit", EntityType::Organization),
    ("twitter", EntityType::Organization),
    ("amazon", EntityType::Organization),
    ("shopify", EntityType::Organization),
    ("etsy", EntityType::Organization),
    ("ebay", EntityType::Organization),
    ("ai", EntityType::Concept),
    ("chatgpt", EntityType::Organization),
    ("claude", EntityType::Organization),
    ("deepseek", EntityType::Organization),
    ("openai", EntityType::Organization),
    ("anthropic", EntityType::Organization),
];

/// `(pattern, relation_type)`. Chinese patterns first, English after.
/// Earlier patterns win on overlap because matches accumulate in a dedup
/// map keyed by `(subject, object)`.
const RELATION_PATTERNS: &[(&str, &str)] = &[
    (r"(.{2,10})是(.{2,20})的(.{2,10})", "IS_A"),
    (r"(.{2,10})在(.{2,20})工作", "WORKS_AT"),
    (r"(.{2,10})住在(.{2,20})", "LIVES_IN"),
    (r"(.{2,10})喜欢(.{2,20})", "LIKES"),
    (r"\b(\w+)\s+is\s+(?:a|an|the)\s+(\w+)\b", "IS_A"),
    (r"\b(\w+)\s+works?\s+(?:at|for)\s+(\w+)\b", "WORKS_AT"),
    (r"\b(\w+)\s+lives?\s+in\s+(\w+)\b", "LIVES_IN"),
    (r"\b(\w+)\s+(?:likes?|loves?)\s+(\w+)\b", "LIKES"),
];

fn quoted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[「『"'《](.*?)[」』"'》]"#).unwrap())
}

fn proper_noun_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z][a-zA-Z0-9]{1,20})\b").unwrap())
}

fn abbreviation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Z]{2,10})\b").unwrap())
}

fn mixed_alnum_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b([a-z]+[0-9]+[a-z0-9]*|[0-9]+[a-z]+[a-z0-9]*)\b").unwrap())
}

fn english_word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-zA-Z]{3,50}").unwrap())
}

fn relation_patterns() -> &'static Vec<(Regex, &'static str)> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        RELATION_PATTERNS
            .iter()
            .map(|(pattern, rel_type)| (Regex::new(pattern).unwrap(), *rel_type))
            .collect()
    })
}

fn zh_date_patterns() -> &'static Vec<(Regex, TemporalMarkerType)> {
    static PATTERNS: OnceLock<Vec<(Regex, TemporalMarkerType)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (Regex::new(r"\d{4}年\d{1,2}月\d{1,2}日?").unwrap(), TemporalMarkerType::Point),
            (Regex::new(r"\d{4}年\d{1,2}月").unwrap(), TemporalMarkerType::Point),
            (Regex::new(r"\d{4}年").unwrap(), TemporalMarkerType::Point),
            (Regex::new(r"(从|自).{2,20}(开始|起)").unwrap(), TemporalMarkerType::Start),
            (Regex::new(r"(到|至|直到).{2,20}(结束|为止)?").unwrap(), TemporalMarkerType::End),
            (Regex::new(r".{2,10}(期间|之间)").unwrap(), TemporalMarkerType::Duration),
        ]
    })
}

fn en_date_patterns() -> &'static Vec<(Regex, TemporalMarkerType)> {
    static PATTERNS: OnceLock<Vec<(Regex, TemporalMarkerType)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        vec![
            (
                Regex::new(r"(?i)(January|February|March|April|May|June|July|August|September|October|November|December)\s+\d{1,2},?\s+\d{4}").unwrap(),
                TemporalMarkerType::Point,
            ),
            (Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").unwrap(), TemporalMarkerType::Point),
            (Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap(), TemporalMarkerType::Point),
            (Regex::new(r"(?i)(since|from)\s+.{2,20}").unwrap(), TemporalMarkerType::Start),
            (Regex::new(r"(?i)(until|to|till)\s+.{2,20}").unwrap(), TemporalMarkerType::End),
            (Regex::new(r"(?i)(during|between)\s+.{2,20}").unwrap(), TemporalMarkerType::Duration),
        ]
    })
}

const TEMPORAL_KEYWORDS: &[&str] = &[
    "从", "自从", "开始", "结束", "直到", "之前", "之后", "期间", "年", "月", "日", "今天", "昨天",
    "明天", "现在", "以前", "以后", "一直", "已经", "曾经", "将要", "正在", "from", "since",
    "until", "before", "after", "during", "when", "started", "ended", "began", "finished",
    "now", "currently", "previously", "formerly", "recently", "already", "still",
];

fn is_stopword(word: &str) -> bool {
    STOPWORDS.contains(&word.to_lowercase().as_str())
}

/// Pure dictionary- and regex-based extraction. No network calls, no cost.
#[derive(Debug, Default, Clone, Copy)]
pub struct RulesExtractor;

impl RulesExtractor {
    pub fn new() -> Self {
        Self
    }

    fn truncate(text: &str) -> &str {
        if text.len() > MAX_TEXT_LENGTH {
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        }
    }

    pub fn extract_entities(&self, text: &str) -> Vec<ExtractedEntity> {
        let text = Self::truncate(text);
        let text_lower = text.to_lowercase();
        let mut found = Vec::new();

        for (name, entity_type) in KNOWN_ENTITIES {
            if let Some(idx) = text_lower.find(name) {
                let original = &text[idx..(idx + name.len()).min(text.len())];
                let ctx_start = idx.saturating_sub(20);
                let ctx_end = (idx + name.len() + 20).min(text.len());
                found.push(ExtractedEntity {
                    name: original.to_string(),
                    entity_type: entity_type.clone(),
                    confidence: 0.9,
                    source_text: text[ctx_start..ctx_end].to_string(),
                });
            }
        }

        for m in quoted_re().captures_iter(text) {
            let name = m.get(1).map(|g| g.as_str().trim()).unwrap_or("");
            if (2..=20).contains(&name.chars().count()) && !is_stopword(name) {
                let entity_type = if name.chars().count() <= 4 {
                    EntityType::Item
                } else {
                    EntityType::Concept
                };
                found.push(ExtractedEntity {
                    name: name.to_string(),
                    entity_type,
                    confidence: 0.7,
                    source_text: text.chars().take(100).collect(),
                });
            }
        }

        let mut english_candidates: HashSet<String> = HashSet::new();
        for re in [proper_noun_re(), abbreviation_re()] {
            for m in re.find_iter(text) {
                english_candidates.insert(m.as_str().to_string());
            }
        }
        for word in english_candidates {
            if is_stopword(&word) || word.len() < 2 {
                continue;
            }
            let entity_type = if word.chars().all(|c| c.is_ascii_uppercase()) && word.len() <= 5 {
                EntityType::Concept
            } else {
                EntityType::Organization
            };
            found.push(ExtractedEntity {
                name: word,
                entity_type,
                confidence: 0.6,
                source_text: text.chars().take(100).collect(),
            });
        }

        let mut mixed_candidates: HashSet<String> = HashSet::new();
        for m in mixed_alnum_re().find_iter(text) {
            mixed_candidates.insert(m.as_str().to_string());
        }
        for word in mixed_candidates {
            if is_stopword(&word) || word.len() < 2 {
                continue;
            }
            found.push(ExtractedEntity {
                name: word,
                entity_type: EntityType::Organization,
                confidence: 0.6,
                source_text: text.chars().take(100).collect(),
            });
        }

        // Dedup by lowercase name, keeping the highest-confidence mention.
        let mut best: std::collections::HashMap<String, ExtractedEntity> =
            std::collections::HashMap::new();
        for entity in found {
            if entity.name.chars().count() < 2 {
                continue;
            }
            let key = entity.name.to_lowercase();
            match best.get(&key) {
                Some(existing) if existing.confidence >= entity.confidence => {}
                _ => {
                    best.insert(key, entity);
                }
            }
        }
        best.into_values().collect()
    }

    pub fn extract_keywords(&self, text: &str) -> Vec<String> {
        let text = Self::truncate(text);
        let mut keywords: HashSet<String> = HashSet::new();
        for m in english_word_re().find_iter(text) {
            let word = m.as_str().to_lowercase();
            if !is_stopword(&word) {
                keywords.insert(word);
            }
        }
        keywords.into_iter().collect()
    }

    /// Match each relation pattern; keep a hit only if at least one side is
    /// a recognized entity (relaxed validation — both sides need not
    /// resolve to a known entity).
    pub fn extract_relations(&self, text: &str, entities: &[ExtractedEntity]) -> Vec<ExtractedRelation> {
        let text = Self::truncate(text);
        let entity_names: HashSet<String> = entities.iter().map(|e| e.name.to_lowercase()).collect();
        let mut relations = Vec::new();

        for (re, rel_type) in relation_patterns() {
            for caps in re.captures_iter(text) {
                let subject = caps.get(1).map(|g| g.as_str().trim()).unwrap_or("");
                let object = caps.get(2).map(|g| g.as_str().trim()).unwrap_or("");
                if subject.is_empty() || object.is_empty() {
                    continue;
                }
                if entity_names.contains(&subject.to_lowercase()) || entity_names.contains(&object.to_lowercase()) {
                    relations.push(ExtractedRelation {
                        subject: subject.to_string(),
                        predicate: (*rel_type).to_string(),
                        object: object.to_string(),
                        confidence: 0.6,
                        source_text: caps.get(0).map(|g| g.as_str().to_string()).unwrap_or_default(),
                        temporal_info: None,
                    });
                }
            }
        }

        relations.extend(self.mentioned_with(text, entities));
        relations
    }

    /// Weak `MENTIONED_WITH` relations for every distinct entity pair found
    /// in the same sentence, covering co-occurrence the pattern table misses.
    fn mentioned_with(&self, text: &str, entities: &[ExtractedEntity]) -> Vec<ExtractedRelation> {
        let mut relations = Vec::new();
        let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
        for sentence in text.split(['。', '.', '!', '?', '！', '？', '\n']) {
            let sentence_lower = sentence.to_lowercase();
            let present: Vec<&ExtractedEntity> = entities
                .iter()
                .filter(|e| sentence_lower.contains(&e.name.to_lowercase()))
                .collect();
            for i in 0..present.len() {
                for j in (i + 1)..present.len() {
                    let (a, b) = (&present[i].name, &present[j].name);
                    let key = if a <= b {
                        (a.clone(), b.clone())
                    } else {
                        (b.clone(), a.clone())
                    };
                    if seen_pairs.insert(key) {
                        relations.push(ExtractedRelation {
                            subject: a.clone(),
                            predicate: "MENTIONED_WITH".to_string(),
                            object: b.clone(),
                            confidence: 0.5,
                            source_text: sentence.trim().chars().take(200).collect(),
                            temporal_info: None,
                        });
                    }
                }
            }
        }
        relations
    }

    pub fn detect_temporal_markers(&self, text: &str) -> Vec<TemporalMarker> {
        let text = Self::truncate(text);
        let mut markers = Vec::new();

        for (re, marker_type) in zh_date_patterns().iter().chain(en_date_patterns()) {
            for m in re.find_iter(text) {
                markers.push(TemporalMarker {
                    text: m.as_str().to_string(),
                    marker_type: *marker_type,
                    start: m.start(),
                    end: m.end(),
                });
            }
        }

        let text_lower = text.to_lowercase();
        for keyword in TEMPORAL_KEYWORDS {
            if let Some(idx) = text_lower.find(keyword) {
                let ctx_start = idx.saturating_sub(10);
                let ctx_end = (idx + keyword.len() + 20).min(text.len());
                markers.push(TemporalMarker {
                    text: text[ctx_start..ctx_end].to_string(),
                    marker_type: TemporalMarkerType::Keyword,
                    start: idx,
                    end: idx + keyword.len(),
                });
            }
        }

        let mut seen = HashSet::new();
        markers.retain(|m| seen.insert((m.text.clone(), m.marker_type)));
        markers
    }

    pub fn extract(&self, text: &str) -> ExtractionResult {
        if text.is_empty() {
            return ExtractionResult::empty();
        }
        let entities = self.extract_entities(text);
        let keywords = self.extract_keywords(text);
        let relations = self.extract_relations(text, &entities);
        let temporal_markers = self.detect_temporal_markers(text);
        ExtractionResult {
            entities,
            relations,
            temporal_markers,
            keywords,
            complexity_score: 0.0,
            llm_used: false,
        }
    }
}
