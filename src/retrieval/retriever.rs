//! The 8-stage retrieval funnel: KeywordFilter, EntityExpand, NgramExpand
//! (run concurrently), MetadataFilter (mandatory gate), VectorCoarse,
//! VectorFine, Rerank, and an optional LlmFilter.
use crate::extraction::LlmClient;
use crate::index::{EntityIndex, InvertedIndex, MetadataIndex, MetadataQuery, NgramIndex};
use crate::storage::VolumeStore;
use crate::types::{MetaMap, Scope};
use crate::vector::{AnnIndex, Vector};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

#[derive(Debug, Clone, Serialize)]
pub struct StageStats {
    pub stage: &'static str,
    pub input_count: usize,
    pub output_count: usize,
    pub elapsed_ms: f64,
    pub filtered: usize,
}

fn record(stats: &mut Vec<StageStats>, stage: &'static str, input: usize, output: usize, start: Instant) {
    stats.push(StageStats {
        stage,
        input_count: input,
        output_count: output,
        elapsed_ms: start.elapsed().as_secs_f64() * 1000.0,
        filtered: input.saturating_sub(output),
    });
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievedMemory {
    pub id: String,
    pub content: String,
    pub score: f32,
    pub matched_entities: Vec<String>,
    pub source_stage: &'static str,
    pub metadata: MetaMap,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub vector_coarse_top_k: usize,
    pub vector_fine_top_k: usize,
    pub rerank_top_k: usize,
    pub llm_filter_enabled: bool,
    pub llm_filter_top_k: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            vector_coarse_top_k: 100,
            vector_fine_top_k: 20,
            rerank_top_k: 10,
            llm_filter_enabled: false,
            llm_filter_top_k: 5,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RetrievalQuery {
    pub text: String,
    pub keywords: Vec<String>,
    pub entities: Vec<String>,
    pub vector: Option<Vector>,
    pub metadata_filter: Option<MetadataQuery>,
}

pub struct Retriever<'a> {
    volume: &'a VolumeStore,
    inverted: &'a InvertedIndex,
    entities: &'a EntityIndex,
    ngram: &'a NgramIndex,
    metadata: &'a MetadataIndex,
    vector: Option<&'a dyn AnnIndex>,
    config: RetrieverConfig,
}

impl<'a> Retriever<'a> {
    pub fn new(
        volume: &'a VolumeStore,
        inverted: &'a InvertedIndex,
        entities: &'a EntityIndex,
        ngram: &'a NgramIndex,
        metadata: &'a MetadataIndex,
        vector: Option<&'a dyn AnnIndex>,
        config: RetrieverConfig,
    ) -> Self {
        Self {
            volume,
            inverted,
            entities,
            ngram,
            metadata,
            vector,
            config,
        }
    }

    /// Run the full funnel for `query`, restricted to `scope`. `llm` enables
    /// the optional L8 pass when the config turns it on.
    pub async fn retrieve(
        &self,
        query: &RetrievalQuery,
        scope: &Scope,
        top_k: usize,
        llm: Option<&dyn LlmClient>,
    ) -> (Vec<RetrievedMemory>, Vec<StageStats>) {
        let mut stats = Vec::new();

        // L1/L2/L3/L4 widen independently; only L2(keyword)/L3(entity)/L4(ngram)
        // have a real implementation here (no bloom-filter layer: DashMap
        // lookups are already O(1), so a bloom pre-filter buys nothing).
        let keyword_start = Instant::now();
        let entity_start = Instant::now();
        let ngram_start = Instant::now();
        let (keyword_hits, entity_hits, ngram_hits) = tokio::join!(
            self.keyword_filter(&query.keywords),
            self.entity_expand(&query.entities),
            self.ngram_expand(&query.text),
        );
        record(&mut stats, "KeywordFilter", 0, keyword_hits.len(), keyword_start);
        record(&mut stats, "EntityExpand", 0, entity_hits.len(), entity_start);
        record(&mut stats, "NgramExpand", 0, ngram_hits.len(), ngram_start);

        let mut candidates: HashSet<String> = HashSet::new();
        candidates.extend(keyword_hits);
        candidates.extend(entity_hits);
        candidates.extend(ngram_hits);

        // L4 MetadataFilter: mandatory intersection when the caller supplied one.
        if let Some(filter) = &query.metadata_filter {
            let start = Instant::now();
            let input = candidates.len();
            let matched = self.metadata.query(filter);
            candidates.retain(|id| matched.contains(id));
            record(&mut stats, "MetadataFilter", input, candidates.len(), start);
        }

        // L5 VectorCoarse: seed the pool with cosine-scored hits.
        let mut scored: HashMap<String, f32> = candidates.iter().map(|id| (id.clone(), 0.0)).collect();
        if let (Some(vector_index), Some(query_vector)) = (self.vector, &query.vector) {
            let start = Instant::now();
            let input = scored.len();
            for (id, score) in vector_index.search(query_vector, self.config.vector_coarse_top_k, Some(scope)) {
                scored.entry(id).and_modify(|s| *s = (*s).max(score)).or_insert(score);
            }
            record(&mut stats, "VectorCoarse", input, scored.len(), start);
        }

        // L6 VectorFine: keep the top-scoring slice. The configured widths are
        // floors, not ceilings — a caller asking for more than rerank_top_k
        // results (e.g. a literal-recall sweep) must not be truncated away
        // before Rerank even runs.
        let start = Instant::now();
        let input = scored.len();
        let mut ranked: Vec<(String, f32)> = scored.into_iter().collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        ranked.truncate(self.config.vector_fine_top_k.max(self.config.rerank_top_k).max(top_k));
        record(&mut stats, "VectorFine", input, ranked.len(), start);

        // Resolve items, enforcing scope as a final safety gate.
        let mut memories: Vec<RetrievedMemory> = Vec::new();
        for (id, score) in ranked {
            if let Ok(Some(item)) = self.volume.get_by_id(&id) {
                if item.scope != *scope {
                    continue;
                }
                let matched_entities: Vec<String> = query
                    .entities
                    .iter()
                    .filter(|name| item.content.to_lowercase().contains(&name.to_lowercase()))
                    .cloned()
                    .collect();
                memories.push(RetrievedMemory {
                    id: item.id,
                    content: item.content,
                    score,
                    matched_entities,
                    source_stage: "VectorFine",
                    metadata: item.metadata,
                    created_at: item.created_at,
                });
            }
        }

        // L7 Rerank. rerank_top_k is the funnel's steady-state width; a
        // caller-requested top_k wider than that (e.g. a bulk recall query)
        // still gets every reranked candidate the earlier stages found.
        let start = Instant::now();
        let input = memories.len();
        self.rerank(&mut memories, query);
        memories.truncate(self.config.rerank_top_k.max(top_k));
        for m in &mut memories {
            m.source_stage = "Rerank";
        }
        record(&mut stats, "Rerank", input, memories.len(), start);

        // L8 LlmFilter (optional).
        if self.config.llm_filter_enabled {
            if let Some(client) = llm {
                let start = Instant::now();
                let input = memories.len();
                memories = self.llm_filter(memories, &query.text, client).await;
                memories.truncate(self.config.llm_filter_top_k);
                record(&mut stats, "LlmFilter", input, memories.len(), start);
            }
        }

        memories.truncate(top_k);
        (memories, stats)
    }

    async fn keyword_filter(&self, keywords: &[String]) -> HashSet<String> {
        if keywords.is_empty() {
            return HashSet::new();
        }
        self.inverted.search_any(keywords)
    }

    async fn entity_expand(&self, entity_names: &[String]) -> HashSet<String> {
        let mut hits = HashSet::new();
        for name in entity_names {
            if let Some(entity) = self.entities.get_by_name(name) {
                hits.extend(entity.turn_references.iter().cloned());
            }
        }
        hits
    }

    async fn ngram_expand(&self, query: &str) -> HashSet<String> {
        self.ngram.search(query)
    }

    /// +0.1 per matching entity, +0.05 per literal keyword match, +0.1 if
    /// created within the last hour, +0.05 if within the last day.
    fn rerank(&self, memories: &mut [RetrievedMemory], query: &RetrievalQuery) {
        let now = Utc::now();
        for memory in memories.iter_mut() {
            let mut bonus = 0.0f32;
            bonus += memory.matched_entities.len() as f32 * 0.1;

            let content_lower = memory.content.to_lowercase();
            for kw in &query.keywords {
                if content_lower.contains(&kw.to_lowercase()) {
                    bonus += 0.05;
                }
            }

            let age = now.signed_duration_since(memory.created_at);
            if age.num_seconds() <= 3600 {
                bonus += 0.1;
            } else if age.num_seconds() <= 86_400 {
                bonus += 0.05;
            }

            memory.score += bonus;
        }
        memories.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    }

    /// Ask the LLM which of up to 10 candidates to keep. On timeout, error,
    /// or an unparseable response the rerank order is preserved untouched.
    async fn llm_filter(
        &self,
        memories: Vec<RetrievedMemory>,
        query: &str,
        client: &dyn LlmClient,
    ) -> Vec<RetrievedMemory> {
        let candidates: Vec<&RetrievedMemory> = memories.iter().take(10).collect();
        let listing: String = candidates
            .iter()
            .enumerate()
            .map(|(i, m)| format!("{}. {}", i + 1, m.content.chars().take(100).collect::<String>()))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Which of these memories are relevant to the query below? Reply with comma-separated numbers, or \"none\".\n\nQuery: {query}\n\nMemories:\n{listing}"
        );

        match client.complete(&prompt, 50).await {
            Ok(response) => {
                let response = response.trim();
                if response.eq_ignore_ascii_case("none") {
                    return Vec::new();
                }
                let keep: HashSet<usize> = response
                    .split(',')
                    .filter_map(|s| s.trim().parse::<usize>().ok())
                    .filter_map(|n| n.checked_sub(1))
                    .collect();
                if keep.is_empty() {
                    return memories;
                }
                memories
                    .into_iter()
                    .enumerate()
                    .filter(|(i, _)| keep.contains(i))
                    .map(|(_, m)| m)
                    .collect()
            }
            Err(_) => memories,
        }
    }
}
