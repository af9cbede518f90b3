//! `Engine`: the façade that binds every store, index, and pipeline behind
//! a small API. `Arc`-wrapped subsystems are assembled once in a
//! constructor, cheap to `Clone`, with per-scope coordination instead of a
//! single global lock.
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::RwLock as AsyncRwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::budget::{BudgetConfig, BudgetManager};
use crate::config::{Config, ExtractionMode as ConfigExtractionMode};
use crate::error::{RecallError, RecallResult};
use crate::extraction::{
    AdaptiveExtractor, ExtractionResult, LlmClient, LlmExtractor, RulesExtractor,
};
use crate::foreshadowing::{Foreshadowing, ForeshadowingStore};
use crate::episode::{Episode, EpisodeStore};
use crate::graph::KnowledgeGraph;
use crate::index::{EntityIndex, InvertedIndex, MetadataIndex, MetadataQuery, NgramIndex};
use crate::relation::Relation;
use crate::retrieval::{
    BuiltContext, ContextBuilder, ConversationTurn, RetrievalQuery, RetrievedMemory, Retriever,
    RetrieverConfig, StageStats,
};
use crate::storage::{ScopeRecord, ScopeStore, VolumeStore};
use crate::types::{Item, MetaMap, NewItem, Scope};
use crate::vector::{AnnIndex, EmbeddingBackend, IvfHnswConfig, IvfHnswIndex, NoneBackend};

/// Picks among the three extraction strategies behind one call, so `Engine`
/// doesn't need to be generic over an `LlmClient` implementation.
enum ExtractorHandle {
    Rules(RulesExtractor),
    Adaptive(AdaptiveExtractor<Arc<dyn LlmClient>>),
    Llm(LlmExtractor<Arc<dyn LlmClient>>),
}

impl ExtractorHandle {
    async fn extract(&self, text: &str) -> ExtractionResult {
        match self {
            ExtractorHandle::Rules(r) => r.extract(text),
            ExtractorHandle::Adaptive(a) => a.extract(text).await,
            ExtractorHandle::Llm(l) => l.extract(text).await,
        }
    }
}

/// Result of `Engine::add` / one item of `Engine::add_batch`.
#[derive(Debug, Clone)]
pub struct AddResult {
    pub id: String,
    pub success: bool,
    pub entities: Vec<String>,
    pub message: String,
}

/// A retrieval request, matching the `/v1/memories/search` body shape.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub top_k: usize,
    pub source: Option<String>,
    pub tags: Vec<String>,
    pub category: Option<String>,
    pub content_type: Option<String>,
    pub event_time_start: Option<String>,
    pub event_time_end: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ConsolidationSummary {
    pub examined: usize,
    pub merged: usize,
}

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub total_turns: u64,
    pub scopes_open: usize,
    pub entities: usize,
    pub relations: usize,
    pub episodes: usize,
    pub foreshadowing: usize,
    pub inverted_keywords: usize,
    pub vector_count: usize,
    pub budget_daily_usage_pct: f64,
    pub budget_hourly_usage_pct: f64,
    pub budget_suggestion: &'static str,
}

/// Binds `VolumeStore`, the per-scope `ScopeStore`s, every index, the
/// knowledge graph, the extractor, the retriever, and the budget manager
/// behind `add`/`search`/`buildContext`/... . Cheap to `Clone` (every field
/// is an `Arc`); coordination across calls happens through per-scope locks
/// rather than one engine-wide mutex.
#[derive(Clone)]
pub struct Engine {
    config: Arc<Config>,
    data_root: PathBuf,
    volume: Arc<VolumeStore>,
    inverted: Arc<InvertedIndex>,
    entities: Arc<EntityIndex>,
    ngram: Arc<NgramIndex>,
    metadata: Arc<MetadataIndex>,
    vector: Option<Arc<dyn AnnIndex>>,
    embeddings: Option<Arc<dyn EmbeddingBackend>>,
    graph: Arc<KnowledgeGraph>,
    episodes: Arc<EpisodeStore>,
    foreshadowing: Arc<ForeshadowingStore>,
    budget: Arc<BudgetManager>,
    llm: Option<Arc<dyn LlmClient>>,
    extractor: Arc<ExtractorHandle>,
    retriever_config: RetrieverConfig,
    scopes: Arc<DashMap<Scope, Arc<ScopeStore>>>,
    scope_locks: Arc<DashMap<Scope, Arc<AsyncRwLock<()>>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("data_root", &self.data_root)
            .field("total_turns", &self.volume.total_turns())
            .finish()
    }
}

impl Engine {
    /// Open (creating if absent) an engine rooted at `config.data_root`.
    /// Every subsystem is constructed up front and wrapped in an `Arc`.
    pub async fn open(config: Config) -> RecallResult<Self> {
        info!(data_root = %config.data_root.display(), "opening recall engine");
        let data_root = config.data_root.clone();
        std::fs::create_dir_all(&data_root)?;

        let volume = Arc::new(VolumeStore::open(
            data_root.clone(),
            config.volume_size,
            config.volume_file_size,
            config.preload_volumes,
        )?);
        let inverted = Arc::new(InvertedIndex::open(&data_root, config.compact_threshold)?);
        let entities = Arc::new(EntityIndex::open(&data_root)?);
        let ngram = Arc::new(NgramIndex::open(&data_root)?);
        let metadata = Arc::new(MetadataIndex::open(&data_root)?);
        let graph = Arc::new(KnowledgeGraph::open(&data_root)?);
        let episodes = Arc::new(EpisodeStore::new());
        let foreshadowing = Arc::new(ForeshadowingStore::new());
        let budget = Arc::new(BudgetManager::open(&data_root, BudgetConfig::default())?);

        let vector: Option<Arc<dyn AnnIndex>> = match config.embedding_mode {
            crate::config::EmbeddingMode::None => None,
            _ => Some(Arc::new(IvfHnswIndex::open(
                &data_root,
                "main",
                IvfHnswConfig::default(),
            )?)),
        };
        let embeddings: Option<Arc<dyn EmbeddingBackend>> = match config.embedding_mode {
            crate::config::EmbeddingMode::None => Some(Arc::new(NoneBackend)),
            _ => None,
        };

        let llm: Option<Arc<dyn LlmClient>> = None;
        let extractor = Arc::new(match config.extraction_mode {
            ConfigExtractionMode::Rules => ExtractorHandle::Rules(RulesExtractor::new()),
            ConfigExtractionMode::Llm => match &llm {
                Some(client) => ExtractorHandle::Llm(LlmExtractor::new(Arc::clone(client))),
                None => ExtractorHandle::Rules(RulesExtractor::new()),
            },
            ConfigExtractionMode::Adaptive => {
                ExtractorHandle::Adaptive(AdaptiveExtractor::new(llm.clone(), Some(Arc::clone(&budget))))
            }
        });

        Ok(Self {
            config: Arc::new(config),
            data_root,
            volume,
            inverted,
            entities,
            ngram,
            metadata,
            vector,
            embeddings,
            graph,
            episodes,
            foreshadowing,
            budget,
            llm,
            extractor,
            retriever_config: RetrieverConfig::default(),
            scopes: Arc::new(DashMap::new()),
            scope_locks: Arc::new(DashMap::new()),
        })
    }

    /// Plug in a concrete LLM collaborator after construction. Rebuilds the
    /// extractor if the configured mode needs one; shared collaborators are
    /// handed in post-construction rather than threaded through every
    /// constructor arg.
    pub fn with_llm_client(mut self, client: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(Arc::clone(&client));
        self.extractor = Arc::new(match self.config.extraction_mode {
            ConfigExtractionMode::Rules => ExtractorHandle::Rules(RulesExtractor::new()),
            ConfigExtractionMode::Llm => ExtractorHandle::Llm(LlmExtractor::new(client)),
            ConfigExtractionMode::Adaptive => {
                ExtractorHandle::Adaptive(AdaptiveExtractor::new(Some(client), Some(Arc::clone(&self.budget))))
            }
        });
        self
    }

    pub fn with_embedding_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.embeddings = Some(backend);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn scope_store(&self, scope: &Scope) -> RecallResult<Arc<ScopeStore>> {
        if let Some(existing) = self.scopes.get(scope) {
            return Ok(Arc::clone(&existing));
        }
        let store = Arc::new(ScopeStore::open(&self.data_root, scope)?);
        self.scopes.insert(scope.clone(), Arc::clone(&store));
        Ok(store)
    }

    fn scope_lock(&self, scope: &Scope) -> Arc<AsyncRwLock<()>> {
        Arc::clone(
            self.scope_locks
                .entry(scope.clone())
                .or_insert_with(|| Arc::new(AsyncRwLock::new(()))),
        )
    }

    /// Add one item: run extraction, append to the canonical log, update the
    /// working-memory record, and fan the extraction results out to every
    /// index. A failure in one index is logged and does not roll back
    /// indexes that already succeeded — the item is already durable in
    /// `VolumeStore` by that point.
    pub async fn add(&self, new_item: NewItem) -> RecallResult<AddResult> {
        if new_item.content.trim().is_empty() {
            return Err(RecallError::Validation("content must not be empty".into()));
        }
        let scope = new_item.scope.clone();
        let lock = self.scope_lock(&scope);
        let _guard = lock.write().await;

        let scope_store = self.scope_store(&scope)?;
        let id = Uuid::new_v4().to_string();

        let extraction = self.extractor.extract(&new_item.content).await;

        let item = Item::from_new(new_item.clone(), id.clone(), 0);
        let turn_number = self.volume.append(item)?;
        debug!(id = %id, turn = turn_number, scope = %scope, "item appended");

        scope_store.add(id.clone(), new_item.content.clone(), new_item.metadata.clone())?;

        if let Err(e) = self.inverted.add_batch(
            &extraction
                .keywords
                .iter()
                .map(|k| (k.to_lowercase(), id.clone()))
                .collect::<Vec<_>>(),
        ) {
            warn!(error = %e, id = %id, "failed to update inverted index");
        }

        self.ngram.add(&id, &new_item.content);

        if let Err(e) = self.metadata.add(
            &id,
            new_item.source.as_deref(),
            &new_item.tags,
            new_item.category.as_deref(),
            new_item.content_type.as_deref(),
            new_item.event_time.as_deref(),
        ) {
            warn!(error = %e, id = %id, "failed to update metadata index");
        }

        let mut entity_names = Vec::new();
        let mut name_to_id = std::collections::HashMap::new();
        for entity in &extraction.entities {
            match self.entities.add_occurrence(&entity.name, entity.entity_type.clone(), &id) {
                Ok(stored) => {
                    entity_names.push(stored.name.clone());
                    name_to_id.insert(entity.name.to_lowercase(), stored.id.clone());
                    scope_store.touch_focus(&stored.name, turn_number);
                }
                Err(e) => warn!(error = %e, entity = %entity.name, "failed to update entity index"),
            }
        }

        for rel in &extraction.relations {
            let source_id = name_to_id
                .get(&rel.subject.to_lowercase())
                .cloned()
                .or_else(|| self.entities.get_by_name(&rel.subject).map(|e| e.id));
            let target_id = name_to_id
                .get(&rel.object.to_lowercase())
                .cloned()
                .or_else(|| self.entities.get_by_name(&rel.object).map(|e| e.id));
            if let (Some(source_entity_id), Some(target_entity_id)) = (source_id, target_id) {
                let relation = Relation {
                    id: Uuid::new_v4().to_string(),
                    source_entity_id,
                    target_entity_id,
                    relation_type: rel.predicate.clone(),
                    fact: rel.source_text.clone(),
                    valid_at: rel.temporal_info.clone(),
                    invalid_at: None,
                    confidence: rel.confidence,
                    source_text: rel.source_text.clone(),
                    evidence: Vec::new(),
                };
                if let Err(e) = self.graph.add_relation(relation) {
                    warn!(error = %e, "failed to update knowledge graph");
                }
            }
        }

        if let Some(embeddings) = &self.embeddings {
            if embeddings.is_available() {
                if let (Some(vector_index), Ok(vector)) =
                    (&self.vector, embeddings.encode(&new_item.content).await)
                {
                    if let Err(e) = vector_index.add(&id, vector, Some(&scope)) {
                        warn!(error = %e, id = %id, "failed to update vector index");
                    }
                }
            }
        }

        if self.config.episode_tracking_enabled {
            let mut episode = Episode::new(Uuid::new_v4().to_string(), new_item.content.clone());
            episode.memory_ids.push(id.clone());
            self.episodes.insert(episode);
        }

        self.foreshadowing.scan_new_content(&new_item.content);

        Ok(AddResult {
            id,
            success: true,
            entities: entity_names,
            message: "ok".to_string(),
        })
    }

    pub async fn add_batch(&self, items: Vec<NewItem>) -> RecallResult<Vec<AddResult>> {
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            match self.add(item).await {
                Ok(r) => results.push(r),
                Err(e) => results.push(AddResult {
                    id: String::new(),
                    success: false,
                    entities: Vec::new(),
                    message: e.to_string(),
                }),
            }
        }
        Ok(results)
    }

    /// The caller-visible item: the immutable `VolumeStore` record with
    /// content/metadata overridden by the (possibly edited) working-memory
    /// record, which is the liveness source of truth for a scope.
    pub async fn get(&self, id: &str, scope: &Scope) -> RecallResult<Option<Item>> {
        let lock = self.scope_lock(scope);
        let _guard = lock.read().await;
        self.get_locked(id, scope)
    }

    fn get_locked(&self, id: &str, scope: &Scope) -> RecallResult<Option<Item>> {
        let scope_store = self.scope_store(scope)?;
        let Some(record) = scope_store.get(id) else {
            return Ok(None);
        };
        let Some(mut item) = self.volume.get_by_id(id)? else {
            return Ok(None);
        };
        item.content = record.content;
        item.metadata = record.metadata;
        Ok(Some(item))
    }

    pub async fn update(
        &self,
        id: &str,
        scope: &Scope,
        content: Option<String>,
        metadata: Option<MetaMap>,
    ) -> RecallResult<bool> {
        let lock = self.scope_lock(scope);
        let _guard = lock.write().await;

        let scope_store = self.scope_store(scope)?;
        let updated = scope_store.update(id, content.clone(), metadata)?;
        if !updated {
            return Ok(false);
        }

        if let Some(content) = content {
            let ids = HashSet::from([id.to_string()]);
            self.inverted.remove_by_ids(&ids);
            self.ngram.remove_by_ids(&ids);
            let rules = RulesExtractor::new();
            let keywords = rules.extract_keywords(&content);
            self.inverted.add_batch(
                &keywords.into_iter().map(|k| (k.to_lowercase(), id.to_string())).collect::<Vec<_>>(),
            )?;
            self.ngram.add(id, &content);
        }
        Ok(true)
    }

    pub async fn delete(&self, id: &str, scope: &Scope) -> RecallResult<bool> {
        let lock = self.scope_lock(scope);
        let _guard = lock.write().await;
        self.delete_locked(id, scope)
    }

    fn delete_locked(&self, id: &str, scope: &Scope) -> RecallResult<bool> {
        let scope_store = self.scope_store(scope)?;
        let removed = scope_store.delete(id)?;
        if !removed {
            return Ok(false);
        }
        self.volume.forget_id(id);
        let ids = HashSet::from([id.to_string()]);
        self.inverted.remove_by_ids(&ids);
        self.ngram.remove_by_ids(&ids);
        self.metadata.remove(id)?;
        self.entities.remove_by_item_ids(&ids)?;
        if let Some(vector) = &self.vector {
            vector.remove(id);
        }
        self.episodes.remove_by_memory_id(id);
        Ok(true)
    }

    /// Wipe every item in `scope`. Refuses the default-user scope unless
    /// `confirm` is set.
    pub async fn clear(&self, scope: &Scope, confirm: bool) -> RecallResult<()> {
        if scope.is_default_user() && !confirm {
            return Err(RecallError::ScopeDenied {
                reason: "clearing the default user scope requires confirm=true".to_string(),
            });
        }
        let lock = self.scope_lock(scope);
        let _guard = lock.write().await;

        let scope_store = self.scope_store(scope)?;
        let all: Vec<ScopeRecord> = scope_store.get_all(usize::MAX);
        for record in &all {
            self.volume.forget_id(&record.id);
            let ids = HashSet::from([record.id.clone()]);
            self.inverted.remove_by_ids(&ids);
            self.ngram.remove_by_ids(&ids);
            self.metadata.remove(&record.id)?;
            self.entities.remove_by_item_ids(&ids)?;
            if let Some(vector) = &self.vector {
                vector.remove(&record.id);
            }
            self.episodes.remove_by_memory_id(&record.id);
        }
        scope_store.clear()?;
        info!(scope = %scope, cleared = all.len(), "scope cleared");
        Ok(())
    }

    /// Run the 8-stage funnel for `request` restricted to `scope`.
    pub async fn search(
        &self,
        request: &SearchRequest,
        scope: &Scope,
    ) -> RecallResult<(Vec<RetrievedMemory>, Vec<StageStats>)> {
        let lock = self.scope_lock(scope);
        let _guard = lock.read().await;

        let rules = RulesExtractor::new();
        let keywords = rules.extract_keywords(&request.query);
        let entities: Vec<String> = rules
            .extract_entities(&request.query)
            .into_iter()
            .map(|e| e.name)
            .collect();

        let vector = if let Some(embeddings) = &self.embeddings {
            if embeddings.is_available() {
                embeddings.encode(&request.query).await.ok()
            } else {
                None
            }
        } else {
            None
        };

        let metadata_filter = if request.source.is_some()
            || !request.tags.is_empty()
            || request.category.is_some()
            || request.content_type.is_some()
            || request.event_time_start.is_some()
            || request.event_time_end.is_some()
        {
            Some(MetadataQuery {
                source: request.source.clone(),
                tags: request.tags.clone(),
                category: request.category.clone(),
                content_type: request.content_type.clone(),
                event_time_start: request.event_time_start.clone(),
                event_time_end: request.event_time_end.clone(),
            })
        } else {
            None
        };

        let query = RetrievalQuery {
            text: request.query.clone(),
            keywords,
            entities,
            vector,
            metadata_filter,
        };

        let retriever = Retriever::new(
            &self.volume,
            &self.inverted,
            &self.entities,
            &self.ngram,
            &self.metadata,
            self.vector.as_deref(),
            self.retriever_config.clone(),
        );
        let top_k = if request.top_k == 0 { 10 } else { request.top_k };
        let (mut memories, stats) = retriever.retrieve(&query, scope, top_k, self.llm.as_deref()).await;

        // Step 4 of the funnel's substring-robust fallback: a query token that
        // no structured index carries (a bare number, an unseen CJK phrase)
        // still has to surface the item, so supplement the ranked result with
        // whatever ScopeStore's exhaustive substring scan finds and wasn't
        // already returned by the funnel.
        let scope_store = self.scope_store(scope)?;
        let existing_ids: HashSet<String> = memories.iter().map(|m| m.id.clone()).collect();
        for record in scope_store.search(&request.query, top_k.max(50)) {
            if existing_ids.contains(&record.id) {
                continue;
            }
            memories.push(RetrievedMemory {
                id: record.id,
                content: record.content,
                score: 0.0,
                matched_entities: Vec::new(),
                source_stage: "ScopeSubstringFallback",
                metadata: record.metadata,
                created_at: record.created_at,
            });
        }
        Ok((memories, stats))
    }

    pub async fn get_all(&self, scope: &Scope, limit: usize) -> RecallResult<Vec<Item>> {
        let lock = self.scope_lock(scope);
        let _guard = lock.read().await;
        let scope_store = self.scope_store(scope)?;
        let mut items = Vec::new();
        for record in scope_store.get_all(limit) {
            if let Some(mut item) = self.volume.get_by_id(&record.id)? {
                item.content = record.content;
                item.metadata = record.metadata;
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Retrieve + pack into a token-budgeted prompt section.
    pub async fn build_context(
        &self,
        request: &SearchRequest,
        scope: &Scope,
        max_tokens: f64,
        include_recent: usize,
        system_prompt: Option<&str>,
    ) -> RecallResult<BuiltContext> {
        let (memories, _stats) = self.search(request, scope).await?;

        let recent_turns: Vec<ConversationTurn> = if include_recent > 0 {
            let lock = self.scope_lock(scope);
            let _guard = lock.read().await;
            let scope_store = self.scope_store(scope)?;
            scope_store
                .get_recent(include_recent)
                .into_iter()
                .rev()
                .map(|r| ConversationTurn { role: "user".to_string(), content: r.content })
                .collect()
        } else {
            Vec::new()
        };

        let builder = ContextBuilder::new(max_tokens);
        Ok(builder.build(&memories, &recent_turns, system_prompt, 0.6))
    }

    pub fn plant_foreshadowing(&self, content: impl Into<String>) -> Foreshadowing {
        let f = Foreshadowing::plant(Uuid::new_v4().to_string(), content, self.volume.total_turns());
        self.foreshadowing.plant(f.clone());
        f
    }

    pub fn resolve_foreshadowing(&self, id: &str, resolution_content: impl Into<String>) -> bool {
        self.foreshadowing.resolve(id, self.volume.total_turns(), resolution_content)
    }

    pub fn list_foreshadowing(&self) -> Vec<Foreshadowing> {
        self.foreshadowing.all()
    }

    /// Merge near-duplicate working-memory records within `scope`. The
    /// similarity threshold is a plain Jaccard index over lower-cased word
    /// sets; the exact consolidation mechanism is an implementer's choice
    /// as long as idempotence holds, so repeated calls
    /// with no new duplicates report `merged: 0`.
    pub async fn consolidate(&self, scope: &Scope) -> RecallResult<ConsolidationSummary> {
        let lock = self.scope_lock(scope);
        let _guard = lock.write().await;

        let scope_store = self.scope_store(scope)?;
        let records = scope_store.get_all(usize::MAX);
        let mut merged = 0usize;
        let mut dropped: HashSet<String> = HashSet::new();

        for i in 0..records.len() {
            if dropped.contains(&records[i].id) {
                continue;
            }
            let words_i = word_set(&records[i].content);
            for candidate in records.iter().skip(i + 1) {
                if dropped.contains(&candidate.id) {
                    continue;
                }
                let words_j = word_set(&candidate.content);
                if jaccard(&words_i, &words_j) >= self.config.dedup_high_threshold as f64 {
                    self.delete_locked(&candidate.id, scope)?;
                    dropped.insert(candidate.id.clone());
                    merged += 1;
                }
            }
        }

        Ok(ConsolidationSummary { examined: records.len(), merged })
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            total_turns: self.volume.total_turns(),
            scopes_open: self.scopes.len(),
            entities: self.entities.len(),
            relations: self.graph.len(),
            episodes: self.episodes.len(),
            foreshadowing: self.foreshadowing.all().len(),
            inverted_keywords: self.inverted.len(),
            vector_count: self.vector.as_ref().map(|v| v.len()).unwrap_or(0),
            budget_daily_usage_pct: self.budget.get_usage_pct(crate::budget::BudgetPeriod::Daily),
            budget_hourly_usage_pct: self.budget.get_usage_pct(crate::budget::BudgetPeriod::Hourly),
            budget_suggestion: self.budget.suggest_degradation(),
        }
    }

    /// Administrative full wipe of every store and index. Stale vector
    /// entries are left in place rather than scrubbed one by one (`AnnIndex`
    /// has no bulk-clear): once `VolumeStore`/`ScopeStore` are empty,
    /// `Retriever`'s final scope-resolution gate makes them unreachable, the
    /// same safety net that already covers per-scope `clear`.
    pub async fn reset(&self) -> RecallResult<()> {
        warn!("resetting recall engine: wiping all stores and indexes");
        self.volume.clear()?;
        self.inverted.clear()?;
        self.entities.clear()?;
        self.ngram.clear()?;
        self.metadata.clear()?;
        self.graph.clear()?;
        self.episodes.clear();
        self.foreshadowing.clear();
        for entry in self.scopes.iter() {
            entry.value().clear()?;
        }
        self.scopes.clear();
        self.scope_locks.clear();
        Ok(())
    }

    /// Scopes with an open (cached) `ScopeStore`, for the maintenance
    /// scheduler's periodic consolidation sweep. A scope that has never been
    /// touched this process simply isn't visited until it is.
    pub fn open_scopes(&self) -> Vec<Scope> {
        self.scopes.iter().map(|e| e.key().clone()).collect()
    }

    /// Compact the inverted index's WAL and rebuild the vector index,
    /// reclaiming space from tombstoned entries. Called periodically by
    /// [`crate::maintainer::Maintainer`], not on the request path.
    pub async fn compact(&self) -> RecallResult<()> {
        self.inverted.compact()?;
        if let Some(vector) = &self.vector {
            vector.rebuild()?;
        }
        Ok(())
    }

    pub fn entity_by_name(&self, name: &str) -> Option<crate::entity::Entity> {
        self.entities.get_by_name(name)
    }

    pub fn top_entities(&self, n: usize) -> Vec<crate::entity::Entity> {
        self.entities.get_top(n)
    }

    pub fn graph_traverse(&self, entity_id: &str, depth: usize, types: Option<&[String]>) -> Vec<Relation> {
        self.graph.neighbors(entity_id, depth, types)
    }

    /// Flush every durable store in a fixed order, then release handles.
    /// `Engine` holds no raw file descriptors itself (every
    /// store manages its own), so this is just the ordered flush sequence.
    pub async fn close(&self) -> RecallResult<()> {
        self.volume.flush()?;
        self.metadata.flush()?;
        self.inverted.flush()?;
        if let Some(vector) = &self.vector {
            vector.flush()?;
        }
        self.entities.flush()?;
        self.ngram.flush()?;
        info!("engine closed, all stores flushed");
        Ok(())
    }
}

fn word_set(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| !w.is_empty())
        .collect()
}

fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut cfg = Config::default();
        cfg.data_root = dir.to_path_buf();
        cfg.extraction_mode = ConfigExtractionMode::Rules;
        cfg
    }

    #[tokio::test]
    async fn add_then_get_round_trips_content() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).await.unwrap();
        let scope = Scope::for_user("alice");
        let result = engine
            .add(NewItem { content: "DeepSeek R1 发布，引发 AI 圈关注".into(), scope: scope.clone(), ..Default::default() })
            .await
            .unwrap();
        assert!(result.success);

        let item = engine.get(&result.id, &scope).await.unwrap().unwrap();
        assert_eq!(item.content, "DeepSeek R1 发布，引发 AI 圈关注");
    }

    #[tokio::test]
    async fn keyword_search_finds_matching_entity() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).await.unwrap();
        let scope = Scope::for_user("u1");
        engine
            .add(NewItem {
                content: "DeepSeek R1 发布，引发 AI 圈关注".into(),
                scope: scope.clone(),
                tags: vec!["AI".into()],
                source: Some("bilibili".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let request = SearchRequest { query: "DeepSeek".into(), top_k: 5, ..Default::default() };
        let (results, _stats) = engine.search(&request, &scope).await.unwrap();
        assert!(!results.is_empty());
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn delete_then_get_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).await.unwrap();
        let scope = Scope::default();
        let result = engine.add(NewItem { content: "temporary".into(), scope: scope.clone(), ..Default::default() }).await.unwrap();

        assert!(engine.delete(&result.id, &scope).await.unwrap());
        assert!(engine.get(&result.id, &scope).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn clear_rejects_default_scope_without_confirm() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).await.unwrap();
        let err = engine.clear(&Scope::default(), false).await.unwrap_err();
        assert!(matches!(err, RecallError::ScopeDenied { .. }));
    }

    #[tokio::test]
    async fn tenant_isolation_blocks_cross_scope_reads() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).await.unwrap();
        let alice = Scope::for_user("alice");
        let bob = Scope::for_user("bob");

        engine.add(NewItem { content: "secret".into(), scope: alice.clone(), ..Default::default() }).await.unwrap();
        engine.add(NewItem { content: "public".into(), scope: bob.clone(), ..Default::default() }).await.unwrap();

        engine.clear(&alice, true).await.unwrap();

        let request = SearchRequest { query: "public".into(), top_k: 5, ..Default::default() };
        let (results, _) = engine.search(&request, &bob).await.unwrap();
        assert!(results.iter().any(|m| m.content == "public"));

        let request_alice = SearchRequest { query: "secret".into(), top_k: 5, ..Default::default() };
        let (results_alice, _) = engine.search(&request_alice, &alice).await.unwrap();
        assert!(results_alice.is_empty());
    }

    #[tokio::test]
    async fn ngram_fallback_finds_rare_token() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::open(test_config(dir.path())).await.unwrap();
        let scope = Scope::default();
        engine
            .add(NewItem {
                content: "这是一个独特的测试内容包含随机数字 7749382 和特殊词汇 龙凤呈祥".into(),
                scope: scope.clone(),
                ..Default::default()
            })
            .await
            .unwrap();

        let request = SearchRequest { query: "7749382".into(), top_k: 5, ..Default::default() };
        let (results, _) = engine.search(&request, &scope).await.unwrap();
        assert!(!results.is_empty());
    }
}
