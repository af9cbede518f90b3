//! HTTP API for the recall engine.
//!
//! A thin Axum surface over [`Engine`]: every handler deserializes a
//! request, calls straight through to an `Engine` method, and serializes
//! the result. No business logic lives here.
//!
//! # API Endpoints
//!
//! ## Memories
//! - `POST /v1/memories` - add one item
//! - `POST /v1/memories/batch` - add many items
//! - `GET /v1/memories?user_id=&limit=&offset=` - list items in a scope
//! - `GET /v1/memories/:id?user_id=` - fetch one item
//! - `PUT /v1/memories/:id?user_id=` - edit content/metadata
//! - `DELETE /v1/memories/:id?user_id=` - remove one item
//! - `DELETE /v1/memories?user_id=&confirm=` - wipe a scope
//! - `POST /v1/memories/search` - run the retrieval funnel
//!
//! ## Context
//! - `POST /v1/context` - build a token-budgeted context block
//!
//! ## Entities and graph
//! - `GET /v1/entities` / `GET /v1/entities/:name`
//! - `POST /v1/graph/traverse`
//!
//! ## Foreshadowing
//! - `POST /v1/foreshadowing`, `GET /v1/foreshadowing`, `POST /v1/foreshadowing/:id/resolve`
//!
//! ## Operational
//! - `GET /v1/stats`, `GET /health`
use crate::engine::{Engine, SearchRequest};
use crate::error::RecallError;
use crate::types::{MetaMap, NewItem, Scope};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// HTTP server wrapping an [`Engine`].
pub struct HttpServer {
    engine: Engine,
}

impl HttpServer {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Bind and serve until the process is signaled to stop.
    pub async fn bind(self, addr: &str) -> crate::error::RecallResult<()> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| RecallError::Validation(format!("invalid bind address: {e}")))?;
        let app = router(self.engine);

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| RecallError::Io(e.to_string()))?;
        tracing::info!(%addr, "http server listening");
        axum::serve(listener, app)
            .await
            .map_err(|e| RecallError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Build the full Axum router over `engine`. Exposed at crate-level so
/// integration tests can drive the HTTP surface with `tower::ServiceExt::
/// oneshot` without actually binding a socket.
pub fn router(engine: Engine) -> Router {
    let engine = Arc::new(engine);
    Router::new()
        .route("/v1/memories", post(handle_add).get(handle_list).delete(handle_clear))
        .route("/v1/memories/batch", post(handle_add_batch))
        .route("/v1/memories/search", post(handle_search))
        .route("/v1/memories/:id", get(handle_get).put(handle_update).delete(handle_delete))
        .route("/v1/context", post(handle_context))
        .route("/v1/entities", get(handle_list_entities))
        .route("/v1/entities/:name", get(handle_get_entity))
        .route("/v1/graph/traverse", post(handle_graph_traverse))
        .route("/v1/foreshadowing", post(handle_plant_foreshadowing).get(handle_list_foreshadowing))
        .route("/v1/foreshadowing/:id/resolve", post(handle_resolve_foreshadowing))
        .route("/v1/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .with_state(engine)
}

fn scope_from_params(params: &HashMap<String, String>) -> Scope {
    let mut scope = Scope::default();
    if let Some(v) = params.get("user_id") {
        scope.user_id = v.clone();
    }
    if let Some(v) = params.get("character_id") {
        scope.character_id = v.clone();
    }
    if let Some(v) = params.get("session_id") {
        scope.session_id = v.clone();
    }
    scope
}

fn map_err(e: RecallError) -> StatusCode {
    match e {
        RecallError::NotFound { .. } => StatusCode::NOT_FOUND,
        RecallError::ScopeDenied { .. } => StatusCode::FORBIDDEN,
        RecallError::Validation(_) => StatusCode::BAD_REQUEST,
        RecallError::BudgetExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        RecallError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Deserialize)]
struct AddItemRequest {
    content: String,
    #[serde(default)]
    scope: Option<ScopeDef>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    event_time: Option<String>,
    #[serde(default)]
    metadata: MetaMap,
}

#[derive(Debug, Deserialize, Default)]
struct ScopeDef {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    character_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

impl ScopeDef {
    fn into_scope(self) -> Scope {
        let mut scope = Scope::default();
        if let Some(v) = self.user_id {
            scope.user_id = v;
        }
        if let Some(v) = self.character_id {
            scope.character_id = v;
        }
        if let Some(v) = self.session_id {
            scope.session_id = v;
        }
        scope
    }
}

impl AddItemRequest {
    fn into_new_item(self) -> NewItem {
        NewItem {
            content: self.content,
            scope: self.scope.unwrap_or_default().into_scope(),
            source: self.source,
            tags: self.tags,
            category: self.category,
            content_type: self.content_type,
            event_time: self.event_time,
            metadata: self.metadata,
        }
    }
}

#[derive(Debug, Serialize)]
struct AddResponse {
    id: String,
    success: bool,
    entities: Vec<String>,
}

async fn handle_add(
    State(engine): State<Arc<Engine>>,
    Json(request): Json<AddItemRequest>,
) -> Result<Json<AddResponse>, StatusCode> {
    let result = engine.add(request.into_new_item()).await.map_err(map_err)?;
    Ok(Json(AddResponse {
        id: result.id,
        success: result.success,
        entities: result.entities,
    }))
}

async fn handle_add_batch(
    State(engine): State<Arc<Engine>>,
    Json(requests): Json<Vec<AddItemRequest>>,
) -> Result<Json<Vec<AddResponse>>, StatusCode> {
    let items = requests.into_iter().map(AddItemRequest::into_new_item).collect();
    let results = engine.add_batch(items).await.map_err(map_err)?;
    Ok(Json(
        results
            .into_iter()
            .map(|r| AddResponse { id: r.id, success: r.success, entities: r.entities })
            .collect(),
    ))
}

async fn handle_list(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<crate::types::Item>>, StatusCode> {
    let scope = scope_from_params(&params);
    let limit = params.get("limit").and_then(|v| v.parse().ok()).unwrap_or(100);
    let items = engine.get_all(&scope, limit).await.map_err(map_err)?;
    Ok(Json(items))
}

async fn handle_get(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<crate::types::Item>, StatusCode> {
    let scope = scope_from_params(&params);
    match engine.get(&id, &scope).await.map_err(map_err)? {
        Some(item) => Ok(Json(item)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Deserialize)]
struct UpdateItemRequest {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    metadata: Option<MetaMap>,
}

async fn handle_update(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    Json(request): Json<UpdateItemRequest>,
) -> Result<StatusCode, StatusCode> {
    let scope = scope_from_params(&params);
    let updated = engine
        .update(&id, &scope, request.content, request.metadata)
        .await
        .map_err(map_err)?;
    if updated {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn handle_delete(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, StatusCode> {
    let scope = scope_from_params(&params);
    if engine.delete(&id, &scope).await.map_err(map_err)? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn handle_clear(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<StatusCode, StatusCode> {
    let scope = scope_from_params(&params);
    let confirm = params.get("confirm").map(|v| v == "true").unwrap_or(false);
    engine.clear(&scope, confirm).await.map_err(map_err)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
struct SearchRequestBody {
    query: String,
    #[serde(default)]
    scope: Option<ScopeDef>,
    #[serde(default = "default_top_k")]
    top_k: usize,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    event_time_start: Option<String>,
    #[serde(default)]
    event_time_end: Option<String>,
}

fn default_top_k() -> usize {
    10
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<crate::retrieval::RetrievedMemory>,
    stats: Vec<crate::retrieval::StageStats>,
}

async fn handle_search(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<SearchRequestBody>,
) -> Result<Json<SearchResponse>, StatusCode> {
    let scope = body.scope.unwrap_or_default().into_scope();
    let request = SearchRequest {
        query: body.query,
        top_k: body.top_k,
        source: body.source,
        tags: body.tags,
        category: body.category,
        content_type: body.content_type,
        event_time_start: body.event_time_start,
        event_time_end: body.event_time_end,
    };
    let (results, stats) = engine.search(&request, &scope).await.map_err(map_err)?;
    Ok(Json(SearchResponse { results, stats }))
}

#[derive(Debug, Deserialize)]
struct ContextRequestBody {
    query: String,
    #[serde(default)]
    scope: Option<ScopeDef>,
    #[serde(default = "default_max_tokens")]
    max_tokens: f64,
    #[serde(default)]
    include_recent: usize,
    #[serde(default)]
    system_prompt: Option<String>,
}

fn default_max_tokens() -> f64 {
    2000.0
}

async fn handle_context(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<ContextRequestBody>,
) -> Result<Json<crate::retrieval::BuiltContext>, StatusCode> {
    let scope = body.scope.unwrap_or_default().into_scope();
    let request = SearchRequest { query: body.query, top_k: 20, ..Default::default() };
    let context = engine
        .build_context(&request, &scope, body.max_tokens, body.include_recent, body.system_prompt.as_deref())
        .await
        .map_err(map_err)?;
    Ok(Json(context))
}

async fn handle_list_entities(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Vec<crate::entity::Entity>> {
    let n = params.get("limit").and_then(|v| v.parse().ok()).unwrap_or(50);
    Json(engine.top_entities(n))
}

async fn handle_get_entity(
    State(engine): State<Arc<Engine>>,
    Path(name): Path<String>,
) -> Result<Json<crate::entity::Entity>, StatusCode> {
    match engine.entity_by_name(&name) {
        Some(entity) => Ok(Json(entity)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

#[derive(Debug, Deserialize)]
struct GraphTraverseRequest {
    entity_id: String,
    #[serde(default = "default_depth")]
    depth: usize,
    #[serde(default)]
    relation_types: Option<Vec<String>>,
}

fn default_depth() -> usize {
    2
}

async fn handle_graph_traverse(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<GraphTraverseRequest>,
) -> Json<Vec<crate::relation::Relation>> {
    let relations = engine.graph_traverse(&body.entity_id, body.depth, body.relation_types.as_deref());
    Json(relations)
}

#[derive(Debug, Deserialize)]
struct PlantForeshadowingRequest {
    content: String,
}

async fn handle_plant_foreshadowing(
    State(engine): State<Arc<Engine>>,
    Json(body): Json<PlantForeshadowingRequest>,
) -> Json<crate::foreshadowing::Foreshadowing> {
    Json(engine.plant_foreshadowing(body.content))
}

async fn handle_list_foreshadowing(
    State(engine): State<Arc<Engine>>,
) -> Json<Vec<crate::foreshadowing::Foreshadowing>> {
    Json(engine.list_foreshadowing())
}

#[derive(Debug, Deserialize)]
struct ResolveForeshadowingRequest {
    resolution_content: String,
}

async fn handle_resolve_foreshadowing(
    State(engine): State<Arc<Engine>>,
    Path(id): Path<String>,
    Json(body): Json<ResolveForeshadowingRequest>,
) -> Result<StatusCode, StatusCode> {
    if engine.resolve_foreshadowing(&id, body.resolution_content) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn handle_stats(State(engine): State<Arc<Engine>>) -> Json<serde_json::Value> {
    let stats = engine.stats();
    Json(serde_json::json!({
        "total_turns": stats.total_turns,
        "scopes_open": stats.scopes_open,
        "entities": stats.entities,
        "relations": stats.relations,
        "episodes": stats.episodes,
        "foreshadowing": stats.foreshadowing,
        "inverted_keywords": stats.inverted_keywords,
        "vector_count": stats.vector_count,
        "budget_daily_usage_pct": stats.budget_daily_usage_pct,
        "budget_hourly_usage_pct": stats.budget_hourly_usage_pct,
        "budget_suggestion": stats.budget_suggestion,
    }))
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    // HTTP wiring is exercised end-to-end in tests/http_api.rs rather than
    // unit-tested here.
}
