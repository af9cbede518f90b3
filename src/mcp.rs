//! MCP-style tool registry: JSON-Schema argument definitions plus a single
//! dispatch entry point mapping tool name -> `Engine` call. This is not a
//! stdio/SSE transport loop — a host process wires `McpToolRegistry::call`
//! into whatever transport it already speaks.
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::engine::{Engine, SearchRequest};
use crate::error::{RecallError, RecallResult};
use crate::types::{MetaMap, NewItem, Scope};

/// Static description of one callable tool, the shape an MCP host's
/// `tools/list` response is built from.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// Binds the ten `recall_*` tools to an [`Engine`].
pub struct McpToolRegistry {
    engine: Engine,
}

fn scope_from_value(v: &Value) -> Scope {
    let mut scope = Scope::default();
    if let Some(s) = v.get("user_id").and_then(Value::as_str) {
        scope.user_id = s.to_string();
    }
    if let Some(s) = v.get("character_id").and_then(Value::as_str) {
        scope.character_id = s.to_string();
    }
    if let Some(s) = v.get("session_id").and_then(Value::as_str) {
        scope.session_id = s.to_string();
    }
    scope
}

fn string_field(args: &Value, field: &str) -> RecallResult<String> {
    args.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RecallError::Validation(format!("missing required field '{field}'")))
}

fn string_array_field(args: &Value, field: &str) -> Vec<String> {
    args.get(field)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

impl McpToolRegistry {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// The ten tools this registry exposes, with JSON-Schema argument
    /// definitions for an MCP host's `tools/list` response.
    pub fn definitions() -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "recall_add",
                description: "Store one memory item in a scope, extracting entities and relations.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "content": {"type": "string"},
                        "user_id": {"type": "string"},
                        "character_id": {"type": "string"},
                        "session_id": {"type": "string"},
                        "source": {"type": "string"},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "category": {"type": "string"}
                    },
                    "required": ["content"]
                }),
            },
            ToolDefinition {
                name: "recall_add_batch",
                description: "Store many memory items in one call.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "items": {"type": "array", "items": {"type": "object"}}
                    },
                    "required": ["items"]
                }),
            },
            ToolDefinition {
                name: "recall_search",
                description: "Run the retrieval funnel for a free-text query within a scope.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "user_id": {"type": "string"},
                        "character_id": {"type": "string"},
                        "session_id": {"type": "string"},
                        "top_k": {"type": "integer"}
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "recall_search_filtered",
                description: "Run retrieval with metadata filters (source, tags, category, content_type, event time range).",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "user_id": {"type": "string"},
                        "source": {"type": "string"},
                        "tags": {"type": "array", "items": {"type": "string"}},
                        "category": {"type": "string"},
                        "content_type": {"type": "string"},
                        "event_time_start": {"type": "string"},
                        "event_time_end": {"type": "string"},
                        "top_k": {"type": "integer"}
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "recall_context",
                description: "Retrieve and pack memories plus recent turns into a token-budgeted prompt block.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {"type": "string"},
                        "user_id": {"type": "string"},
                        "max_tokens": {"type": "number"},
                        "include_recent": {"type": "integer"},
                        "system_prompt": {"type": "string"}
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: "recall_list",
                description: "List items in a scope.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "user_id": {"type": "string"},
                        "limit": {"type": "integer"}
                    }
                }),
            },
            ToolDefinition {
                name: "recall_delete",
                description: "Delete one item by id, or clear an entire scope when no id is given.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "id": {"type": "string"},
                        "user_id": {"type": "string"},
                        "confirm": {"type": "boolean"}
                    }
                }),
            },
            ToolDefinition {
                name: "recall_stats",
                description: "Report engine-wide counters: item count, entity count, relation count, budget usage.",
                input_schema: json!({"type": "object", "properties": {}}),
            },
            ToolDefinition {
                name: "recall_entities",
                description: "List known entities, or fetch one by name.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "limit": {"type": "integer"}
                    }
                }),
            },
            ToolDefinition {
                name: "recall_graph_traverse",
                description: "Walk the knowledge graph outward from an entity up to a depth, optionally filtered by relation type.",
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "entity_id": {"type": "string"},
                        "depth": {"type": "integer"},
                        "relation_types": {"type": "array", "items": {"type": "string"}}
                    },
                    "required": ["entity_id"]
                }),
            },
        ]
    }

    /// Dispatch a tool call by name with its JSON arguments, returning the
    /// tool's JSON result.
    pub async fn call(&self, tool_name: &str, args: Value) -> RecallResult<Value> {
        match tool_name {
            "recall_add" => self.recall_add(args).await,
            "recall_add_batch" => self.recall_add_batch(args).await,
            "recall_search" => self.recall_search(args).await,
            "recall_search_filtered" => self.recall_search_filtered(args).await,
            "recall_context" => self.recall_context(args).await,
            "recall_list" => self.recall_list(args).await,
            "recall_delete" => self.recall_delete(args).await,
            "recall_stats" => self.recall_stats().await,
            "recall_entities" => self.recall_entities(args).await,
            "recall_graph_traverse" => self.recall_graph_traverse(args).await,
            other => Err(RecallError::Validation(format!("unknown tool '{other}'"))),
        }
    }

    async fn recall_add(&self, args: Value) -> RecallResult<Value> {
        let content = string_field(&args, "content")?;
        let scope = scope_from_value(&args);
        let new_item = NewItem {
            content,
            scope,
            source: args.get("source").and_then(Value::as_str).map(str::to_string),
            tags: string_array_field(&args, "tags"),
            category: args.get("category").and_then(Value::as_str).map(str::to_string),
            content_type: args.get("content_type").and_then(Value::as_str).map(str::to_string),
            event_time: args.get("event_time").and_then(Value::as_str).map(str::to_string),
            metadata: MetaMap::new(),
        };
        let result = self.engine.add(new_item).await?;
        Ok(json!({"id": result.id, "success": result.success, "entities": result.entities}))
    }

    async fn recall_add_batch(&self, args: Value) -> RecallResult<Value> {
        let items_value = args
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| RecallError::Validation("missing required field 'items'".into()))?;
        let mut items = Vec::with_capacity(items_value.len());
        for item in items_value {
            let content = string_field(item, "content")?;
            items.push(NewItem {
                content,
                scope: scope_from_value(item),
                source: item.get("source").and_then(Value::as_str).map(str::to_string),
                tags: string_array_field(item, "tags"),
                category: item.get("category").and_then(Value::as_str).map(str::to_string),
                content_type: item.get("content_type").and_then(Value::as_str).map(str::to_string),
                event_time: item.get("event_time").and_then(Value::as_str).map(str::to_string),
                metadata: MetaMap::new(),
            });
        }
        let results = self.engine.add_batch(items).await?;
        Ok(json!(results
            .into_iter()
            .map(|r| json!({"id": r.id, "success": r.success, "entities": r.entities}))
            .collect::<Vec<_>>()))
    }

    async fn recall_search(&self, args: Value) -> RecallResult<Value> {
        let query = string_field(&args, "query")?;
        let scope = scope_from_value(&args);
        let top_k = args.get("top_k").and_then(Value::as_u64).unwrap_or(10) as usize;
        let request = SearchRequest { query, top_k, ..Default::default() };
        let (results, _stats) = self.engine.search(&request, &scope).await?;
        Ok(json!(results))
    }

    async fn recall_search_filtered(&self, args: Value) -> RecallResult<Value> {
        let query = string_field(&args, "query")?;
        let scope = scope_from_value(&args);
        let top_k = args.get("top_k").and_then(Value::as_u64).unwrap_or(10) as usize;
        let request = SearchRequest {
            query,
            top_k,
            source: args.get("source").and_then(Value::as_str).map(str::to_string),
            tags: string_array_field(&args, "tags"),
            category: args.get("category").and_then(Value::as_str).map(str::to_string),
            content_type: args.get("content_type").and_then(Value::as_str).map(str::to_string),
            event_time_start: args.get("event_time_start").and_then(Value::as_str).map(str::to_string),
            event_time_end: args.get("event_time_end").and_then(Value::as_str).map(str::to_string),
        };
        let (results, _stats) = self.engine.search(&request, &scope).await?;
        Ok(json!(results))
    }

    async fn recall_context(&self, args: Value) -> RecallResult<Value> {
        let query = string_field(&args, "query")?;
        let scope = scope_from_value(&args);
        let max_tokens = args.get("max_tokens").and_then(Value::as_f64).unwrap_or(2000.0);
        let include_recent = args.get("include_recent").and_then(Value::as_u64).unwrap_or(0) as usize;
        let system_prompt = args.get("system_prompt").and_then(Value::as_str);
        let request = SearchRequest { query, top_k: 20, ..Default::default() };
        let context = self
            .engine
            .build_context(&request, &scope, max_tokens, include_recent, system_prompt)
            .await?;
        Ok(json!(context))
    }

    async fn recall_list(&self, args: Value) -> RecallResult<Value> {
        let scope = scope_from_value(&args);
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(100) as usize;
        let items = self.engine.get_all(&scope, limit).await?;
        Ok(json!(items))
    }

    async fn recall_delete(&self, args: Value) -> RecallResult<Value> {
        let scope = scope_from_value(&args);
        match args.get("id").and_then(Value::as_str) {
            Some(id) => {
                let deleted = self.engine.delete(id, &scope).await?;
                Ok(json!({"deleted": deleted}))
            }
            None => {
                let confirm = args.get("confirm").and_then(Value::as_bool).unwrap_or(false);
                self.engine.clear(&scope, confirm).await?;
                Ok(json!({"cleared": true}))
            }
        }
    }

    async fn recall_stats(&self) -> RecallResult<Value> {
        let stats = self.engine.stats();
        Ok(json!({
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

    async fn recall_entities(&self, args: Value) -> RecallResult<Value> {
        if let Some(name) = args.get("name").and_then(Value::as_str) {
            return Ok(match self.engine.entity_by_name(name) {
                Some(entity) => json!(entity),
                None => Value::Null,
            });
        }
        let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(50) as usize;
        Ok(json!(self.engine.top_entities(limit)))
    }

    async fn recall_graph_traverse(&self, args: Value) -> RecallResult<Value> {
        let entity_id = string_field(&args, "entity_id")?;
        let depth = args.get("depth").and_then(Value::as_u64).unwrap_or(2) as usize;
        let relation_types = args
            .get("relation_types")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>());
        let relations = self.engine.graph_traverse(&entity_id, depth, relation_types.as_deref());
        Ok(json!(relations))
    }
}

#[derive(Debug, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn test_registry() -> (tempfile::TempDir, McpToolRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = Config::default();
        cfg.data_root = dir.path().to_path_buf();
        let engine = Engine::open(cfg).await.unwrap();
        (dir, McpToolRegistry::new(engine))
    }

    #[tokio::test]
    async fn definitions_cover_all_ten_tools() {
        let defs = McpToolRegistry::definitions();
        assert_eq!(defs.len(), 10);
        assert!(defs.iter().any(|d| d.name == "recall_add"));
        assert!(defs.iter().any(|d| d.name == "recall_graph_traverse"));
    }

    #[tokio::test]
    async fn recall_add_then_recall_search_round_trips() {
        let (_dir, registry) = test_registry().await;
        let add_result = registry
            .call("recall_add", json!({"content": "DeepSeek shipped a new model", "user_id": "alice"}))
            .await
            .unwrap();
        assert_eq!(add_result["success"], json!(true));

        let search_result = registry
            .call("recall_search", json!({"query": "DeepSeek", "user_id": "alice"}))
            .await
            .unwrap();
        assert!(search_result.as_array().unwrap().len() >= 1);
    }

    #[tokio::test]
    async fn recall_delete_without_id_clears_scope_when_confirmed() {
        let (_dir, registry) = test_registry().await;
        registry.call("recall_add", json!({"content": "temp", "user_id": "bob"})).await.unwrap();
        let result = registry.call("recall_delete", json!({"user_id": "bob", "confirm": true})).await.unwrap();
        assert_eq!(result["cleared"], json!(true));
    }

    #[tokio::test]
    async fn unknown_tool_name_errors() {
        let (_dir, registry) = test_registry().await;
        let err = registry.call("not_a_tool", json!({})).await.unwrap_err();
        assert!(matches!(err, RecallError::Validation(_)));
    }
}
