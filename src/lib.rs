//! # recall — persistent memory and retrieval for conversational agents
//!
//! `recall` gives a conversational agent durable, queryable memory across
//! turns and sessions:
//!
//! - **Tiered storage** — an append-only `VolumeStore` log backs every item
//!   with a 100%-recall substring fallback; a per-tenant `ScopeStore` holds
//!   the editable "working memory" view.
//! - **Multi-index retrieval** — keyword, entity, noun-phrase, metadata, and
//!   vector indexes feed an 8-stage funnel that narrows a broad candidate
//!   pool down to a reranked top-k.
//! - **Entity and relation extraction** — RULES (free), LLM (full quality),
//!   or ADAPTIVE (RULES always, LLM only above a complexity threshold and
//!   within budget).
//! - **A knowledge graph** of typed, evidenced relations between entities.
//! - **Token-budgeted context assembly** for packing retrieved memories and
//!   recent turns into a prompt.
//!
//! ## Quick start
//!
//! ```ignore
//! use recall::{Config, Engine};
//! use recall::types::{NewItem, Scope};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::open(Config::from_env()).await?;
//!
//!     let scope = Scope::for_user("alice");
//!     engine.add(NewItem { content: "DeepSeek R1 shipped today".into(), scope: scope.clone(), ..Default::default() }).await?;
//!
//!     let (results, _stats) = engine
//!         .search(&recall::engine::SearchRequest { query: "DeepSeek".into(), top_k: 5, ..Default::default() }, &scope)
//!         .await?;
//!     println!("{:?}", results);
//!     Ok(())
//! }
//! ```
//!
//! ## Thread safety
//!
//! `Engine` is cheap to `Clone` (every field is an `Arc`) and safe to share
//! across tasks. Coordination happens per-scope rather than through one
//! engine-wide lock — concurrent writers to different scopes never block
//! each other.

pub mod budget;
pub mod config;
pub mod engine;
pub mod entity;
pub mod episode;
pub mod error;
pub mod extraction;
pub mod foreshadowing;
pub mod graph;
pub mod index;
pub mod maintainer;
pub mod mcp;
pub mod relation;
pub mod retrieval;
pub mod storage;
pub mod types;
pub mod vector;

#[cfg(feature = "http")]
pub mod http;

pub use config::Config;
pub use engine::{AddResult, ConsolidationSummary, Engine, EngineStats, SearchRequest};
pub use error::{RecallError, RecallResult};
pub use maintainer::{HealthReport, Maintainer, MaintainerConfig};
pub use types::{Item, MetaMap, MetaValue, NewItem, Scope};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use recall::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::engine::{AddResult, Engine, EngineStats, SearchRequest};
    pub use crate::error::{RecallError, RecallResult};
    pub use crate::retrieval::{BuiltContext, ConversationTurn, RetrievedMemory};
    pub use crate::types::{Item, MetaMap, MetaValue, NewItem, Scope};
}

// ============================================================================
// Logging and observability
// ============================================================================

/// Initialize the logging system.
///
/// Call once at application startup; configures a `tracing_subscriber` with
/// an environment filter.
///
/// The log level can be controlled via the `RECALL_LOG` environment
/// variable:
/// - `RECALL_LOG=error` — only errors
/// - `RECALL_LOG=warn` — errors and warnings
/// - `RECALL_LOG=info` — general information (default)
/// - `RECALL_LOG=debug` — debug information
/// - `RECALL_LOG=trace` — verbose tracing
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env("RECALL_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

/// Initialize logging with an explicit level, overriding `RECALL_LOG`.
pub fn init_logging_with_level(level: &str) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(level);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
