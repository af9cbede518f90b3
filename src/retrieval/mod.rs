//! The 8-stage retrieval funnel plus the token-budgeted context builder
//! that packages its output for a caller's prompt.
mod context_builder;
mod retriever;

pub use context_builder::{BuiltContext, ContextBuilder, ConversationTurn};
pub use retriever::{RetrievalQuery, RetrievedMemory, Retriever, RetrieverConfig, StageStats};
