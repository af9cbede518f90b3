//! Tiered storage: `VolumeStore` (the append-only canonical log) and
//! `ScopeStore` (per-tenant working memory with a focus-entity cache).
mod scope;
mod volume;

pub use scope::{ScopeRecord, ScopeStore};
pub use volume::VolumeStore;
