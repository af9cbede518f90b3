//! Vector similarity search: normalized float vectors, the `AnnIndex`
//! contract (brute-force `FlatIndex` and `IvfHnswIndex`), and the abstract
//! `EmbeddingBackend` text-to-vector contract.
mod embedding;
mod index;
mod ivf_hnsw;
mod types;

pub use embedding::{EmbeddingBackend, NoneBackend, RemoteBackend, SlidingWindowLimiter, RETRY_BACKOFF_SECONDS};
pub use index::{AnnIndex, FlatIndex, ScoredId};
pub use ivf_hnsw::{IvfHnswConfig, IvfHnswIndex};
pub use types::Vector;
