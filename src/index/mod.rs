//! The write-path indexes: keyword, entity, noun-phrase, and metadata
//! lookups maintained alongside `VolumeStore`'s append-only log.
mod entity_index;
mod inverted;
mod metadata;
mod ngram;
mod wal;

pub use entity_index::EntityIndex;
pub use inverted::InvertedIndex;
pub use metadata::{MetadataIndex, MetadataQuery};
pub use ngram::NgramIndex;
