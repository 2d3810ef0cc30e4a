mod registry;
mod store;

pub use registry::{CollectionKey, CollectionStore, Manifest, StagedCollection};
pub use store::{
    ApplySummary, ChunkRecord, Collection, CollectionStats, RecordInsert, ScoredRecord, WriteOp,
};

// Re-export for advanced usage
pub use arroy;
pub use heed;
