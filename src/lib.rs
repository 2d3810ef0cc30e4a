pub mod chunker;
pub mod cli;
pub mod config;
pub mod embed;
pub mod error;
pub mod file;
pub mod index;
pub mod output;
pub mod search;
pub mod server;
pub mod vectordb;

// Re-export commonly used types
pub use chunker::{Chunk, LineWindowChunker};
pub use config::Config;
pub use embed::{BatchEmbedder, EmbeddedChunk, Embedder, HashingEmbedder, ModelType};
pub use error::{EmbedError, Error, Result, StoreError};
pub use file::{FileWalker, Snapshot, WalkStats};
pub use index::{FileUpload, Indexer, UploadOutcome, UploadRequest};
pub use search::{FileLocation, QueryService, SearchRequest};
pub use server::{build_router, AppState};
pub use vectordb::{CollectionKey, CollectionStore};
