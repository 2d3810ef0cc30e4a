//! Error types for semdex.
//!
//! Library code returns these typed errors; the binary and CLI glue use
//! `anyhow` on top of them.

use thiserror::Error;

/// Message returned when a search finds nothing.
pub const NO_MATCH_MESSAGE: &str = "No match found";

/// Message returned when searching a project that was never uploaded.
pub const NOT_UPLOADED_MESSAGE: &str =
    "This project hasn't been uploaded yet. Please upload the folder first.";

/// Message returned for any other search failure.
pub const UNEXPECTED_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Failures of the embedding capability.
#[derive(Debug, Error)]
pub enum EmbedError {
    /// The embedding backend could not be reached or answered with a server error.
    #[error("embedding service unavailable: {0}")]
    Unavailable(String),

    /// The embedding backend rejected the request because of rate limiting.
    #[error("embedding service rate limited the request")]
    RateLimited,

    /// The model failed to load or to produce embeddings.
    #[error("embedding model error: {0}")]
    Model(String),

    /// The backend returned vectors of an unexpected size.
    #[error("embedding has {actual} dimensions, expected {expected}")]
    Dimensions { expected: usize, actual: usize },
}

/// Failures of the collection store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The collection was never created (or has been deleted).
    #[error("Collection {0} does not exist")]
    NotFound(String),

    /// The collection was built with a different embedding model.
    #[error("collection {name} holds {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// LMDB error.
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),

    /// Vector index error.
    #[error("vector index error: {0}")]
    Arroy(#[from] arroy::Error),

    /// IO error on the collection directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unreadable collection manifest.
    #[error("invalid collection manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The item id space of a collection is exhausted.
    #[error("collection {0} ran out of item ids")]
    IdsExhausted(String),
}

/// Request-level error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Query or delete against a project index that does not exist.
    #[error("Collection {0} does not exist")]
    CollectionNotFound(String),

    /// The embedding capability failed.
    #[error(transparent)]
    Embedding(#[from] EmbedError),

    /// Persistence failed while writing.
    #[error("store write failed: {0}")]
    StoreWrite(#[source] StoreError),

    /// Persistence failed while answering a query.
    #[error("query failed: {0}")]
    QueryFailed(#[source] StoreError),

    /// Anything else.
    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

/// Result type alias using [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Classify a store error raised on a write path.
    pub fn from_write(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => Self::CollectionNotFound(name),
            other => Self::StoreWrite(other),
        }
    }

    /// Classify a store error raised on a query path.
    pub fn from_query(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(name) => Self::CollectionNotFound(name),
            other => Self::QueryFailed(other),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::CollectionNotFound(_))
    }

    /// The message shown to a search client. Only a missing collection gets
    /// a specific message; everything else asks for a retry.
    pub fn search_message(&self) -> &'static str {
        if self.is_not_found() {
            NOT_UPLOADED_MESSAGE
        } else {
            UNEXPECTED_MESSAGE
        }
    }
}
