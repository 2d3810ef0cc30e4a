use crate::config::Config;
use crate::embed::{BatchEmbedder, Embedder};
use crate::error::{Error, Result};
use crate::index::require_non_blank;
use crate::vectordb::{CollectionKey, CollectionStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Body of `POST /semantic-search`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub machine_id: String,
    pub project_name: String,
    pub query: String,
}

impl SearchRequest {
    pub fn key(&self) -> CollectionKey {
        CollectionKey::new(&self.machine_id, &self.project_name)
    }

    pub fn validate(&self) -> Result<()> {
        require_non_blank("machineId", &self.machine_id)?;
        require_non_blank("projectName", &self.project_name)
    }
}

/// Where a match starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    pub file_path: String,
    pub line_number: usize,
}

/// A match with its score and text
#[derive(Debug, Clone)]
pub struct SearchMatch {
    pub location: FileLocation,
    pub content: String,
    pub score: f32,
}

/// Answers semantic queries against existing collections
pub struct QueryService {
    store: Arc<CollectionStore>,
    embedder: BatchEmbedder,
    top_k: usize,
}

impl QueryService {
    pub fn new(store: Arc<CollectionStore>, embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        Self {
            store,
            embedder: BatchEmbedder::new(embedder, config.embedding.batch_size),
            top_k: config.search.top_k,
        }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// Locations of the closest chunks, best first. Empty when nothing matched.
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<FileLocation>> {
        Ok(self
            .search_matches(request, self.top_k)?
            .into_iter()
            .map(|m| m.location)
            .collect())
    }

    /// Like [`search`](Self::search), with scores and chunk text
    pub fn search_matches(&self, request: &SearchRequest, k: usize) -> Result<Vec<SearchMatch>> {
        request.validate()?;
        let key = request.key();

        // a missing collection is never created here
        let collection = self.store.open(&key).map_err(Error::from_query)?;

        let start = Instant::now();
        let query_embedding = self.embedder.embed_query(&request.query)?;
        let embed_duration = start.elapsed();

        let start = Instant::now();
        let hits = collection
            .query(&query_embedding, k)
            .map_err(Error::from_query)?;

        debug!(
            "[{}] {} hits (embed {:?}, search {:?})",
            key.name(),
            hits.len(),
            embed_duration,
            start.elapsed()
        );

        Ok(hits
            .into_iter()
            .map(|hit| SearchMatch {
                location: FileLocation {
                    file_path: hit.record.file_path,
                    line_number: hit.record.line_start,
                },
                content: hit.record.content,
                score: hit.score,
            })
            .collect())
    }
}
