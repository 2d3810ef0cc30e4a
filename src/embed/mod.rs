mod batch;
mod cache;
mod embedder;
mod hashing;
mod openai;

#[cfg(test)]
pub(crate) use batch::cosine_similarity;
pub use batch::{BatchEmbedder, EmbeddedChunk, MAX_BATCH_SIZE};
pub use cache::{CacheStats, CachedEmbedder};
pub use embedder::{FastEmbedder, ModelType};
pub use hashing::HashingEmbedder;
pub use openai::OpenAiEmbedder;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::EmbedError;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Vector width of the hashing backend when none is configured
pub const DEFAULT_HASHING_DIMENSIONS: usize = 384;

/// Text-to-vector capability.
///
/// Implementations are blocking; async callers run them on
/// `tokio::task::spawn_blocking`.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text
    fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        self.embed(&[text.to_string()])?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Model("no embedding generated".to_string()))
    }

    /// Dimensionality of the produced vectors
    fn dimensions(&self) -> usize;

    /// Model identifier recorded in collection manifests
    fn model_name(&self) -> &str;

    /// Hit counters when this embedder memoises vectors
    fn cache_stats(&self) -> Option<CacheStats> {
        None
    }
}

/// Build the configured embedding backend, wrapped in a cache when enabled.
///
/// Loading a local model may download weights; call this off the async
/// runtime.
pub fn from_config(config: &EmbeddingConfig, data_dir: &Path) -> Result<Arc<dyn Embedder>> {
    let backend: Arc<dyn Embedder> = match config.backend {
        EmbeddingBackend::FastEmbed => {
            let model_type = match config.model.as_deref() {
                Some(name) => ModelType::from_name(name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown model: '{}'", name))?,
                None => ModelType::default(),
            };
            Arc::new(FastEmbedder::with_model(model_type, &data_dir.join("models"))?)
        }
        EmbeddingBackend::OpenAi => Arc::new(OpenAiEmbedder::from_config(config)?),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(
            config.dimensions.unwrap_or(DEFAULT_HASHING_DIMENSIONS),
        )),
    };

    info!(
        "Embedding backend ready: {} ({} dims)",
        backend.model_name(),
        backend.dimensions()
    );

    if config.cache_size_mb == 0 {
        return Ok(backend);
    }
    Ok(Arc::new(CachedEmbedder::new(backend, config.cache_size_mb)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_hashing_with_cache() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::Hashing,
            dimensions: Some(64),
            cache_size_mb: 1,
            ..EmbeddingConfig::default()
        };
        let embedder = from_config(&config, Path::new(".")).unwrap();
        assert_eq!(embedder.dimensions(), 64);
        assert_eq!(embedder.model_name(), "hashing-64");

        let v = embedder.embed_one("fn main() {}").unwrap();
        assert_eq!(v.len(), 64);
    }

    #[test]
    fn test_from_config_rejects_unknown_model() {
        let config = EmbeddingConfig {
            backend: EmbeddingBackend::FastEmbed,
            model: Some("not-a-model".to_string()),
            ..EmbeddingConfig::default()
        };
        let err = from_config(&config, Path::new(".")).err().unwrap();
        assert!(err.to_string().contains("Unknown model"));
    }
}
