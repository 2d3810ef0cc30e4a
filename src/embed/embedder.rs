use super::Embedder;
use crate::error::EmbedError;
use anyhow::{anyhow, Result};
use fastembed::{EmbeddingModel as FastEmbedModel, InitOptions, TextEmbedding};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// Available local embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelType {
    /// BGE Small EN v1.5 - 384 dimensions, good balance of speed/quality
    BGESmallENV15,
    /// All-MiniLM-L6-v2 - 384 dimensions, fast and efficient
    AllMiniLML6V2,
    /// BGE Base EN v1.5 - 768 dimensions, higher quality
    BGEBaseENV15,
    /// mxbai-embed-large-v1 - 1024 dimensions, best quality
    MxbaiEmbedLargeV1,
}

impl ModelType {
    /// Parse a short model name as used on the command line and in config files
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bge-small" | "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => Some(Self::BGESmallENV15),
            "minilm-l6" | "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => {
                Some(Self::AllMiniLML6V2)
            }
            "bge-base" | "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => Some(Self::BGEBaseENV15),
            "mxbai-large" | "mxbai-embed-large-v1" | "mixedbread-ai/mxbai-embed-large-v1" => {
                Some(Self::MxbaiEmbedLargeV1)
            }
            _ => None,
        }
    }

    pub fn to_fastembed_model(&self) -> FastEmbedModel {
        match self {
            Self::BGESmallENV15 => FastEmbedModel::BGESmallENV15,
            Self::AllMiniLML6V2 => FastEmbedModel::AllMiniLML6V2,
            Self::BGEBaseENV15 => FastEmbedModel::BGEBaseENV15,
            Self::MxbaiEmbedLargeV1 => FastEmbedModel::MxbaiEmbedLargeV1,
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Self::BGESmallENV15 => 384,
            Self::AllMiniLML6V2 => 384,
            Self::BGEBaseENV15 => 768,
            Self::MxbaiEmbedLargeV1 => 1024,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::BGESmallENV15 => "BAAI/bge-small-en-v1.5",
            Self::AllMiniLML6V2 => "sentence-transformers/all-MiniLM-L6-v2",
            Self::BGEBaseENV15 => "BAAI/bge-base-en-v1.5",
            Self::MxbaiEmbedLargeV1 => "mixedbread-ai/mxbai-embed-large-v1",
        }
    }
}

impl Default for ModelType {
    fn default() -> Self {
        // Use BGE Small as default - good balance
        Self::BGESmallENV15
    }
}

/// Local embedding model using the fastembed library
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    model_type: ModelType,
}

impl FastEmbedder {
    /// Load a model, downloading weights into `cache_dir` on first use
    pub fn with_model(model_type: ModelType, cache_dir: &Path) -> Result<Self> {
        info!(
            "Loading embedding model: {} ({} dims)",
            model_type.name(),
            model_type.dimensions()
        );

        std::fs::create_dir_all(cache_dir)?;
        let model = TextEmbedding::try_new(
            InitOptions::new(model_type.to_fastembed_model())
                .with_cache_dir(cache_dir.to_path_buf())
                .with_show_download_progress(false),
        )
        .map_err(|e| anyhow!("Failed to initialize embedding model: {}", e))?;

        info!("Model loaded: {}", model_type.name());

        Ok(Self {
            model: Mutex::new(model),
            model_type,
        })
    }
}

impl Embedder for FastEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let text_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();

        let mut model = self
            .model
            .lock()
            .map_err(|_| EmbedError::Model("embedding model lock poisoned".to_string()))?;

        model
            .embed(text_refs, None)
            .map_err(|e| EmbedError::Model(format!("Failed to generate embeddings: {}", e)))
    }

    fn dimensions(&self) -> usize {
        self.model_type.dimensions()
    }

    fn model_name(&self) -> &str {
        self.model_type.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::cosine_similarity;

    #[test]
    fn test_model_type_dimensions() {
        assert_eq!(ModelType::BGESmallENV15.dimensions(), 384);
        assert_eq!(ModelType::AllMiniLML6V2.dimensions(), 384);
        assert_eq!(ModelType::BGEBaseENV15.dimensions(), 768);
        assert_eq!(ModelType::MxbaiEmbedLargeV1.dimensions(), 1024);
    }

    #[test]
    fn test_model_type_from_name() {
        assert_eq!(ModelType::from_name("bge-small"), Some(ModelType::BGESmallENV15));
        assert_eq!(ModelType::from_name("MiniLM-L6"), Some(ModelType::AllMiniLML6V2));
        assert_eq!(
            ModelType::from_name("mixedbread-ai/mxbai-embed-large-v1"),
            Some(ModelType::MxbaiEmbedLargeV1)
        );
        assert_eq!(ModelType::from_name("gpt-5"), None);
    }

    #[test]
    fn test_default_model() {
        let model = ModelType::default();
        assert_eq!(model.dimensions(), 384);
        assert_eq!(model.name(), "BAAI/bge-small-en-v1.5");
    }

    #[test]
    #[ignore] // Requires downloading model
    fn test_semantic_similarity() {
        let dir = tempfile::tempdir().unwrap();
        let embedder = FastEmbedder::with_model(ModelType::default(), dir.path()).unwrap();

        let emb1 = embedder.embed_one("The quick brown fox jumps over the lazy dog").unwrap();
        let emb2 = embedder.embed_one("A fast auburn fox leaps over a sleepy canine").unwrap();
        let emb3 = embedder.embed_one("Python is a programming language").unwrap();

        assert_eq!(emb1.len(), 384);
        assert!(cosine_similarity(&emb1, &emb2) > cosine_similarity(&emb1, &emb3));
    }
}
