use crate::chunker::{DEFAULT_CHUNK_CHARS, DEFAULT_CHUNK_OVERLAP, DEFAULT_WINDOW_LINES};
use crate::embed::MAX_BATCH_SIZE;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the config file looked up inside the data directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Global configuration for semdex
///
/// Every field has a default, so a config file only needs the values it
/// changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for collections, model weights and snapshots
    pub data_dir: PathBuf,

    pub server: ServerConfig,

    /// Embedding model configuration
    pub embedding: EmbeddingConfig,

    /// Vector database configuration
    pub vectordb: VectorDbConfig,

    /// Indexing configuration
    pub indexing: IndexingConfig,

    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body limit for uploads
    pub max_body_mb: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local ONNX model
    FastEmbed,
    /// OpenAI-compatible HTTP endpoint
    OpenAi,
    /// Deterministic feature hashing, no model
    Hashing,
}

impl EmbeddingBackend {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "fastembed" | "local" => Some(Self::FastEmbed),
            "openai" => Some(Self::OpenAi),
            "hashing" | "hash" => Some(Self::Hashing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,

    /// Model name; backend default when unset (e.g., "bge-small")
    pub model: Option<String>,

    /// Chunks per embedding call
    pub batch_size: usize,

    /// Cache size in MB, 0 disables the cache
    pub cache_size_mb: usize,

    /// Vector width for the hashing and openai backends
    pub dimensions: Option<usize>,

    /// Base URL of the OpenAI-compatible API
    pub api_base: Option<String>,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// HTTP timeout for remote embedding calls
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    /// LMDB map size per collection generation
    pub map_size_mb: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    /// Lines per window
    pub window_lines: usize,

    /// Maximum chunk size in characters
    pub chunk_chars: usize,

    /// Overlap between chunks in characters
    pub chunk_overlap: usize,

    /// Skip files larger than this when walking a folder
    pub max_file_size_kb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub top_k: usize,
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `<data_dir>/config.toml` is
    /// read when present, otherwise defaults are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let default_path = Self::default().data_dir.join(CONFIG_FILE_NAME);
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        Ok(config.normalized())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        Ok(config.normalized())
    }

    /// Clamp values into their usable ranges
    pub fn normalized(mut self) -> Self {
        self.embedding.batch_size = self.embedding.batch_size.clamp(1, MAX_BATCH_SIZE);
        self.indexing.window_lines = self.indexing.window_lines.max(1);
        self.indexing.chunk_chars = self.indexing.chunk_chars.max(1);
        if self.indexing.chunk_overlap >= self.indexing.chunk_chars {
            self.indexing.chunk_overlap = self.indexing.chunk_chars - 1;
        }
        self.search.top_k = self.search.top_k.max(1);
        self
    }

    /// Get the data directory, creating it if necessary
    pub fn data_dir(&self) -> Result<PathBuf> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir).with_context(|| {
                format!("Failed to create data directory {}", self.data_dir.display())
            })?;
        }
        Ok(self.data_dir.clone())
    }

    pub fn collections_dir(&self) -> PathBuf {
        self.data_dir.join("collections")
    }

    pub fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".semdex"))
        .unwrap_or_else(|| PathBuf::from(".semdex"))
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            embedding: EmbeddingConfig::default(),
            vectordb: VectorDbConfig::default(),
            indexing: IndexingConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            max_body_mb: 64,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::FastEmbed,
            model: None,
            batch_size: MAX_BATCH_SIZE,
            cache_size_mb: 256,
            dimensions: None,
            api_base: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 60,
        }
    }
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self { map_size_mb: 2048 }
    }
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            window_lines: DEFAULT_WINDOW_LINES,
            chunk_chars: DEFAULT_CHUNK_CHARS,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_file_size_kb: 1024,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self { top_k: 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.search.top_k, 3);
        assert_eq!(config.indexing.window_lines, 20);
        assert_eq!(config.indexing.chunk_chars, 500);
        assert_eq!(config.indexing.chunk_overlap, 150);
        assert_eq!(config.embedding.batch_size, 100);
        assert_eq!(config.embedding.backend, EmbeddingBackend::FastEmbed);
        assert!(config.data_dir.ends_with(".semdex"));
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            data_dir = "/tmp/semdex-test"

            [server]
            port = 9100

            [embedding]
            backend = "hashing"
            dimensions = 64
            batch_size = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/semdex-test"));
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.embedding.backend, EmbeddingBackend::Hashing);
        assert_eq!(config.embedding.dimensions, Some(64));
        assert_eq!(config.embedding.batch_size, MAX_BATCH_SIZE);
        assert_eq!(config.search.top_k, 3);
    }

    #[test]
    fn test_overlap_clamped_below_chunk_size() {
        let config = Config::from_toml("[indexing]\nchunk_chars = 100\nchunk_overlap = 300\n").unwrap();
        assert_eq!(config.indexing.chunk_overlap, 99);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Config::from_toml("[embedding]\nbackend = \"word2vec\"\n").is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("semdex.toml");
        std::fs::write(&path, "[search]\ntop_k = 5\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.search.top_k, 5);

        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_backend_names() {
        assert_eq!(EmbeddingBackend::from_name("OpenAI"), Some(EmbeddingBackend::OpenAi));
        assert_eq!(EmbeddingBackend::from_name("local"), Some(EmbeddingBackend::FastEmbed));
        assert_eq!(EmbeddingBackend::from_name("hashing"), Some(EmbeddingBackend::Hashing));
        assert_eq!(EmbeddingBackend::from_name("bert"), None);
    }
}
