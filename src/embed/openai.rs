use super::Embedder;
use crate::config::EmbeddingConfig;
use crate::error::EmbedError;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Default remote model, 1536 dimensions
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-ada-002";

/// Vector width of the default remote model
pub const DEFAULT_OPENAI_DIMENSIONS: usize = 1536;

const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Remote embeddings through an OpenAI-compatible `/embeddings` endpoint.
///
/// Uses a synchronous HTTP agent so it can run on blocking worker threads
/// without touching the async runtime.
pub struct OpenAiEmbedder {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: String, model: String, dimensions: usize, api_base: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: format!("{}/embeddings", api_base.trim_end_matches('/')),
            api_key,
            model,
            dimensions,
        }
    }

    /// Build from configuration; the key is read from the environment
    /// variable named by `api_key_env`.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .map_err(|_| anyhow!("{} is not set; required by the openai embedding backend", config.api_key_env))?;

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let api_base = config.api_base.as_deref().unwrap_or(DEFAULT_API_BASE);

        Ok(Self::new(
            api_key,
            model,
            config.dimensions.unwrap_or(DEFAULT_OPENAI_DIMENSIONS),
            api_base,
            Duration::from_secs(config.timeout_secs),
        ))
    }
}

impl Embedder for OpenAiEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Requesting {} embeddings from {}", texts.len(), self.endpoint);

        let response = self
            .agent
            .post(&self.endpoint)
            .set("Authorization", &format!("Bearer {}", self.api_key))
            .send_json(EmbeddingRequest {
                model: &self.model,
                input: texts,
            });

        let response = match response {
            Ok(response) => response,
            Err(ureq::Error::Status(429, _)) => {
                warn!("Embedding endpoint rate limited the request");
                return Err(EmbedError::RateLimited);
            }
            Err(ureq::Error::Status(code, response)) if code >= 500 => {
                return Err(EmbedError::Unavailable(format!(
                    "HTTP {} {}",
                    code,
                    response.status_text()
                )));
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(EmbedError::Model(format!("HTTP {}: {}", code, body)));
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(EmbedError::Unavailable(transport.to_string()));
            }
        };

        let parsed: EmbeddingResponse = response
            .into_json()
            .map_err(|e| EmbedError::Model(format!("malformed embedding response: {}", e)))?;

        order_by_index(parsed.data, texts.len())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// The API may return items out of order; restore input order.
fn order_by_index(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>, EmbedError> {
    if data.len() != expected {
        return Err(EmbedError::Model(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}
