use super::Embedder;
use crate::chunker::Chunk;
use crate::error::EmbedError;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Upper bound on chunks per embedding call
pub const MAX_BATCH_SIZE: usize = 100;

/// Chunk with its embedding
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

impl EmbeddedChunk {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }
}

/// Embeds chunks in bounded batches
#[derive(Clone)]
pub struct BatchEmbedder {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl BatchEmbedder {
    /// Create with custom batch size, clamped to `1..=MAX_BATCH_SIZE`
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
        }
    }

    /// Embed chunks, preserving their order
    pub fn embed_chunks(&self, chunks: Vec<Chunk>) -> Result<Vec<EmbeddedChunk>, EmbedError> {
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let total = chunks.len();
        let batches = total.div_ceil(self.batch_size);
        let start = Instant::now();
        let mut embedded = Vec::with_capacity(total);

        for (batch_idx, batch) in chunks.chunks(self.batch_size).enumerate() {
            debug!(
                "Embedding batch {}/{} ({} chunks)",
                batch_idx + 1,
                batches,
                batch.len()
            );

            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed(&texts)?;
            self.check(batch.len(), &vectors)?;

            embedded.extend(
                batch
                    .iter()
                    .cloned()
                    .zip(vectors)
                    .map(|(chunk, vector)| EmbeddedChunk::new(chunk, vector)),
            );
        }

        debug!(
            "Embedded {} chunks in {:.2}s",
            total,
            start.elapsed().as_secs_f32()
        );

        Ok(embedded)
    }

    /// Embed query text
    pub fn embed_query(&self, query: &str) -> Result<Vec<f32>, EmbedError> {
        let vector = self.embedder.embed_one(query)?;
        self.check(1, std::slice::from_ref(&vector))?;
        Ok(vector)
    }

    fn check(&self, expected: usize, vectors: &[Vec<f32>]) -> Result<(), EmbedError> {
        if vectors.len() != expected {
            return Err(EmbedError::Model(format!(
                "expected {} embeddings, got {}",
                expected,
                vectors.len()
            )));
        }

        let dimensions = self.embedder.dimensions();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dimensions) {
            return Err(EmbedError::Dimensions {
                expected: dimensions,
                actual: bad.len(),
            });
        }
        Ok(())
    }
}

/// Calculate cosine similarity between two vectors
#[cfg(test)]
pub(crate) fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
