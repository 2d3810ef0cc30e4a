use super::Embedder;
use crate::error::EmbedError;
use sha2::{Digest, Sha256};

/// Deterministic feature-hashing embedder.
///
/// Every lowercased word token, plus the sub-words of camelCase and
/// snake_case identifiers, is hashed into one of `dimensions` buckets with a
/// sign bit, then the vector is L2-normalised. Needs no model; the same
/// text gives the same vector on every machine.
pub struct HashingEmbedder {
    dimensions: usize,
    name: String,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        // bucket 0 is reserved for texts without tokens
        let dimensions = dimensions.max(2);
        Self {
            dimensions,
            name: format!("hashing-{}", dimensions),
        }
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];

        for token in tokens(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(bytes);

            let bucket = 1 + (h % (self.dimensions as u64 - 1)) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            vector[0] = 1.0;
        } else {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.vectorize(t)).collect())
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.name
    }
}

/// Word tokens plus identifier sub-words, lowercased
fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();

    for word in text.split(|c: char| !c.is_alphanumeric() && c != '_') {
        if word.is_empty() {
            continue;
        }

        let parts = split_identifier(word);
        if parts.len() > 1 {
            out.extend(parts.iter().map(|p| p.to_lowercase()));
        }
        out.push(word.to_lowercase());
    }

    out
}

fn split_identifier(word: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    for piece in word.split('_').filter(|p| !p.is_empty()) {
        let mut start = 0;
        let mut prev_lower = false;
        for (i, c) in piece.char_indices() {
            if c.is_uppercase() && prev_lower {
                parts.push(&piece[start..i]);
                start = i;
            }
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
        parts.push(&piece[start..]);
    }
    parts
}
