use super::Embedder;
use crate::error::EmbedError;
use moka::sync::Cache;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Embedder wrapper that memoises vectors by text content.
///
/// Re-uploading an unchanged project re-embeds identical chunk texts; those
/// hits skip the backend entirely. Capacity is a byte budget weighed by
/// vector size.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    cache: Cache<String, Arc<Vec<f32>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    max_memory_mb: usize,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, max_memory_mb: usize) -> Self {
        let cache = Cache::builder()
            .max_capacity((max_memory_mb * 1024 * 1024) as u64)
            .weigher(|key: &String, value: &Arc<Vec<f32>>| {
                (key.len() + value.len() * std::mem::size_of::<f32>()) as u32
            })
            .build();

        Self {
            inner,
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            max_memory_mb,
        }
    }

    fn key(text: &str) -> String {
        format!("{:x}", Sha256::digest(text.as_bytes()))
    }

}

impl Embedder for CachedEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let keys: Vec<String> = texts.iter().map(|t| Self::key(t)).collect();
        let mut out: Vec<Option<Vec<f32>>> = keys
            .iter()
            .map(|k| self.cache.get(k).map(|v| v.as_ref().clone()))
            .collect();

        let missing: Vec<usize> = (0..texts.len()).filter(|&i| out[i].is_none()).collect();
        self.hits
            .fetch_add((texts.len() - missing.len()) as u64, Ordering::Relaxed);
        self.misses.fetch_add(missing.len() as u64, Ordering::Relaxed);

        if !missing.is_empty() {
            let pending: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let computed = self.inner.embed(&pending)?;
            if computed.len() != pending.len() {
                return Err(EmbedError::Model(format!(
                    "expected {} embeddings, got {}",
                    pending.len(),
                    computed.len()
                )));
            }

            for (i, vector) in missing.into_iter().zip(computed) {
                self.cache.insert(keys[i].clone(), Arc::new(vector.clone()));
                out[i] = Some(vector);
            }
        }

        Ok(out.into_iter().flatten().collect())
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn cache_stats(&self) -> Option<CacheStats> {
        Some(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            size: self.cache.entry_count(),
            max_memory_mb: self.max_memory_mb,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: u64,
    pub max_memory_mb: usize,
}

impl CacheStats {
    /// Get cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} hits, {} misses ({:.0}% hit rate), {} vectors cached (limit {} MB)",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.size,
            self.max_memory_mb
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use std::sync::atomic::AtomicUsize;

    struct Counting {
        inner: HashingEmbedder,
        texts_seen: AtomicUsize,
    }

    impl Embedder for Counting {
        fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
            self.texts_seen.fetch_add(texts.len(), Ordering::SeqCst);
            self.inner.embed(texts)
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }

        fn model_name(&self) -> &str {
            self.inner.model_name()
        }
    }

    #[test]
    fn test_cache_hits_skip_backend() {
        let backend = Arc::new(Counting {
            inner: HashingEmbedder::new(16),
            texts_seen: AtomicUsize::new(0),
        });
        let cached = CachedEmbedder::new(backend.clone(), 1);

        let first = cached
            .embed(&["alpha".to_string(), "beta".to_string()])
            .unwrap();
        let second = cached
            .embed(&["beta".to_string(), "gamma".to_string(), "alpha".to_string()])
            .unwrap();

        assert_eq!(backend.texts_seen.load(Ordering::SeqCst), 3);
        assert_eq!(second[0], first[1]);
        assert_eq!(second[2], first[0]);
        assert_eq!(second[1], backend.inner.embed_one("gamma").unwrap());

        let stats = cached.cache_stats().unwrap();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 3);
        assert!((stats.hit_rate() - 0.4).abs() < 1e-9);
        assert!(stats.to_string().starts_with("2 hits, 3 misses (40% hit rate)"));
    }

    #[test]
    fn test_passes_through_identity() {
        let cached = CachedEmbedder::new(Arc::new(HashingEmbedder::new(8)), 1);
        assert_eq!(cached.dimensions(), 8);
        assert_eq!(cached.model_name(), "hashing-8");
        assert_eq!(cached.cache_stats().unwrap().hit_rate(), 0.0);
        assert!(HashingEmbedder::new(8).cache_stats().is_none());
    }
}
