use anyhow::Result;
use colored::Colorize;

use super::load_embedder;
use crate::config::{Config, CONFIG_FILE_NAME};
use crate::vectordb::Manifest;

fn pass(label: &str, detail: impl std::fmt::Display) {
    println!("{} {:<14} {}", "ok".green(), label, detail);
}

fn fail(label: &str, detail: impl std::fmt::Display) {
    println!("{} {:<14} {}", "!!".red(), label, detail);
}

/// Check that the data directory, collections and embedder all work
pub async fn run(config: Config) -> Result<()> {
    println!("{}", "Checking semdex installation".bright_cyan().bold());
    println!("{}", "=".repeat(60));

    let mut failures = 0;

    match config.data_dir() {
        Ok(dir) => pass("data dir", dir.display()),
        Err(e) => {
            fail("data dir", e);
            failures += 1;
        }
    }

    let config_file = config.data_dir.join(CONFIG_FILE_NAME);
    if config_file.exists() {
        pass("config", config_file.display());
    } else {
        pass("config", "defaults (no config.toml)");
    }

    match Manifest::scan(&config.collections_dir()) {
        Ok(manifests) => pass("collections", format!("{} found", manifests.len())),
        Err(e) => {
            fail("collections", e);
            failures += 1;
        }
    }

    match load_embedder(&config).await {
        Ok(embedder) => {
            let name = embedder.model_name().to_string();
            let expected = embedder.dimensions();
            let sample = tokio::task::spawn_blocking(move || {
                // the second call should be served from the cache when one is configured
                let vector = embedder.embed_one("fn main() {}")?;
                embedder.embed_one("fn main() {}")?;
                Ok::<_, crate::error::EmbedError>((vector, embedder.cache_stats()))
            })
            .await;
            match sample {
                Ok(Ok((v, cache))) if v.len() == expected => {
                    pass("embedder", format!("{} ({} dims)", name, expected));
                    match cache {
                        Some(stats) if stats.hits > 0 => pass("cache", stats),
                        Some(stats) => {
                            fail("cache", format!("repeated text missed the cache: {}", stats));
                            failures += 1;
                        }
                        None => pass("cache", "disabled"),
                    }
                }
                Ok(Ok((v, _))) => {
                    fail("embedder", format!("{} returned {} dims, expected {}", name, v.len(), expected));
                    failures += 1;
                }
                Ok(Err(e)) => {
                    fail("embedder", e);
                    failures += 1;
                }
                Err(e) => {
                    fail("embedder", e);
                    failures += 1;
                }
            }
        }
        Err(e) => {
            fail("embedder", e);
            failures += 1;
        }
    }

    println!();
    if failures == 0 {
        println!("{}", "All checks passed".green().bold());
        Ok(())
    } else {
        anyhow::bail!("{} check(s) failed", failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmbeddingBackend;

    #[tokio::test]
    async fn test_doctor_passes_with_hashing_backend() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        config.embedding.backend = EmbeddingBackend::Hashing;

        run(config).await.unwrap();
    }

    #[tokio::test]
    async fn test_doctor_passes_without_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.data_dir = dir.path().to_path_buf();
        config.embedding.backend = EmbeddingBackend::Hashing;
        config.embedding.cache_size_mb = 0;

        run(config).await.unwrap();
    }
}
