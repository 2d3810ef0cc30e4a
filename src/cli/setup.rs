use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use std::time::Instant;

use crate::config::{Config, EmbeddingBackend};
use crate::embed::{Embedder, FastEmbedder, ModelType};
use crate::output::spinner;

/// Fetch the configured local model into `<data-dir>/models`
pub async fn run(config: Config) -> Result<()> {
    if config.embedding.backend != EmbeddingBackend::FastEmbed {
        println!(
            "Backend '{:?}' needs no local model; nothing to download",
            config.embedding.backend
        );
        return Ok(());
    }

    let model_type = match config.embedding.model.as_deref() {
        Some(name) => ModelType::from_name(name).ok_or_else(|| anyhow!("Unknown model: '{}'", name))?,
        None => ModelType::default(),
    };
    let cache_dir = config.data_dir()?.join("models");

    println!(
        "Downloading embedding model: {} ({} dims)",
        model_type.name().bright_cyan(),
        model_type.dimensions()
    );
    println!("Into: {}", cache_dir.display());

    let start = Instant::now();
    let bar = spinner("Fetching weights");
    let loaded = tokio::task::spawn_blocking(move || {
        let embedder = FastEmbedder::with_model(model_type, &cache_dir)?;
        // one embedding proves the weights load
        embedder.embed_one("semdex setup").map_err(anyhow::Error::from)
    })
    .await
    .context("Model download panicked")?;
    bar.finish_and_clear();
    loaded?;

    println!(
        "{} in {:.1}s",
        "Setup complete".green().bold(),
        start.elapsed().as_secs_f32()
    );
    Ok(())
}
