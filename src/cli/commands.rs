use anyhow::{anyhow, Context, Result};
use colored::Colorize;
use serde::Serialize;
use std::collections::HashSet;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

use super::{load_embedder, open_store};
use crate::config::Config;
use crate::error::{StoreError, NOT_UPLOADED_MESSAGE, NO_MATCH_MESSAGE};
use crate::file::{FileWalker, Snapshot};
use crate::index::{FileUpload, Indexer, UploadOutcome, UploadRequest};
use crate::output::{section, spinner};
use crate::search::{QueryService, SearchMatch, SearchRequest};
use crate::server::{self, AppState};
use crate::vectordb::{CollectionKey, CollectionStore, Manifest};
use crate::{info_print, warn_print};

pub(super) async fn serve(mut config: Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let embedder = load_embedder(&config).await?;
    let store = open_store(&config, embedder.as_ref());
    let state = AppState::new(
        Indexer::new(store.clone(), embedder.clone(), &config),
        QueryService::new(store, embedder, &config),
    );

    info_print!(
        "{} http://{}:{}",
        "semdex listening on".bright_cyan().bold(),
        config.server.host,
        config.server.port
    );
    server::serve(&config, state).await
}

/// Where the fingerprints of the last indexed state of `key` live
fn snapshot_path(config: &Config, key: &CollectionKey) -> PathBuf {
    config
        .snapshots_dir()
        .join(key.relative_dir())
        .with_extension("json")
}

/// Inspection handle for an existing collection, sized from its manifest
fn inspection_store(config: &Config, manifest: &Manifest) -> CollectionStore {
    CollectionStore::new(
        config.collections_dir(),
        manifest.dimensions,
        manifest.model.clone(),
        config.vectordb.map_size_mb,
    )
}

/// Manifest of `key`, `None` when the collection does not exist
fn find_manifest(config: &Config, key: &CollectionKey) -> Result<Option<Manifest>> {
    match Manifest::load(&config.collections_dir(), key) {
        Ok(manifest) => Ok(Some(manifest)),
        Err(StoreError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(super) async fn index(
    config: Config,
    path: Option<PathBuf>,
    machine: String,
    project: Option<String>,
    incremental: bool,
    dry_run: bool,
) -> Result<()> {
    let root = path.unwrap_or_else(|| PathBuf::from("."));
    let root = root
        .canonicalize()
        .with_context(|| format!("Cannot index {}", root.display()))?;
    let project = match project {
        Some(project) => project,
        None => root
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("Cannot derive a project name from {}; pass --project", root.display()))?,
    };
    let key = CollectionKey::new(machine, project);

    info_print!("{}", "semdex indexer".bright_cyan().bold());
    info_print!("{}", "=".repeat(60));
    info_print!("Folder:     {}", root.display());
    info_print!("Collection: {}", key.name());
    info_print!("Data dir:   {}", config.data_dir.display());
    if dry_run {
        info_print!("\n{}", "DRY RUN MODE".bright_yellow());
    }

    // Phase 1: File Discovery
    section("Phase 1: File Discovery");
    let start = Instant::now();
    let walker = FileWalker::new(&root).max_file_size(config.indexing.max_file_size_kb * 1024);
    let (files, stats) = walker.walk()?;
    info_print!(
        "Found {} indexable files ({:.2} MB) in {:.2}s; skipped {} binary, {} too large",
        stats.indexable_files,
        stats.total_size_mb(),
        start.elapsed().as_secs_f32(),
        stats.skipped_binary,
        stats.skipped_large
    );

    // Phase 2: Change Detection
    section("Phase 2: Change Detection");
    let current = Snapshot::from_files(&files);
    let snapshot_file = snapshot_path(&config, &key);
    let exists = find_manifest(&config, &key)?.is_some();
    let has_snapshot = snapshot_file.exists();

    let request = if incremental && exists && has_snapshot {
        let diff = Snapshot::load(&snapshot_file)?.diff(&current);
        if diff.is_empty() {
            info_print!("{}", "Collection is up to date".green());
            return Ok(());
        }

        let changed: HashSet<&str> = diff.changed.iter().map(String::as_str).collect();
        info_print!("{} changed, {} deleted", diff.changed.len(), diff.deleted.len());
        UploadRequest {
            machine_id: key.machine_id.clone(),
            project_name: key.project_name.clone(),
            files: files
                .iter()
                .filter(|f| changed.contains(f.path.as_str()))
                .map(|f| FileUpload::new(f.path.as_str(), f.content.as_str()))
                .collect(),
            incremental: true,
            deleted: diff.deleted,
        }
    } else {
        if incremental && exists {
            // without the last snapshot, deletions since then cannot be known
            warn_print!(
                "{}",
                format!("No snapshot at {}; replacing the collection", snapshot_file.display()).yellow()
            );
        } else if incremental {
            warn_print!("{}", "No existing collection; uploading everything".yellow());
        }
        info_print!("Full upload of {} files", files.len());
        UploadRequest {
            machine_id: key.machine_id.clone(),
            project_name: key.project_name.clone(),
            files: files
                .iter()
                .map(|f| FileUpload::new(f.path.as_str(), f.content.as_str()))
                .collect(),
            incremental: false,
            deleted: Vec::new(),
        }
    };

    if dry_run {
        for file in &request.files {
            info_print!("  + {}", file.path);
        }
        for path in &request.deleted {
            info_print!("  - {}", path);
        }
        return Ok(());
    }

    // Phase 3: Embedding & Storage
    section("Phase 3: Embedding & Storage");
    let embedder = load_embedder(&config).await?;
    info_print!("Model: {} ({} dims)", embedder.model_name(), embedder.dimensions());
    let indexer = Indexer::new(open_store(&config, embedder.as_ref()), embedder.clone(), &config);

    let start = Instant::now();
    let bar = spinner("Chunking, embedding and writing");
    let outcome = tokio::task::spawn_blocking(move || indexer.upload(request))
        .await
        .context("Indexing task panicked")?;
    bar.finish_and_clear();
    let outcome = outcome?;

    current.save(&snapshot_file)?;

    section("Summary");
    match outcome {
        UploadOutcome::Full { chunks } => {
            info_print!("Indexed {} chunks from {} files", chunks, files.len());
        }
        UploadOutcome::Incremental {
            changed_files,
            deleted_files,
            chunks_added,
        } => {
            info_print!(
                "Updated {} files, removed {}, added {} chunks",
                changed_files,
                deleted_files,
                chunks_added
            );
        }
    }
    if let Some(stats) = embedder.cache_stats() {
        info_print!("Embedding cache: {}", stats);
    }
    info_print!("{} in {:.2}s", "Done".green().bold(), start.elapsed().as_secs_f32());
    Ok(())
}

#[derive(Serialize)]
struct JsonMatch<'a> {
    file_path: &'a str,
    line_number: usize,
    score: f32,
    content: &'a str,
}

pub(super) async fn search(
    config: Config,
    key: CollectionKey,
    query: String,
    top_k: Option<usize>,
    content: bool,
    scores: bool,
    json: bool,
) -> Result<()> {
    // skip loading a model for a collection that is not there
    if find_manifest(&config, &key)?.is_none() {
        println!("{}", NOT_UPLOADED_MESSAGE.red());
        return Ok(());
    }

    let embedder = load_embedder(&config).await?;
    let service = QueryService::new(open_store(&config, embedder.as_ref()), embedder, &config);
    let k = top_k.unwrap_or(service.top_k());

    let start = Instant::now();
    let request = SearchRequest {
        machine_id: key.machine_id.clone(),
        project_name: key.project_name.clone(),
        query: query.clone(),
    };
    let matches = tokio::task::spawn_blocking(move || service.search_matches(&request, k))
        .await
        .context("Search task panicked")??;

    if json {
        let out: Vec<JsonMatch> = matches
            .iter()
            .map(|m| JsonMatch {
                file_path: &m.location.file_path,
                line_number: m.location.line_number,
                score: m.score,
                content: &m.content,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if matches.is_empty() {
        println!("{}", NO_MATCH_MESSAGE.yellow());
        return Ok(());
    }

    info_print!(
        "{} results for \"{}\" in {} ({:.0}ms)\n",
        matches.len(),
        query.bright_white(),
        key.name(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    for m in &matches {
        print_match(m, content, scores);
    }
    Ok(())
}

fn print_match(m: &SearchMatch, show_content: bool, show_scores: bool) {
    println!("{}", "─".repeat(60));
    println!(
        "{}",
        format!("{}:{}", m.location.file_path, m.location.line_number).bright_green()
    );

    if show_scores {
        let score_text = format!("   Score: {:.3}", m.score);
        let colored = if m.score > 0.8 {
            score_text.green()
        } else if m.score > 0.6 {
            score_text.yellow()
        } else {
            score_text.red()
        };
        println!("{}", colored);
    }

    if show_content {
        for line in m.content.lines().take(10) {
            println!("   │ {}", line.dimmed());
        }
        if m.content.lines().count() > 10 {
            println!("   │ {}", "...".dimmed());
        }
    } else {
        let snippet: String = m.content.lines().take(3).collect::<Vec<_>>().join(" ");
        let snippet = if snippet.chars().count() > 100 {
            format!("{}...", snippet.chars().take(100).collect::<String>())
        } else {
            snippet
        };
        println!("   {}", snippet.dimmed());
    }
    println!();
}

pub(super) fn list(config: &Config) -> Result<()> {
    let manifests = Manifest::scan(&config.collections_dir())?;
    if manifests.is_empty() {
        println!("No collections found. Run {} first", "semdex index".bright_cyan());
        return Ok(());
    }

    println!("{}", "Collections".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    for manifest in &manifests {
        let store = inspection_store(config, manifest);
        let counts = store
            .open(&manifest.key())
            .and_then(|collection| collection.stats())
            .map(|s| format!("{} chunks, {} files", s.total_chunks, s.total_files))
            .unwrap_or_else(|e| format!("unreadable: {}", e).red().to_string());

        println!("{}", manifest.name.bright_green());
        println!("   {}", counts);
        println!(
            "   {} ({} dims), updated {}",
            manifest.model.dimmed(),
            manifest.dimensions,
            manifest.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    Ok(())
}

pub(super) fn stats(config: &Config, key: &CollectionKey) -> Result<()> {
    let Some(manifest) = find_manifest(config, key)? else {
        println!("{}", NOT_UPLOADED_MESSAGE.red());
        return Ok(());
    };

    let store = inspection_store(config, &manifest);
    let collection = store.open(key)?;
    let stats = collection.stats()?;

    println!("{}", "Collection Statistics".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("Collection:  {}", stats.name);
    println!("Machine:     {}", manifest.machine_id);
    println!("Project:     {}", manifest.project_name);
    println!("Model:       {} ({} dims)", manifest.model, stats.dimensions);
    println!("Chunks:      {}", stats.total_chunks);
    println!("Files:       {}", stats.total_files);
    println!("Created:     {}", manifest.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Updated:     {}", manifest.updated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Location:    {}", collection.path().display());
    Ok(())
}

pub(super) fn drop(config: &Config, key: &CollectionKey, yes: bool) -> Result<()> {
    let Some(manifest) = find_manifest(config, key)? else {
        println!("Collection {} does not exist", key.name());
        return Ok(());
    };

    if !yes && !confirm(&format!("Delete collection {}?", key.name()))? {
        println!("Aborted");
        return Ok(());
    }

    inspection_store(config, &manifest).delete(key)?;
    let snapshot = snapshot_path(config, key);
    if snapshot.exists() {
        std::fs::remove_file(&snapshot)?;
    }

    println!("{} {}", "Deleted".green(), key.name());
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}
