//! Upload processing: full rebuilds and incremental updates of a project
//! collection.
//!
//! Every request moves through `Received`, then `FullRebuild` or
//! `IncrementalUpdate`, and ends `Complete` or `Failed`. Nothing is written
//! until all chunks of the request are embedded, and full rebuilds are staged
//! in a separate generation, so a failed request never leaves a partial
//! collection behind.

use crate::chunker::{Chunk, LineWindowChunker};
use crate::config::Config;
use crate::embed::{BatchEmbedder, Embedder, MAX_BATCH_SIZE};
use crate::error::{Error, Result, StoreError};
use crate::vectordb::{CollectionKey, CollectionStore, RecordInsert, StagedCollection, WriteOp};
use anyhow::anyhow;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// One uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpload {
    pub path: String,
    pub content: String,
}

impl FileUpload {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

/// Body of `POST /upload-folder`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub machine_id: String,
    pub project_name: String,
    pub files: Vec<FileUpload>,
    #[serde(default)]
    pub incremental: bool,
    #[serde(default)]
    pub deleted: Vec<String>,
}

impl UploadRequest {
    pub fn key(&self) -> CollectionKey {
        CollectionKey::new(&self.machine_id, &self.project_name)
    }

    pub fn validate(&self) -> Result<()> {
        require_non_blank("machineId", &self.machine_id)?;
        require_non_blank("projectName", &self.project_name)?;
        if self.files.iter().any(|f| f.path.trim().is_empty()) {
            return Err(Error::Validation("file path must not be blank".to_string()));
        }
        if self.deleted.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::Validation("deleted path must not be blank".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn require_non_blank(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} must not be blank", field)));
    }
    Ok(())
}

/// Result of a processed upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status")]
pub enum UploadOutcome {
    #[serde(rename = "uploaded_full")]
    Full { chunks: usize },
    #[serde(rename = "uploaded_incremental")]
    Incremental {
        changed_files: usize,
        deleted_files: usize,
        chunks_added: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Received,
    FullRebuild,
    IncrementalUpdate,
    Complete,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Received => "RECEIVED",
            Phase::FullRebuild => "FULL_REBUILD",
            Phase::IncrementalUpdate => "INCREMENTAL_UPDATE",
            Phase::Complete => "COMPLETE",
            Phase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Chunks, embeds and writes uploads into the collection store
pub struct Indexer {
    store: Arc<CollectionStore>,
    embedder: BatchEmbedder,
    chunker: LineWindowChunker,
}

impl Indexer {
    pub fn new(store: Arc<CollectionStore>, embedder: Arc<dyn Embedder>, config: &Config) -> Self {
        let indexing = &config.indexing;
        Self {
            store,
            embedder: BatchEmbedder::new(embedder, config.embedding.batch_size),
            chunker: LineWindowChunker::new(
                indexing.window_lines,
                indexing.chunk_chars,
                indexing.chunk_overlap,
            ),
        }
    }

    pub fn store(&self) -> &Arc<CollectionStore> {
        &self.store
    }

    pub fn chunker(&self) -> &LineWindowChunker {
        &self.chunker
    }

    /// Process one upload request
    pub fn upload(&self, request: UploadRequest) -> Result<UploadOutcome> {
        request.validate()?;

        let key = request.key();
        let name = key.name();
        let start = Instant::now();
        info!(
            "[{}] {}: {} files, {} deleted, incremental={}",
            name,
            Phase::Received,
            request.files.len(),
            request.deleted.len(),
            request.incremental
        );

        let result = if request.incremental {
            info!("[{}] {}", name, Phase::IncrementalUpdate);
            self.incremental_update(&key, request.files, request.deleted)
        } else {
            info!("[{}] {}", name, Phase::FullRebuild);
            self.full_rebuild(&key, request.files)
                .map(|chunks| UploadOutcome::Full { chunks })
        };

        match &result {
            Ok(outcome) => info!(
                "[{}] {} in {:.2}s: {:?}",
                name,
                Phase::Complete,
                start.elapsed().as_secs_f32(),
                outcome
            ),
            Err(e) => warn!("[{}] {}: {}", name, Phase::Failed, e),
        }
        result
    }

    /// Replace the collection with the chunks of `files`.
    ///
    /// Returns the number of chunks written.
    pub fn full_rebuild(&self, key: &CollectionKey, files: Vec<FileUpload>) -> Result<usize> {
        let lock = self.store.write_lock(key);
        let _guard = lock.lock().map_err(|_| anyhow!("write lock poisoned"))?;

        let chunks: Vec<Chunk> = self
            .chunk_files(latest_versions(files))
            .into_iter()
            .flat_map(|(_, chunks)| chunks)
            .collect();
        debug!("[{}] {} chunks to write", key.name(), chunks.len());

        let staged = self.store.stage(key).map_err(Error::from_write)?;
        match self.fill(&staged, chunks) {
            Ok(written) => {
                self.store.commit(staged).map_err(Error::from_write)?;
                Ok(written)
            }
            Err(e) => {
                if let Err(discard) = self.store.discard(staged) {
                    warn!("Failed to discard staged generation: {}", discard);
                }
                Err(e)
            }
        }
    }

    fn fill(&self, staged: &StagedCollection, chunks: Vec<Chunk>) -> Result<usize> {
        let mut written = 0;
        let mut remaining = chunks.into_iter();

        loop {
            let batch: Vec<Chunk> = remaining.by_ref().take(MAX_BATCH_SIZE).collect();
            if batch.is_empty() {
                break;
            }

            let embedded = self.embedder.embed_chunks(batch)?;
            let records = embedded.into_iter().map(RecordInsert::fresh).collect();
            written += staged.collection().add(records).map_err(Error::from_write)?;
        }

        Ok(written)
    }

    /// Upsert `files` and remove `deleted` in one atomic write.
    ///
    /// The collection is created when absent, and only after every chunk is
    /// embedded. A path listed in both ends up with its new content.
    pub fn incremental_update(&self, key: &CollectionKey, files: Vec<FileUpload>, deleted: Vec<String>) -> Result<UploadOutcome> {
        let lock = self.store.write_lock(key);
        let _guard = lock.lock().map_err(|_| anyhow!("write lock poisoned"))?;

        let existing = match self.store.open(key) {
            Ok(collection) => Some(collection),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(Error::from_write(e)),
        };

        let per_file = self.chunk_files(latest_versions(files));
        let changed_files = per_file.len();
        let counts: Vec<usize> = per_file.iter().map(|(_, chunks)| chunks.len()).collect();
        let all_chunks: Vec<Chunk> = per_file.iter().flat_map(|(_, chunks)| chunks.iter().cloned()).collect();

        // embed everything before touching the store
        let mut embedded = self.embedder.embed_chunks(all_chunks)?.into_iter();

        let mut ops: Vec<WriteOp> = deleted.iter().cloned().map(WriteOp::DeleteFile).collect();
        for ((path, _), count) in per_file.into_iter().zip(counts) {
            ops.push(WriteOp::DeleteFile(path));
            ops.extend(
                embedded
                    .by_ref()
                    .take(count)
                    .map(|e| WriteOp::Insert(RecordInsert::fresh(e))),
            );
        }

        let summary = match existing {
            Some(collection) => collection.apply(ops).map_err(Error::from_write)?,
            None => {
                // a first upload becomes visible only once it is complete
                info!("[{}] creating collection", key.name());
                let staged = self.store.stage(key).map_err(Error::from_write)?;
                match staged.collection().apply(ops) {
                    Ok(summary) => {
                        self.store.commit(staged).map_err(Error::from_write)?;
                        summary
                    }
                    Err(e) => {
                        if let Err(discard) = self.store.discard(staged) {
                            warn!("Failed to discard staged generation: {}", discard);
                        }
                        return Err(Error::from_write(e));
                    }
                }
            }
        };
        debug!(
            "[{}] removed {} records, added {}",
            key.name(),
            summary.deleted,
            summary.inserted
        );

        Ok(UploadOutcome::Incremental {
            changed_files,
            deleted_files: deleted.len(),
            chunks_added: summary.inserted,
        })
    }

    /// Chunk files in parallel, keeping file order
    fn chunk_files(&self, files: Vec<FileUpload>) -> Vec<(String, Vec<Chunk>)> {
        files
            .into_par_iter()
            .map(|file| {
                let chunks = self.chunker.chunk_file(&file.path, &file.content);
                (file.path, chunks)
            })
            .collect()
    }
}

/// Drop earlier occurrences of repeated paths; the last one wins
fn latest_versions(files: Vec<FileUpload>) -> Vec<FileUpload> {
    let mut last: HashMap<&str, usize> = HashMap::new();
    for (i, file) in files.iter().enumerate() {
        last.insert(file.path.as_str(), i);
    }
    let keep: Vec<bool> = files
        .iter()
        .enumerate()
        .map(|(i, f)| last.get(f.path.as_str()) == Some(&i))
        .collect();

    files
        .into_iter()
        .zip(keep)
        .filter_map(|(file, keep)| keep.then_some(file))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::error::EmbedError;
    use crate::vectordb::Collection;
    use pretty_assertions::assert_eq;
    use std::path::Path;
    use tempfile::tempdir;

    const DIMS: usize = 64;

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn embed(&self, _texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, EmbedError> {
            Err(EmbedError::Unavailable("connection refused".to_string()))
        }

        fn dimensions(&self) -> usize {
            DIMS
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn setup(root: &Path) -> (Arc<CollectionStore>, Indexer) {
        let store = Arc::new(CollectionStore::new(root, DIMS, "hashing-64", 64));
        let indexer = Indexer::new(
            store.clone(),
            Arc::new(HashingEmbedder::new(DIMS)),
            &Config::default(),
        );
        (store, indexer)
    }

    fn full(files: Vec<FileUpload>) -> UploadRequest {
        UploadRequest {
            machine_id: "m1".to_string(),
            project_name: "p1".to_string(),
            files,
            incremental: false,
            deleted: Vec::new(),
        }
    }

    fn incremental(files: Vec<FileUpload>, deleted: &[&str]) -> UploadRequest {
        UploadRequest {
            incremental: true,
            deleted: deleted.iter().map(|s| s.to_string()).collect(),
            ..full(files)
        }
    }

    fn contents(collection: &Collection, path: &str) -> Vec<(String, usize)> {
        collection
            .records_for(path)
            .unwrap()
            .into_iter()
            .map(|r| (r.content, r.line_start))
            .collect()
    }

    fn expected(indexer: &Indexer, path: &str, content: &str) -> Vec<(String, usize)> {
        indexer
            .chunker()
            .chunk_file(path, content)
            .into_iter()
            .map(|c| (c.content, c.line_start))
            .collect()
    }

    fn key() -> CollectionKey {
        CollectionKey::new("m1", "p1")
    }

    #[test]
    fn test_full_upload_is_idempotent() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());
        let files = vec![
            FileUpload::new("a.py", "def foo():\n    return 1\n"),
            FileUpload::new("b.py", "import os\nprint(os.getcwd())\n"),
        ];

        let first = indexer.upload(full(files.clone())).unwrap();
        assert_eq!(first, UploadOutcome::Full { chunks: 2 });

        let second = indexer.upload(full(files)).unwrap();
        assert_eq!(second, first);

        let collection = store.open(&key()).unwrap();
        let stats = collection.stats().unwrap();
        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.total_files, 2);
    }

    #[test]
    fn test_full_rebuild_replaces_previous_files() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());

        indexer.upload(full(vec![FileUpload::new("old.py", "x = 1")])).unwrap();
        indexer.upload(full(vec![FileUpload::new("new.py", "y = 2")])).unwrap();

        let collection = store.open(&key()).unwrap();
        assert_eq!(collection.file_paths().unwrap(), vec!["new.py".to_string()]);
    }

    #[test]
    fn test_duplicate_paths_last_wins() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());

        let outcome = indexer
            .upload(full(vec![
                FileUpload::new("a.py", "first version"),
                FileUpload::new("b.py", "other"),
                FileUpload::new("a.py", "second version"),
            ]))
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Full { chunks: 2 });

        let collection = store.open(&key()).unwrap();
        assert_eq!(contents(&collection, "a.py"), vec![("second version".to_string(), 1)]);
    }

    #[test]
    fn test_incremental_matches_chunker_output() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());

        let long_a: String = (1..=45).map(|i| format!("value_{i} = {i}\n")).collect();
        indexer
            .upload(full(vec![
                FileUpload::new("a.py", long_a.as_str()),
                FileUpload::new("b.py", "print('b')"),
                FileUpload::new("keep.py", "print('keep')"),
            ]))
            .unwrap();

        let new_a = "def foo():\n    return 2\n";
        let outcome = indexer
            .upload(incremental(
                vec![
                    FileUpload::new("a.py", new_a),
                    FileUpload::new("c.py", "print('c')"),
                ],
                &["b.py"],
            ))
            .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Incremental {
                changed_files: 2,
                deleted_files: 1,
                chunks_added: 2,
            }
        );

        let collection = store.open(&key()).unwrap();
        assert_eq!(contents(&collection, "a.py"), expected(&indexer, "a.py", new_a));
        assert!(contents(&collection, "b.py").is_empty());
        assert_eq!(contents(&collection, "c.py"), vec![("print('c')".to_string(), 1)]);
        assert_eq!(contents(&collection, "keep.py"), vec![("print('keep')".to_string(), 1)]);
        assert_eq!(
            collection.file_paths().unwrap(),
            vec!["a.py".to_string(), "c.py".to_string(), "keep.py".to_string()]
        );
    }

    #[test]
    fn test_incremental_creates_missing_collection() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());

        let outcome = indexer
            .upload(incremental(vec![FileUpload::new("a.py", "x = 1")], &["never-existed.py"]))
            .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Incremental {
                changed_files: 1,
                deleted_files: 1,
                chunks_added: 1,
            }
        );
        assert_eq!(store.open(&key()).unwrap().stats().unwrap().total_chunks, 1);
    }

    #[test]
    fn test_path_both_deleted_and_changed_keeps_new_content() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());

        indexer.upload(full(vec![FileUpload::new("a.py", "old")])).unwrap();
        indexer
            .upload(incremental(vec![FileUpload::new("a.py", "new")], &["a.py"]))
            .unwrap();

        let collection = store.open(&key()).unwrap();
        assert_eq!(contents(&collection, "a.py"), vec![("new".to_string(), 1)]);
    }

    #[test]
    fn test_emptied_file_has_no_chunks() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());

        indexer.upload(full(vec![FileUpload::new("a.py", "content")])).unwrap();
        indexer
            .upload(incremental(vec![FileUpload::new("a.py", "")], &[]))
            .unwrap();

        let collection = store.open(&key()).unwrap();
        assert_eq!(collection.stats().unwrap().total_chunks, 0);
    }

    #[test]
    fn test_failed_full_rebuild_keeps_previous_collection() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());
        indexer.upload(full(vec![FileUpload::new("a.py", "x = 1")])).unwrap();

        let broken = Indexer::new(store.clone(), Arc::new(FailingEmbedder), &Config::default());
        let err = broken
            .upload(full(vec![FileUpload::new("b.py", "y = 2")]))
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(EmbedError::Unavailable(_))));

        let collection = store.open(&key()).unwrap();
        assert_eq!(collection.file_paths().unwrap(), vec!["a.py".to_string()]);

        let generations = std::fs::read_dir(temp_dir.path().join(key().relative_dir()))
            .unwrap()
            .flatten()
            .filter(|e| e.path().is_dir())
            .count();
        assert_eq!(generations, 1);
    }

    #[test]
    fn test_failed_incremental_changes_nothing() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());
        indexer.upload(full(vec![FileUpload::new("a.py", "x = 1")])).unwrap();

        let broken = Indexer::new(store.clone(), Arc::new(FailingEmbedder), &Config::default());
        assert!(broken
            .upload(incremental(vec![FileUpload::new("b.py", "y = 2")], &["a.py"]))
            .is_err());

        let collection = store.open(&key()).unwrap();
        assert_eq!(collection.file_paths().unwrap(), vec!["a.py".to_string()]);
    }

    #[test]
    fn test_failed_first_incremental_creates_nothing() {
        let temp_dir = tempdir().unwrap();
        let (store, _) = setup(temp_dir.path());

        let broken = Indexer::new(store.clone(), Arc::new(FailingEmbedder), &Config::default());
        let err = broken
            .upload(incremental(vec![FileUpload::new("a.py", "x = 1")], &[]))
            .unwrap_err();
        assert!(matches!(err, Error::Embedding(EmbedError::Unavailable(_))));

        assert!(matches!(store.open(&key()), Err(StoreError::NotFound(_))));
        assert!(store.list().unwrap().is_empty());
    }

    fn long_file(lines: usize) -> String {
        (1..=lines).map(|i| format!("v{i} = {i}\n")).collect()
    }

    #[test]
    fn test_full_rebuild_across_batches() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());
        let content = long_file(5000);
        let want = expected(&indexer, "big.py", &content);
        assert_eq!(want.len(), 250);

        let outcome = indexer
            .upload(full(vec![FileUpload::new("big.py", content.as_str())]))
            .unwrap();
        assert_eq!(outcome, UploadOutcome::Full { chunks: 250 });

        let collection = store.open(&key()).unwrap();
        assert_eq!(collection.stats().unwrap().total_chunks, 250);
        assert_eq!(contents(&collection, "big.py"), want);
    }

    #[test]
    fn test_incremental_across_batches() {
        let temp_dir = tempdir().unwrap();
        let (store, indexer) = setup(temp_dir.path());
        indexer.upload(full(vec![FileUpload::new("big.py", "x = 1")])).unwrap();

        let content = long_file(5000);
        let outcome = indexer
            .upload(incremental(vec![FileUpload::new("big.py", content.as_str())], &[]))
            .unwrap();
        assert_eq!(
            outcome,
            UploadOutcome::Incremental {
                changed_files: 1,
                deleted_files: 0,
                chunks_added: 250,
            }
        );

        let collection = store.open(&key()).unwrap();
        assert_eq!(collection.stats().unwrap().total_chunks, 250);
        assert_eq!(contents(&collection, "big.py"), expected(&indexer, "big.py", &content));
    }

    #[test]
    fn test_validation() {
        let temp_dir = tempdir().unwrap();
        let (_, indexer) = setup(temp_dir.path());

        let mut request = full(vec![FileUpload::new("a.py", "x")]);
        request.machine_id = "  ".to_string();
        assert!(matches!(indexer.upload(request), Err(Error::Validation(_))));

        let request = full(vec![FileUpload::new("", "x")]);
        assert!(matches!(indexer.upload(request), Err(Error::Validation(_))));

        let request = incremental(vec![], &[""]);
        assert!(matches!(indexer.upload(request), Err(Error::Validation(_))));
    }

    #[test]
    fn test_request_wire_format() {
        let request: UploadRequest = serde_json::from_str(
            r#"{"machineId":"m1","projectName":"p1","files":[{"path":"a.py","content":"x"}]}"#,
        )
        .unwrap();
        assert!(!request.incremental);
        assert!(request.deleted.is_empty());
        assert_eq!(request.files[0], FileUpload::new("a.py", "x"));

        let missing_files = serde_json::from_str::<UploadRequest>(r#"{"machineId":"m1","projectName":"p1"}"#);
        assert!(missing_files.is_err());
    }

    #[test]
    fn test_outcome_wire_format() {
        let full = serde_json::to_value(UploadOutcome::Full { chunks: 4 }).unwrap();
        assert_eq!(full, serde_json::json!({"status": "uploaded_full", "chunks": 4}));

        let incremental = serde_json::to_value(UploadOutcome::Incremental {
            changed_files: 1,
            deleted_files: 2,
            chunks_added: 3,
        })
        .unwrap();
        assert_eq!(
            incremental,
            serde_json::json!({
                "status": "uploaded_incremental",
                "changed_files": 1,
                "deleted_files": 2,
                "chunks_added": 3
            })
        );
    }

    #[test]
    fn test_latest_versions() {
        let files = latest_versions(vec![
            FileUpload::new("a", "1"),
            FileUpload::new("b", "2"),
            FileUpload::new("a", "3"),
        ]);
        assert_eq!(files, vec![FileUpload::new("b", "2"), FileUpload::new("a", "3")]);
    }
}
