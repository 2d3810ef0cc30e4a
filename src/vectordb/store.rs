use crate::embed::EmbeddedChunk;
use crate::error::StoreError;
use arroy::distances::Cosine;
use arroy::{Database as ArroyDatabase, ItemId, Reader, Writer};
use heed::byteorder::BigEndian;
use heed::types::*;
use heed::{Database, EnvOpenOptions, RwTxn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

const NEXT_ITEM_KEY: &str = "next_item_id";

/// Chunk record stored in the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Opaque unique id
    pub id: String,
    pub content: String,
    pub file_path: String,
    /// 1-based first line of the enclosing window
    pub line_start: usize,
    pub hash: String,
}

/// Item ids of one file, in insertion order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct FileEntry {
    path: String,
    items: Vec<ItemId>,
}

/// A record together with its vector, ready to be written
#[derive(Debug, Clone)]
pub struct RecordInsert {
    pub record: ChunkRecord,
    pub vector: Vec<f32>,
}

impl RecordInsert {
    /// Wrap an embedded chunk under a fresh UUID
    pub fn fresh(embedded: EmbeddedChunk) -> Self {
        let EmbeddedChunk { chunk, embedding } = embedded;
        Self {
            record: ChunkRecord {
                id: Uuid::new_v4().to_string(),
                content: chunk.content,
                file_path: chunk.path,
                line_start: chunk.line_start,
                hash: chunk.hash,
            },
            vector: embedding,
        }
    }
}

/// One step of an atomic write
#[derive(Debug, Clone)]
pub enum WriteOp {
    /// Remove every record of a file path
    DeleteFile(String),
    Insert(RecordInsert),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    pub deleted: usize,
    pub inserted: usize,
}

/// Query hit with its record
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub item: ItemId,
    pub record: ChunkRecord,
    pub distance: f32,
    /// 1.0 - distance (higher is better)
    pub score: f32,
}

/// Statistics about one collection
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub name: String,
    pub total_chunks: usize,
    pub total_files: usize,
    pub dimensions: usize,
}

/// One generation of a project collection: arroy + heed (LMDB)
///
/// - Vector search via arroy (ANN with random projections)
/// - Records, per-file item lists and the id counter via heed
/// - Every write is a single LMDB transaction that also rebuilds the index,
///   so readers never observe an unbuilt index
pub struct Collection {
    name: String,
    path: PathBuf,
    env: heed::Env,
    vectors: ArroyDatabase<Cosine>,
    chunks: Database<U32<BigEndian>, SerdeBincode<ChunkRecord>>,
    files: Database<Str, SerdeBincode<FileEntry>>,
    meta: Database<Str, U32<BigEndian>>,
    dimensions: usize,
}

impl Collection {
    /// Create the LMDB environment at `path`, or open it if it exists
    pub fn create(path: &Path, name: &str, dimensions: usize, map_size_mb: usize) -> Result<Self, StoreError> {
        // LMDB expects a directory, not a file
        std::fs::create_dir_all(path)?;
        Self::open_env(path, name, dimensions, map_size_mb)
    }

    /// Open an existing environment. A missing directory is `NotFound` and is
    /// never created here.
    pub fn open(path: &Path, name: &str, dimensions: usize, map_size_mb: usize) -> Result<Self, StoreError> {
        if !path.is_dir() {
            return Err(StoreError::NotFound(name.to_string()));
        }
        Self::open_env(path, name, dimensions, map_size_mb)
    }

    fn open_env(path: &Path, name: &str, dimensions: usize, map_size_mb: usize) -> Result<Self, StoreError> {
        debug!("Opening collection {} at {}", name, path.display());

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size_mb.max(1) * 1024 * 1024)
                .max_dbs(10)
                .open(path)?
        };

        let databases = (|| -> Result<_, StoreError> {
            let mut wtxn = env.write_txn()?;
            let vectors: ArroyDatabase<Cosine> = env.create_database(&mut wtxn, Some("vectors"))?;
            let chunks: Database<U32<BigEndian>, SerdeBincode<ChunkRecord>> =
                env.create_database(&mut wtxn, Some("chunks"))?;
            let files: Database<Str, SerdeBincode<FileEntry>> = env.create_database(&mut wtxn, Some("files"))?;
            let meta: Database<Str, U32<BigEndian>> = env.create_database(&mut wtxn, Some("meta"))?;
            wtxn.commit()?;
            Ok((vectors, chunks, files, meta))
        })();

        let (vectors, chunks, files, meta) = match databases {
            Ok(dbs) => dbs,
            Err(e) => {
                // heed keeps the env registered until told otherwise
                env.prepare_for_closing();
                return Err(e);
            }
        };

        Ok(Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            env,
            vectors,
            chunks,
            files,
            meta,
            dimensions,
        })
    }

    /// Release the environment once the last handle to it is dropped.
    ///
    /// heed keeps every opened env in a process-wide registry; call this for
    /// superseded, discarded and deleted generations. Existing handles keep
    /// working, and the path cannot be reopened until they are dropped.
    pub fn close(&self) {
        self.env.clone().prepare_for_closing();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Append records. Returns the number inserted.
    pub fn add(&self, records: Vec<RecordInsert>) -> Result<usize, StoreError> {
        let ops = records.into_iter().map(WriteOp::Insert).collect();
        Ok(self.apply(ops)?.inserted)
    }

    /// Remove all records of `file_path`. Returns the number removed.
    pub fn delete_where(&self, file_path: &str) -> Result<usize, StoreError> {
        Ok(self.apply(vec![WriteOp::DeleteFile(file_path.to_string())])?.deleted)
    }

    /// Apply `ops` in order inside one write transaction.
    ///
    /// Either every op is visible to later readers or none is.
    pub fn apply(&self, ops: Vec<WriteOp>) -> Result<ApplySummary, StoreError> {
        if ops.is_empty() {
            return Ok(ApplySummary::default());
        }

        for op in &ops {
            if let WriteOp::Insert(insert) = op {
                self.check_dimensions(insert.vector.len())?;
            }
        }

        let mut wtxn = self.env.write_txn()?;
        let writer = Writer::new(self.vectors, 0, self.dimensions);
        let mut next_id = self.meta.get(&wtxn, NEXT_ITEM_KEY)?.unwrap_or(0);
        let mut summary = ApplySummary::default();

        for op in ops {
            match op {
                WriteOp::DeleteFile(path) => {
                    summary.deleted += self.remove_file(&mut wtxn, &writer, &path)?;
                }
                WriteOp::Insert(insert) => {
                    let id = next_id;
                    next_id = next_id
                        .checked_add(1)
                        .ok_or_else(|| StoreError::IdsExhausted(self.name.clone()))?;
                    self.insert(&mut wtxn, &writer, id, insert)?;
                    summary.inserted += 1;
                }
            }
        }

        self.meta.put(&mut wtxn, NEXT_ITEM_KEY, &next_id)?;
        self.rebuild(&mut wtxn, &writer)?;
        wtxn.commit()?;

        debug!(
            "Collection {}: -{} +{} records",
            self.name, summary.deleted, summary.inserted
        );
        Ok(summary)
    }

    fn remove_file(&self, wtxn: &mut RwTxn, writer: &Writer<Cosine>, path: &str) -> Result<usize, StoreError> {
        let key = file_key(path);
        let Some(entry) = self.files.get(wtxn, &key)? else {
            return Ok(0);
        };

        for id in &entry.items {
            writer.del_item(wtxn, *id)?;
            self.chunks.delete(wtxn, id)?;
        }
        self.files.delete(wtxn, &key)?;

        Ok(entry.items.len())
    }

    fn insert(&self, wtxn: &mut RwTxn, writer: &Writer<Cosine>, id: ItemId, insert: RecordInsert) -> Result<(), StoreError> {
        let RecordInsert { record, vector } = insert;
        let key = file_key(&record.file_path);

        let mut entry = self.files.get(wtxn, &key)?.unwrap_or_else(|| FileEntry {
            path: record.file_path.clone(),
            items: Vec::new(),
        });
        entry.items.push(id);

        writer.add_item(wtxn, id, &vector)?;
        self.chunks.put(wtxn, &id, &record)?;
        self.files.put(wtxn, &key, &entry)?;
        Ok(())
    }

    /// Build the vector index for the pending changes
    fn rebuild(&self, wtxn: &mut RwTxn, writer: &Writer<Cosine>) -> Result<(), StoreError> {
        if self.chunks.is_empty(wtxn)? {
            // nothing left to index; drop trees and pending updates
            self.vectors.clear(wtxn)?;
            return Ok(());
        }

        let mut rng = StdRng::seed_from_u64(rand::random());
        writer.builder(&mut rng).build(wtxn)?;
        Ok(())
    }

    /// Up to `k` nearest records, most similar first
    pub fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredRecord>, StoreError> {
        self.check_dimensions(vector.len())?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let rtxn = self.env.read_txn()?;
        if self.chunks.is_empty(&rtxn)? {
            return Ok(Vec::new());
        }

        let reader = Reader::open(&rtxn, 0, self.vectors)?;

        // Improve search quality by exploring more candidates
        let mut query = reader.nns(k);
        if let Some(n_trees) = NonZeroUsize::new(reader.n_trees()) {
            if let Some(search_k) = NonZeroUsize::new(k * n_trees.get() * 15) {
                query.search_k(search_k);
            }
        }

        let hits = query.by_vector(&rtxn, vector)?;

        let mut results = Vec::with_capacity(hits.len());
        for (item, distance) in hits {
            if let Some(record) = self.chunks.get(&rtxn, &item)? {
                results.push(ScoredRecord {
                    item,
                    record,
                    distance,
                    score: 1.0 - distance,
                });
            }
        }

        Ok(results)
    }

    /// Records of one file in insertion order
    pub fn records_for(&self, file_path: &str) -> Result<Vec<ChunkRecord>, StoreError> {
        let rtxn = self.env.read_txn()?;
        let Some(entry) = self.files.get(&rtxn, &file_key(file_path))? else {
            return Ok(Vec::new());
        };

        let mut records = Vec::with_capacity(entry.items.len());
        for id in entry.items {
            if let Some(record) = self.chunks.get(&rtxn, &id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Every file path with at least one record
    pub fn file_paths(&self) -> Result<Vec<String>, StoreError> {
        let rtxn = self.env.read_txn()?;
        let mut paths = Vec::new();
        for result in self.files.iter(&rtxn)? {
            let (_, entry) = result?;
            paths.push(entry.path);
        }
        paths.sort();
        Ok(paths)
    }

    pub fn stats(&self) -> Result<CollectionStats, StoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(CollectionStats {
            name: self.name.clone(),
            total_chunks: self.chunks.len(&rtxn)? as usize,
            total_files: self.files.len(&rtxn)? as usize,
            dimensions: self.dimensions,
        })
    }

    fn check_dimensions(&self, actual: usize) -> Result<(), StoreError> {
        if actual != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                name: self.name.clone(),
                expected: self.dimensions,
                actual,
            });
        }
        Ok(())
    }
}

/// LMDB keys are length-limited; index files by path digest
fn file_key(path: &str) -> String {
    format!("{:x}", Sha256::digest(path.as_bytes()))
}
