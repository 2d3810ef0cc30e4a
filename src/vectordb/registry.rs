use super::store::Collection;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MANIFEST_FILE: &str = "manifest.json";
const GENERATION_PREFIX: &str = "gen-";
const OPEN_ATTEMPTS: usize = 3;

/// Identifies a project collection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionKey {
    pub machine_id: String,
    pub project_name: String,
}

impl CollectionKey {
    pub fn new(machine_id: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            machine_id: machine_id.into(),
            project_name: project_name.into(),
        }
    }

    /// Human-readable collection name
    pub fn name(&self) -> String {
        format!("{}_{}", self.machine_id, self.project_name)
    }

    /// Directory of this collection below the collections root.
    ///
    /// Both parts are hashed, so any identifier maps to a safe, fixed-length
    /// path and distinct machines never share a directory.
    pub fn relative_dir(&self) -> PathBuf {
        PathBuf::from(short_digest(&self.machine_id)).join(short_digest(&self.project_name))
    }
}

fn short_digest(value: &str) -> String {
    let digest = format!("{:x}", Sha256::digest(value.as_bytes()));
    digest[..16].to_string()
}

/// Points a collection at its active generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub machine_id: String,
    pub project_name: String,
    pub generation: String,
    pub dimensions: usize,
    pub model: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Manifest {
    pub fn key(&self) -> CollectionKey {
        CollectionKey::new(&self.machine_id, &self.project_name)
    }

    /// Read the manifest of `key` under `root`
    pub fn load(root: &Path, key: &CollectionKey) -> Result<Self, StoreError> {
        let path = root.join(key.relative_dir()).join(MANIFEST_FILE);
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StoreError::NotFound(key.name())),
            Err(e) => Err(e.into()),
        }
    }

    /// Write next to the target, then rename over it
    fn save(&self, dir: &Path) -> Result<(), StoreError> {
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    /// All manifests under `root`, sorted by name
    pub fn scan(root: &Path) -> Result<Vec<Self>, StoreError> {
        let mut manifests = Vec::new();
        let machines = match fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(manifests),
            Err(e) => return Err(e.into()),
        };

        for machine in machines {
            let machine = machine?;
            if !machine.file_type()?.is_dir() {
                continue;
            }
            for project in fs::read_dir(machine.path())? {
                let path = project?.path().join(MANIFEST_FILE);
                match fs::read(&path) {
                    Ok(bytes) => match serde_json::from_slice::<Manifest>(&bytes) {
                        Ok(manifest) => manifests.push(manifest),
                        Err(e) => warn!("Skipping unreadable manifest {}: {}", path.display(), e),
                    },
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        manifests.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(manifests)
    }
}

/// A generation being built off to the side
pub struct StagedCollection {
    key: CollectionKey,
    generation: String,
    collection: Arc<Collection>,
}

impl StagedCollection {
    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }

    pub fn key(&self) -> &CollectionKey {
        &self.key
    }
}

/// Durable project collections under one root directory.
///
/// Each collection directory holds `manifest.json` and one LMDB environment
/// per generation. Opened generations are cached so every environment is
/// opened once per process.
pub struct CollectionStore {
    root: PathBuf,
    dimensions: usize,
    model: String,
    map_size_mb: usize,
    open: DashMap<CollectionKey, (String, Arc<Collection>)>,
    locks: DashMap<CollectionKey, Arc<Mutex<()>>>,
}

impl CollectionStore {
    pub fn new(root: impl Into<PathBuf>, dimensions: usize, model: impl Into<String>, map_size_mb: usize) -> Self {
        Self {
            root: root.into(),
            dimensions,
            model: model.into(),
            map_size_mb,
            open: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn dir(&self, key: &CollectionKey) -> PathBuf {
        self.root.join(key.relative_dir())
    }

    /// Lock serialising writers of one collection.
    ///
    /// Hold it across `open_or_create`, `stage`/`commit` and writes.
    pub fn write_lock(&self, key: &CollectionKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub fn manifest(&self, key: &CollectionKey) -> Result<Manifest, StoreError> {
        Manifest::load(&self.root, key)
    }

    /// Open an existing collection.
    ///
    /// A concurrent commit or delete can remove the generation named by the
    /// manifest just read; the manifest is then re-read instead of recreating
    /// the directory.
    pub fn open(&self, key: &CollectionKey) -> Result<Arc<Collection>, StoreError> {
        for _ in 0..OPEN_ATTEMPTS {
            let manifest = self.manifest(key)?;
            if manifest.dimensions != self.dimensions {
                return Err(StoreError::DimensionMismatch {
                    name: manifest.name,
                    expected: manifest.dimensions,
                    actual: self.dimensions,
                });
            }

            if let Some(entry) = self.open.get(key) {
                if entry.0 == manifest.generation {
                    return Ok(entry.1.clone());
                }
            }

            let collection = match self.open_generation(key, &manifest.generation) {
                Ok(collection) => collection,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            };

            // only cache what is still active
            if self.manifest(key)?.generation != manifest.generation {
                collection.close();
                continue;
            }

            if let Some((generation, stale)) = self.open.insert(key.clone(), (manifest.generation.clone(), collection.clone())) {
                if generation != manifest.generation {
                    stale.close();
                }
            }
            return Ok(collection);
        }

        Err(StoreError::NotFound(key.name()))
    }

    /// Open a collection, creating an empty one if absent
    pub fn open_or_create(&self, key: &CollectionKey) -> Result<Arc<Collection>, StoreError> {
        match self.open(key) {
            Err(StoreError::NotFound(_)) => {
                info!("Creating collection {}", key.name());
                let staged = self.stage(key)?;
                let collection = staged.collection.clone();
                self.commit(staged)?;
                Ok(collection)
            }
            other => other,
        }
    }

    /// Delete a collection and all its generations. Absence is not an error.
    ///
    /// Returns whether anything was removed.
    pub fn delete(&self, key: &CollectionKey) -> Result<bool, StoreError> {
        if let Some((_, (_, collection))) = self.open.remove(key) {
            collection.close();
        }
        // keep the lock while a writer still holds it
        self.locks.remove_if(key, |_, lock| Arc::strong_count(lock) == 1);

        let dir = self.dir(key);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Deleted collection {}", key.name());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Create a fresh, empty generation that is not yet visible
    pub fn stage(&self, key: &CollectionKey) -> Result<StagedCollection, StoreError> {
        let generation = format!("{}{}", GENERATION_PREFIX, Uuid::new_v4().simple());
        let path = self.dir(key).join(&generation);

        let collection = match Collection::create(&path, &key.name(), self.dimensions, self.map_size_mb) {
            Ok(collection) => Arc::new(collection),
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&path) {
                    if cleanup.kind() != ErrorKind::NotFound {
                        warn!("Failed to remove unusable generation {}: {}", generation, cleanup);
                    }
                }
                return Err(e);
            }
        };
        debug!("Staged generation {} for {}", generation, key.name());

        Ok(StagedCollection {
            key: key.clone(),
            generation,
            collection,
        })
    }

    /// Make a staged generation the active one and drop the previous one
    pub fn commit(&self, staged: StagedCollection) -> Result<(), StoreError> {
        let StagedCollection {
            key,
            generation,
            collection,
        } = staged;
        let dir = self.dir(&key);

        let previous = match self.manifest(&key) {
            Ok(manifest) => Some(manifest),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        let now = Utc::now();
        let manifest = Manifest {
            name: key.name(),
            machine_id: key.machine_id.clone(),
            project_name: key.project_name.clone(),
            generation: generation.clone(),
            dimensions: self.dimensions,
            model: self.model.clone(),
            created_at: previous.as_ref().map(|m| m.created_at).unwrap_or(now),
            updated_at: now,
        };
        manifest.save(&dir)?;

        if let Some((old, superseded)) = self.open.insert(key.clone(), (generation.clone(), collection)) {
            // a reader may have cached this same generation already
            if old != generation {
                superseded.close();
            }
        }

        self.remove_stale_generations(&dir, &generation);
        debug!("Committed generation {} for {}", generation, key.name());
        Ok(())
    }

    /// Throw away a staged generation; the active one is untouched
    pub fn discard(&self, staged: StagedCollection) -> Result<(), StoreError> {
        let path = staged.collection.path().to_path_buf();
        staged.collection.close();
        drop(staged);
        match fs::remove_dir_all(&path) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Manifests of every collection under this root
    pub fn list(&self) -> Result<Vec<Manifest>, StoreError> {
        Manifest::scan(&self.root)
    }

    fn open_generation(&self, key: &CollectionKey, generation: &str) -> Result<Arc<Collection>, StoreError> {
        let path = self.dir(key).join(generation);
        Ok(Arc::new(Collection::open(
            &path,
            &key.name(),
            self.dimensions,
            self.map_size_mb,
        )?))
    }

    /// Old generations are garbage once the manifest moved on. Open handles
    /// keep their mapping until dropped.
    fn remove_stale_generations(&self, dir: &Path, active: &str) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(GENERATION_PREFIX) && name != active {
                if let Err(e) = fs::remove_dir_all(entry.path()) {
                    warn!("Failed to remove stale generation {}: {}", name, e);
                }
            }
        }
    }
}
