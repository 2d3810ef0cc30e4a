use super::WalkedFile;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

/// Content fingerprints of the files sent by the last successful upload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub files: BTreeMap<String, String>,
}

/// What changed between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotDiff {
    /// New or modified paths
    pub changed: Vec<String>,
    /// Paths that disappeared
    pub deleted: Vec<String>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.deleted.is_empty()
    }
}

impl Snapshot {
    pub fn from_files(files: &[WalkedFile]) -> Self {
        Self {
            files: files
                .iter()
                .map(|f| (f.path.clone(), f.fingerprint.clone()))
                .collect(),
        }
    }

    /// Load a snapshot; a missing file is an empty snapshot
    pub fn load(path: &Path) -> Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .with_context(|| format!("Corrupt snapshot {}", path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("Failed to read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Changes needed to go from `self` to `current`
    pub fn diff(&self, current: &Snapshot) -> SnapshotDiff {
        let changed = current
            .files
            .iter()
            .filter(|(path, fingerprint)| self.files.get(*path) != Some(*fingerprint))
            .map(|(path, _)| path.clone())
            .collect();
        let deleted = self
            .files
            .keys()
            .filter(|path| !current.files.contains_key(*path))
            .cloned()
            .collect();

        SnapshotDiff { changed, deleted }
    }
}
