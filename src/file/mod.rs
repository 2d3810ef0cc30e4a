//! Local folder discovery for `semdex index`.

use anyhow::Result;
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

mod snapshot;

pub use snapshot::{Snapshot, SnapshotDiff};

/// A readable text file below the walk root
#[derive(Debug, Clone)]
pub struct WalkedFile {
    /// Path relative to the root, `/`-separated
    pub path: String,
    pub content: String,
    /// SHA-256 of the content
    pub fingerprint: String,
}

/// Statistics about walked files
#[derive(Debug, Default, Clone)]
pub struct WalkStats {
    pub total_files: usize,
    pub indexable_files: usize,
    pub skipped_binary: usize,
    pub skipped_large: usize,
    pub total_size_bytes: u64,
}

impl WalkStats {
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Gitignore-aware walker yielding UTF-8 text files
pub struct FileWalker {
    root: PathBuf,
    respect_gitignore: bool,
    include_hidden: bool,
    max_file_size: u64,
}

impl FileWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 1024 * 1024,
        }
    }

    /// Set whether to respect .gitignore files (default: true)
    pub fn respect_gitignore(mut self, respect: bool) -> Self {
        self.respect_gitignore = respect;
        self
    }

    /// Set whether to include hidden files (default: false)
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Skip files larger than `bytes`
    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.max_file_size = bytes;
        self
    }

    /// Walk the root, reading every indexable file. Output is sorted by path.
    pub fn walk(&self) -> Result<(Vec<WalkedFile>, WalkStats)> {
        let mut files = Vec::new();
        let mut stats = WalkStats::default();

        debug!("Starting file walk in: {}", self.root.display());

        let mut builder = WalkBuilder::new(&self.root);
        builder
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .require_git(false)
            .hidden(!self.include_hidden)
            .add_custom_ignore_filename(".semdexignore");

        for result in builder.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Error walking file: {}", err);
                    continue;
                }
            };

            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            stats.total_files += 1;

            let path = entry.path();
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            if is_in_excluded_dir(relative) || has_binary_extension(path) {
                stats.skipped_binary += 1;
                continue;
            }

            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.max_file_size {
                debug!("Skipping large file: {} ({} bytes)", path.display(), size);
                stats.skipped_large += 1;
                continue;
            }

            let Some(content) = read_text(path) else {
                debug!("Skipping binary file: {}", path.display());
                stats.skipped_binary += 1;
                continue;
            };

            stats.indexable_files += 1;
            stats.total_size_bytes += size;
            files.push(WalkedFile {
                path: relative_path(relative),
                fingerprint: format!("{:x}", Sha256::digest(content.as_bytes())),
                content,
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok((files, stats))
    }
}

fn relative_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// File contents when they look like text
fn read_text(path: &Path) -> Option<String> {
    let bytes = std::fs::read(path).ok()?;
    if bytes.contains(&0) {
        return None;
    }
    String::from_utf8(bytes).ok()
}

/// Vendor, build and tool directories never worth indexing
fn is_in_excluded_dir(path: &Path) -> bool {
    path.components().any(|c| {
        matches!(
            c.as_os_str().to_str().unwrap_or(""),
            "node_modules" | "target" | "dist" | "build" | "out"
                | ".git" | ".svn" | ".hg"
                | "__pycache__" | ".pytest_cache" | ".tox" | "venv" | ".venv"
                | "vendor" | ".bundle" | ".gradle" | ".idea" | ".vscode"
                | "coverage" | ".cache"
                | "chroma_db"
        )
    })
}

fn has_binary_extension(path: &Path) -> bool {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return false;
    };
    matches!(
        ext.to_lowercase().as_str(),
        "exe" | "dll" | "so" | "dylib" | "a" | "o" | "lib" | "bin"
            | "zip" | "tar" | "gz" | "bz2" | "xz" | "7z" | "rar" | "tgz"
            | "png" | "jpg" | "jpeg" | "gif" | "bmp" | "ico" | "webp"
            | "mp4" | "mov" | "mkv" | "webm" | "mp3" | "wav" | "ogg" | "flac"
            | "pdf" | "doc" | "docx" | "xls" | "xlsx" | "ppt" | "pptx"
            | "wasm" | "pyc" | "class" | "jar" | "lock"
            | "sqlite" | "db" | "mdb"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn paths(files: &[WalkedFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_file_walker_basic() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src").join("main.rs"), "fn main() {}").unwrap();
        fs::write(dir.path().join("test.py"), "print('hello')").unwrap();
        fs::write(dir.path().join("README.md"), "# Test").unwrap();

        let (files, stats) = FileWalker::new(dir.path()).walk().unwrap();

        assert_eq!(paths(&files), vec!["README.md", "src/main.rs", "test.py"]);
        assert_eq!(stats.indexable_files, 3);
        assert_eq!(files[2].content, "print('hello')");
        assert_eq!(files[2].fingerprint.len(), 64);
    }

    #[test]
    fn test_skip_binary_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("test.txt"), "hello world").unwrap();
        fs::write(dir.path().join("data.dat"), [0u8, 1, 2, 3, 255]).unwrap();
        fs::write(dir.path().join("latin1.txt"), [0x63u8, 0x61, 0x66, 0xE9]).unwrap();
        fs::write(dir.path().join("logo.png"), "not really a png").unwrap();

        let (files, stats) = FileWalker::new(dir.path()).walk().unwrap();

        assert_eq!(paths(&files), vec!["test.txt"]);
        assert_eq!(stats.skipped_binary, 3);
    }

    #[test]
    fn test_excluded_directories() {
        let dir = TempDir::new().unwrap();
        let node_modules = dir.path().join("node_modules");
        fs::create_dir(&node_modules).unwrap();
        fs::write(node_modules.join("package.js"), "test").unwrap();
        fs::write(dir.path().join("index.js"), "test").unwrap();

        let (files, _) = FileWalker::new(dir.path()).walk().unwrap();
        assert_eq!(paths(&files), vec!["index.js"]);
    }

    #[test]
    fn test_gitignore_respected_without_repo() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".gitignore"), "secret.txt\n").unwrap();
        fs::write(dir.path().join("secret.txt"), "token").unwrap();
        fs::write(dir.path().join("app.py"), "x = 1").unwrap();

        let (files, _) = FileWalker::new(dir.path()).walk().unwrap();
        assert_eq!(paths(&files), vec!["app.py"]);
    }

    #[test]
    fn test_large_files_skipped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("big.txt"), "x".repeat(2048)).unwrap();
        fs::write(dir.path().join("small.txt"), "x").unwrap();

        let (files, stats) = FileWalker::new(dir.path()).max_file_size(1024).walk().unwrap();
        assert_eq!(paths(&files), vec!["small.txt"]);
        assert_eq!(stats.skipped_large, 1);
    }
}
