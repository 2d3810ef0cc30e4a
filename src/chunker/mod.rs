use sha2::{Digest, Sha256};

mod splitter;

pub use splitter::TextSplitter;

/// Lines per window
pub const DEFAULT_WINDOW_LINES: usize = 20;

/// Maximum chunk size in characters
pub const DEFAULT_CHUNK_CHARS: usize = 500;

/// Overlap between consecutive chunks of one window, in characters
pub const DEFAULT_CHUNK_OVERLAP: usize = 150;

/// Represents a chunk of a source file with positional metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// The actual content of the chunk
    pub content: String,

    /// File path this chunk belongs to (relative, as uploaded)
    pub path: String,

    /// 1-based line where the enclosing window starts
    pub line_start: usize,

    /// Content hash (embedding cache key and content fingerprint)
    pub hash: String,
}

impl Chunk {
    pub fn new(content: String, path: String, line_start: usize) -> Self {
        let hash = Self::compute_hash(&content);
        Self {
            content,
            path,
            line_start,
            hash,
        }
    }

    /// Compute SHA-256 hash of content
    pub fn compute_hash(content: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Size of this chunk in characters
    pub fn char_len(&self) -> usize {
        self.content.chars().count()
    }
}

/// Splits file content into fixed line windows, then splits every window
/// with a bounded recursive splitter.
///
/// Line positions are window-granular: every chunk cut from a window carries
/// the window's first line.
#[derive(Debug, Clone)]
pub struct LineWindowChunker {
    window_lines: usize,
    splitter: TextSplitter,
}

impl LineWindowChunker {
    pub fn new(window_lines: usize, chunk_chars: usize, chunk_overlap: usize) -> Self {
        Self {
            window_lines: window_lines.max(1),
            splitter: TextSplitter::new(chunk_chars, chunk_overlap),
        }
    }

    /// Iterate `(line_start, block)` windows of `content`.
    pub fn windows<'a>(&self, content: &'a str) -> Windows<'a> {
        Windows {
            lines: content.lines(),
            window_lines: self.window_lines,
            next_line: 1,
        }
    }

    /// Lazily chunk one file. Calling this again restarts from the top.
    pub fn chunk<'a>(&'a self, path: &'a str, content: &'a str) -> impl Iterator<Item = Chunk> + 'a {
        self.windows(content).flat_map(move |(line_start, block)| {
            self.splitter
                .split(&block)
                .into_iter()
                .map(move |text| Chunk::new(text, path.to_string(), line_start))
        })
    }

    /// Chunk one file eagerly.
    pub fn chunk_file(&self, path: &str, content: &str) -> Vec<Chunk> {
        self.chunk(path, content).collect()
    }
}

impl Default for LineWindowChunker {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_LINES, DEFAULT_CHUNK_CHARS, DEFAULT_CHUNK_OVERLAP)
    }
}

/// Consecutive, non-overlapping line windows of a text.
pub struct Windows<'a> {
    lines: std::str::Lines<'a>,
    window_lines: usize,
    next_line: usize,
}

impl Iterator for Windows<'_> {
    type Item = (usize, String);

    fn next(&mut self) -> Option<Self::Item> {
        let window: Vec<&str> = self.lines.by_ref().take(self.window_lines).collect();
        if window.is_empty() {
            return None;
        }

        let line_start = self.next_line;
        self.next_line += window.len();
        Some((line_start, window.join("\n")))
    }
}
