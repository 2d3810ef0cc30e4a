use std::collections::VecDeque;
use tracing::debug;

/// Separators tried in order: paragraph, line, word, character.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Bounded recursive text splitter.
///
/// Produces pieces of at most `chunk_size` characters, preferring paragraph,
/// then line, then word boundaries before falling back to single characters.
/// Consecutive pieces share up to `chunk_overlap` characters. Sizes count
/// Unicode scalar values, never bytes, so slicing stays on char boundaries.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into trimmed, non-empty pieces in document order.
    pub fn split(&self, text: &str) -> Vec<String> {
        self.split_with(text, &SEPARATORS)
    }

    fn split_with(&self, text: &str, separators: &[&str]) -> Vec<String> {
        let mut separator = separators.last().copied().unwrap_or("");
        let mut finer: &[&str] = &[];
        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = candidate;
                break;
            }
            if text.contains(candidate) {
                separator = candidate;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut pieces = Vec::new();
        let mut small: Vec<&str> = Vec::new();

        for part in split_keeping_separator(text, separator) {
            if char_len(part) < self.chunk_size {
                small.push(part);
                continue;
            }

            if !small.is_empty() {
                pieces.extend(self.merge(&small));
                small.clear();
            }

            if finer.is_empty() {
                pieces.push(part.to_string());
            } else {
                pieces.extend(self.split_with(part, finer));
            }
        }

        if !small.is_empty() {
            pieces.extend(self.merge(&small));
        }

        pieces
    }

    /// Greedily merge small parts into pieces of at most `chunk_size`,
    /// carrying a tail of at most `chunk_overlap` characters forward.
    fn merge(&self, parts: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for part in parts {
            let len = char_len(part);

            if total + len > self.chunk_size && !current.is_empty() {
                if total > self.chunk_size {
                    debug!(
                        "Created a piece of {} chars, longer than the limit of {}",
                        total, self.chunk_size
                    );
                }

                if let Some(piece) = join_trimmed(&current) {
                    merged.push(piece);
                }

                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    match current.pop_front() {
                        Some(dropped) => total -= char_len(dropped),
                        None => break,
                    }
                }
            }

            current.push_back(part);
            total += len;
        }

        if let Some(piece) = join_trimmed(&current) {
            merged.push(piece);
        }

        merged
    }
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self::new(super::DEFAULT_CHUNK_CHARS, super::DEFAULT_CHUNK_OVERLAP)
    }
}

/// Split on `separator`, attaching each separator to the start of the part
/// that follows it. An empty separator splits into single characters.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut parts = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            parts.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        parts.push(&text[start..]);
    }

    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

fn join_trimmed(parts: &VecDeque<&str>) -> Option<String> {
    let joined: String = parts.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
