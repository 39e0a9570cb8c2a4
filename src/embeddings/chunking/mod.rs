
use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::loader::Document;

/// Separators tried in order, from paragraph breaks down to single characters
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Configuration for text chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared between consecutive chunks of the same source
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// Recursive character splitter.
///
/// Text is cut on the coarsest separator it contains, the pieces are greedily
/// merged back into windows of at most `chunk_size` characters, and oversized
/// pieces are cut again with the finer separators. Each window starts with up
/// to `chunk_overlap` characters carried over from the previous one.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
    keep_separator: bool,
    strip_whitespace: bool,
}

impl TextSplitter {
    #[inline]
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("Chunk size must be greater than 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "Chunk overlap ({}) must be smaller than chunk size ({})",
                chunk_overlap,
                chunk_size
            );
        }

        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(ToString::to_string).collect(),
            keep_separator: true,
            strip_whitespace: true,
        })
    }

    #[inline]
    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    #[inline]
    #[must_use]
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    #[inline]
    #[must_use]
    pub const fn with_keep_separator(mut self, keep_separator: bool) -> Self {
        self.keep_separator = keep_separator;
        self
    }

    #[inline]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    #[inline]
    pub const fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into trimmed, non-empty chunks
    #[inline]
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split every document, copying its metadata onto each chunk
    #[inline]
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut chunks = Vec::new();

        for document in documents {
            let pieces = self.split_text(&document.text);
            debug!(
                "Split {} into {} chunk(s)",
                document.metadata.source.display(),
                pieces.len()
            );

            for (chunk_index, text) in pieces.into_iter().enumerate() {
                let mut metadata = document.metadata.clone();
                metadata.chunk_index = Some(chunk_index);
                chunks.push(Document::new(text, metadata));
            }
        }

        chunks
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map_or("", String::as_str);
        let mut finer: &[String] = &[];

        for (i, candidate) in separators.iter().enumerate() {
            if candidate.is_empty() {
                separator = "";
                break;
            }
            if text.contains(candidate.as_str()) {
                separator = candidate.as_str();
                finer = &separators[i + 1..];
                break;
            }
        }

        let splits = split_on(text, separator, self.keep_separator);
        let merge_separator = if self.keep_separator { "" } else { separator };

        let mut final_chunks = Vec::new();
        let mut good_splits: Vec<String> = Vec::new();

        for split in splits {
            if char_len(&split) < self.chunk_size {
                good_splits.push(split);
                continue;
            }

            if !good_splits.is_empty() {
                final_chunks.extend(self.merge_splits(&good_splits, merge_separator));
                good_splits.clear();
            }

            if finer.is_empty() {
                final_chunks.push(split);
            } else {
                final_chunks.extend(self.split_recursive(&split, finer));
            }
        }

        if !good_splits.is_empty() {
            final_chunks.extend(self.merge_splits(&good_splits, merge_separator));
        }

        final_chunks
    }

    fn merge_splits(&self, splits: &[String], separator: &str) -> Vec<String> {
        let separator_len = char_len(separator);
        let joiner_len = |current: &[&str]| if current.is_empty() { 0 } else { separator_len };
        let mut docs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0;

        for split in splits {
            let len = char_len(split);

            if total + len + joiner_len(&current) > self.chunk_size {
                if total > self.chunk_size {
                    warn!(
                        "Created a chunk of size {}, which is longer than the specified {}",
                        total, self.chunk_size
                    );
                }

                if !current.is_empty() {
                    if let Some(doc) = self.join_docs(&current, separator) {
                        docs.push(doc);
                    }

                    while total > self.chunk_overlap
                        || (total > 0 && total + len + joiner_len(&current) > self.chunk_size)
                    {
                        let Some(first) = current.first() else {
                            break;
                        };
                        let dropped = char_len(first) + if current.len() > 1 { separator_len } else { 0 };
                        total -= dropped;
                        current.remove(0);
                    }
                }
            }

            current.push(split.as_str());
            total += len + if current.len() > 1 { separator_len } else { 0 };
        }

        if let Some(doc) = self.join_docs(&current, separator) {
            docs.push(doc);
        }

        docs
    }

    fn join_docs(&self, docs: &[&str], separator: &str) -> Option<String> {
        let joined = docs.join(separator);
        let text = if self.strip_whitespace {
            joined.trim().to_string()
        } else {
            joined
        };

        (!text.is_empty()).then_some(text)
    }
}

/// Split on `separator`, keeping it at the start of each following piece
fn split_on(text: &str, separator: &str, keep_separator: bool) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = text.split(separator);
    let mut splits = Vec::new();

    if keep_separator {
        if let Some(first) = pieces.next() {
            splits.push(first.to_string());
        }
        splits.extend(pieces.map(|piece| format!("{}{}", separator, piece)));
    } else {
        splits.extend(pieces.map(ToString::to_string));
    }

    splits.retain(|s| !s.is_empty());
    splits
}

#[inline]
fn char_len(text: &str) -> usize {
    text.chars().count()
}
