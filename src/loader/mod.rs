// Document loading module
// Turns department folders of mixed-format files into tagged, chunked documents


pub mod department;
pub mod readers;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::embeddings::chunking::{ChunkingConfig, TextSplitter};

pub use department::{DepartmentTagger, UNKNOWN_DEPARTMENT, capitalize, department_from_path};

/// Extensions that have a reader, lowercase and without the leading dot
pub const SUPPORTED_EXTENSIONS: [&str; 5] = ["pdf", "md", "markdown", "txt", "csv"];

/// Source format of a document, chosen from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Markdown,
    Text,
    Pdf,
    Csv,
}

impl SourceFormat {
    /// Format for a path, matching the extension case-insensitively
    #[inline]
    pub fn from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let extension = path.as_ref().extension()?.to_str()?.to_lowercase();
        Self::from_extension(&extension)
    }

    #[inline]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "md" | "markdown" => Some(Self::Markdown),
            "txt" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Pdf => "pdf",
            Self::Csv => "csv",
        }
    }

    #[inline]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "markdown" => Some(Self::Markdown),
            "text" => Some(Self::Text),
            "pdf" => Some(Self::Pdf),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }

    /// CSV rows are already chunk-sized and skip the splitter
    #[inline]
    pub const fn is_pre_chunked(self) -> bool {
        matches!(self, Self::Csv)
    }
}

impl fmt::Display for SourceFormat {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata carried by every document and chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Path of the file the document was read from
    pub source: PathBuf,
    pub format: SourceFormat,
    /// Capitalized department derived from the source path
    pub department: String,
    /// Record index for CSV documents
    pub row: Option<usize>,
    /// Position of the chunk within its source once split
    pub chunk_index: Option<usize>,
}

impl DocumentMetadata {
    #[inline]
    pub fn new<P: AsRef<Path>>(source: P, format: SourceFormat, department: &str) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            format,
            department: department.to_string(),
            row: None,
            chunk_index: None,
        }
    }

    /// Whether the department tag matches `department`, ignoring case
    #[inline]
    pub fn belongs_to(&self, department: &str) -> bool {
        self.department.to_lowercase() == department.to_lowercase()
    }
}

/// A unit of source text with its metadata; chunks are documents too
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    #[inline]
    pub const fn new(text: String, metadata: DocumentMetadata) -> Self {
        Self { text, metadata }
    }
}

/// Load files and split them into chunks, tagging departments by the `data` folder.
///
/// See [`load_and_split_with`].
#[inline]
pub fn load_and_split<P: AsRef<Path>>(
    file_paths: &[P],
    config: &ChunkingConfig,
) -> Result<Vec<Document>> {
    load_and_split_with(file_paths, config, &DepartmentTagger::default())
}

/// Load files with their format reader, tag each document, and chunk them.
///
/// Unsupported extensions are skipped with a warning. Non-CSV documents are
/// split into overlapping chunks and come first, in input order; CSV rows
/// follow unsplit. A reader failure aborts the whole batch.
///
/// # Arguments
///
/// * `file_paths` - Files to load, in the order their chunks should appear
/// * `config` - Chunk size and overlap for non-CSV documents
/// * `tagger` - Derives each document's department from its path
///
/// # Returns
///
/// The chunks of every supported file, or the first reader error
#[inline]
pub fn load_and_split_with<P: AsRef<Path>>(
    file_paths: &[P],
    config: &ChunkingConfig,
    tagger: &DepartmentTagger,
) -> Result<Vec<Document>> {
    let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap)?;

    let mut text_documents = Vec::new();
    let mut row_documents = Vec::new();

    for path in file_paths {
        let path = path.as_ref();
        let Some(format) = SourceFormat::from_path(path) else {
            let extension = path
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
                .unwrap_or_default();
            warn!(
                "Unsupported file type '{}' for '{}'",
                extension,
                path.display()
            );
            continue;
        };

        let department = tagger.tag(path);
        let documents = readers::read_documents(path, format, &department)?;

        if format.is_pre_chunked() {
            row_documents.extend(documents);
        } else {
            text_documents.extend(documents);
        }
    }

    let mut chunks = splitter.split_documents(&text_documents);
    debug!(
        "Split {} text document(s) into {} chunk(s), plus {} row document(s)",
        text_documents.len(),
        chunks.len(),
        row_documents.len()
    );

    chunks.extend(row_documents);
    Ok(chunks)
}
