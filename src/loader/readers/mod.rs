
use anyhow::{Context, Result, anyhow};
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd};
use std::fs;
use std::path::Path;
use tracing::debug;

use super::{Document, DocumentMetadata, SourceFormat};

/// Read a file into documents using the reader for `format`
#[inline]
pub fn read_documents(path: &Path, format: SourceFormat, department: &str) -> Result<Vec<Document>> {
    let documents = match format {
        SourceFormat::Markdown => vec![read_markdown(path, department)?],
        SourceFormat::Text => vec![read_text(path, department)?],
        SourceFormat::Pdf => vec![read_pdf(path, department)?],
        SourceFormat::Csv => read_csv(path, department)?,
    };

    debug!(
        "Read {} document(s) from {} ({:?})",
        documents.len(),
        path.display(),
        format
    );
    Ok(documents)
}

/// Markdown file rendered to plain text, one document per file
#[inline]
pub fn read_markdown(path: &Path, department: &str) -> Result<Document> {
    let source = fs::read_to_string(path)
        .with_context(|| format!("Failed to read markdown file: {}", path.display()))?;

    Ok(Document::new(
        markdown_to_text(&source),
        DocumentMetadata::new(path, SourceFormat::Markdown, department),
    ))
}

#[inline]
pub fn read_text(path: &Path, department: &str) -> Result<Document> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read text file: {}", path.display()))?;

    Ok(Document::new(
        text,
        DocumentMetadata::new(path, SourceFormat::Text, department),
    ))
}

/// Text of every page of a PDF, one document per file
#[inline]
pub fn read_pdf(path: &Path, department: &str) -> Result<Document> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| anyhow!("Failed to extract text from PDF {}: {}", path.display(), e))?;

    Ok(Document::new(
        text,
        DocumentMetadata::new(path, SourceFormat::Pdf, department),
    ))
}

/// One document per CSV record, rendered as `header: value` lines
#[inline]
pub fn read_csv(path: &Path, department: &str) -> Result<Vec<Document>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header: {}", path.display()))?
        .clone();

    let mut documents = Vec::new();
    for (row, record) in reader.records().enumerate() {
        let record = record
            .with_context(|| format!("Malformed CSV record {} in {}", row, path.display()))?;

        let text = headers
            .iter()
            .zip(record.iter())
            .map(|(header, value)| format!("{}: {}", header.trim(), value.trim()))
            .collect::<Vec<_>>()
            .join("\n");

        let mut metadata = DocumentMetadata::new(path, SourceFormat::Csv, department);
        metadata.row = Some(row);
        documents.push(Document::new(text, metadata));
    }

    Ok(documents)
}

/// Render markdown to plain text with one blank line between blocks
#[inline]
pub fn markdown_to_text(source: &str) -> String {
    let mut blocks = Vec::new();
    let mut current = String::new();

    let options = Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
    for event in Parser::new_ext(source, options) {
        match event {
            Event::Text(text) | Event::Code(text) => current.push_str(&text),
            Event::SoftBreak => current.push(' '),
            Event::HardBreak => current.push('\n'),
            Event::Start(Tag::Item) => flush_block(&mut blocks, &mut current),
            Event::End(TagEnd::TableCell) => current.push(' '),
            Event::End(
                TagEnd::Paragraph
                | TagEnd::Heading(_)
                | TagEnd::CodeBlock
                | TagEnd::Item
                | TagEnd::TableHead
                | TagEnd::TableRow,
            ) => flush_block(&mut blocks, &mut current),
            _ => {}
        }
    }
    flush_block(&mut blocks, &mut current);

    blocks.join("\n\n")
}

fn flush_block(blocks: &mut Vec<String>, current: &mut String) {
    let block = current.trim();
    if !block.is_empty() {
        blocks.push(block.to_string());
    }
    current.clear();
}
