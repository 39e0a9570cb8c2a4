// LanceDB vector database module
// Handles vector storage and similarity search for department chunks


pub mod vector_store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::loader::Document;

pub use vector_store::{DepartmentIndex, IndexStore, SearchHit};

/// Embedded chunk ready to be written to a department table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Unique identifier for this row
    pub id: String,
    pub vector: Vec<f32>,
    /// The chunk text and its metadata
    pub document: Document,
}

impl ChunkRecord {
    #[inline]
    pub fn new(vector: Vec<f32>, document: Document) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            vector,
            document,
        }
    }
}

/// Name shared by every table of a department, `dept_<slug>`
#[inline]
pub fn table_name(department: &str) -> String {
    let slug: String = department
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("dept_{}", slug)
}

/// Table holding one build of a department, `dept_<slug>-<timestamp>-<id>`.
///
/// Slugs never contain `-`, so the prefix identifies the department, and the
/// names of one department sort in build order.
#[inline]
pub fn generation_table_name(department: &str, built_at: &DateTime<Utc>) -> String {
    format!(
        "{}-{}-{}",
        table_name(department),
        built_at.format("%Y%m%d%H%M%S%6f"),
        Uuid::new_v4().simple()
    )
}

/// Whether `table` holds a build of `department`
#[inline]
pub fn is_generation_of(table: &str, department: &str) -> bool {
    table
        .strip_prefix(&table_name(department))
        .is_some_and(|rest| rest.starts_with('-'))
}
