#[cfg(test)]
mod tests;

use super::{ChunkRecord, generation_table_name, is_generation_of};
use crate::AssistantError;
use crate::loader::{Document, DocumentMetadata, SourceFormat};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray, UInt32Array,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase, Select},
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Opens and builds department tables in one LanceDB directory
pub struct IndexStore {
    connection: Connection,
    path: PathBuf,
}

/// Similarity-searchable chunks of exactly one department
#[derive(Clone)]
pub struct DepartmentIndex {
    table: Table,
    table_name: String,
    department: String,
    chunk_count: usize,
    dimension: usize,
    built_at: DateTime<Utc>,
}

/// One chunk returned by a similarity search
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document: Document,
    pub distance: f32,
    /// `1 - distance`, higher is more similar
    pub score: f32,
}

impl IndexStore {
    /// Connect to the LanceDB directory at `db_path`, creating it if needed
    ///
    /// # Arguments
    ///
    /// * `db_path` - Directory holding the department tables
    ///
    /// # Returns
    ///
    /// A connected store; a corrupted directory is moved aside and recreated
    #[inline]
    pub async fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, AssistantError> {
        let db_path = db_path.as_ref().to_path_buf();
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(&db_path).map_err(|e| {
            AssistantError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", db_path.display());

        let connection = match lancedb::connect(&uri).execute().await {
            Ok(conn) => conn,
            Err(e) => {
                error!("Failed to connect to LanceDB: {}", e);

                let error_msg = e.to_string().to_lowercase();
                if error_msg.contains("corrupt")
                    || error_msg.contains("invalid")
                    || error_msg.contains("malformed")
                {
                    warn!("Database corruption detected, attempting recovery");
                    Self::attempt_corruption_recovery(&db_path)?;

                    lancedb::connect(&uri).execute().await.map_err(|e| {
                        AssistantError::Database(format!(
                            "Failed to connect to LanceDB after recovery: {}",
                            e
                        ))
                    })?
                } else {
                    return Err(AssistantError::Database(format!(
                        "Failed to connect to LanceDB: {}",
                        e
                    )));
                }
            }
        };

        Ok(Self {
            connection,
            path: db_path,
        })
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `records` to a new table for the department and return a handle to it.
    ///
    /// Earlier builds are left in place, so handles to them keep answering
    /// searches; see [`IndexStore::drop_table`] and [`IndexStore::prune_index`].
    ///
    /// # Arguments
    ///
    /// * `department` - Department the records belong to
    /// * `records` - Embedded chunks, all with vectors of the same dimension
    ///
    /// # Returns
    ///
    /// The new index, or an error if `records` is empty or the dimensions disagree
    #[inline]
    pub async fn build_index(
        &self,
        department: &str,
        records: &[ChunkRecord],
    ) -> Result<DepartmentIndex, AssistantError> {
        let first = records.first().ok_or_else(|| {
            AssistantError::Database(format!("No chunks to index for department: {}", department))
        })?;
        let dimension = first.vector.len();
        if dimension == 0 {
            return Err(AssistantError::Embedding(
                "Embedder returned an empty vector".to_string(),
            ));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != dimension) {
            return Err(AssistantError::Embedding(format!(
                "Vector dimension mismatch: expected {}, got {}",
                dimension,
                bad.vector.len()
            )));
        }

        let built_at = Utc::now();
        let name = generation_table_name(department, &built_at);

        let schema = create_schema(dimension);
        self.connection
            .create_empty_table(&name, schema)
            .execute()
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to create table: {}", e)))?;

        let table = match self.fill_table(&name, records, dimension, &built_at).await {
            Ok(table) => table,
            Err(e) => {
                if let Err(cleanup) = self.drop_table(&name).await {
                    warn!("Failed to remove incomplete table {}: {}", name, cleanup);
                }
                return Err(e);
            }
        };

        info!(
            "Indexed {} chunks for department '{}' into table {}",
            records.len(),
            department,
            name
        );

        Ok(DepartmentIndex {
            table,
            table_name: name,
            department: department.to_string(),
            chunk_count: records.len(),
            dimension,
            built_at,
        })
    }

    async fn fill_table(
        &self,
        name: &str,
        records: &[ChunkRecord],
        dimension: usize,
        built_at: &DateTime<Utc>,
    ) -> Result<Table, AssistantError> {
        let table = self
            .connection
            .open_table(name)
            .execute()
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to open table: {}", e)))?;

        let record_batch = create_record_batch(records, dimension, built_at)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to insert chunks: {}", e)))?;

        Ok(table)
    }

    /// Open the most recent build of the department, if there is one
    #[inline]
    pub async fn open_index(
        &self,
        department: &str,
    ) -> Result<Option<DepartmentIndex>, AssistantError> {
        let Some(name) = self.table_generations(department).await?.pop() else {
            return Ok(None);
        };

        let table = self
            .connection
            .open_table(&name)
            .execute()
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to open table: {}", e)))?;

        let dimension = detect_vector_dimension(&table).await?;
        let chunk_count = table
            .count_rows(None)
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to count rows: {}", e)))?;
        if chunk_count == 0 {
            return Ok(None);
        }
        let built_at = read_built_at(&table).await?;

        Ok(Some(DepartmentIndex {
            table,
            table_name: name,
            department: department.to_string(),
            chunk_count,
            dimension,
            built_at,
        }))
    }

    /// Names of the department's tables, oldest build first
    #[inline]
    pub async fn table_generations(&self, department: &str) -> Result<Vec<String>, AssistantError> {
        let mut names: Vec<String> = self
            .list_tables()
            .await?
            .into_iter()
            .filter(|name| is_generation_of(name, department))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Drop every build of the department except the newest; returns how many were dropped.
    ///
    /// Handles to the dropped builds, in this or another process, stop working.
    #[inline]
    pub async fn prune_index(&self, department: &str) -> Result<usize, AssistantError> {
        let mut generations = self.table_generations(department).await?;
        generations.pop();

        for name in &generations {
            self.drop_table(name).await?;
        }
        if !generations.is_empty() {
            info!(
                "Pruned {} superseded table(s) for department '{}'",
                generations.len(),
                department
            );
        }
        Ok(generations.len())
    }

    /// Remove every build of the department; returns whether one existed
    #[inline]
    pub async fn drop_index(&self, department: &str) -> Result<bool, AssistantError> {
        let generations = self.table_generations(department).await?;
        for name in &generations {
            self.drop_table(name).await?;
        }
        Ok(!generations.is_empty())
    }

    /// Remove one table by name; returns whether it existed
    #[inline]
    pub async fn drop_table(&self, name: &str) -> Result<bool, AssistantError> {
        if !self.list_tables().await?.iter().any(|t| t == name) {
            return Ok(false);
        }

        debug!("Dropping table {}", name);
        self.connection
            .drop_table(name)
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to drop table: {}", e)))?;
        Ok(true)
    }

    async fn list_tables(&self) -> Result<Vec<String>, AssistantError> {
        self.connection
            .table_names()
            .execute()
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to list tables: {}", e)))
    }

    fn attempt_corruption_recovery(db_path: &Path) -> Result<(), AssistantError> {
        warn!("Attempting database corruption recovery at {:?}", db_path);

        if db_path.exists() {
            let backup_path = db_path.with_extension("corrupted_backup");
            if let Err(e) = std::fs::rename(db_path, &backup_path) {
                error!("Failed to backup corrupted database: {}", e);
            } else {
                info!("Corrupted database backed up to {:?}", backup_path);
            }
        }

        if db_path.exists() {
            std::fs::remove_dir_all(db_path).map_err(|e| {
                AssistantError::Database(format!("Failed to remove corrupted database: {}", e))
            })?;
        }

        std::fs::create_dir_all(db_path).map_err(|e| {
            AssistantError::Database(format!("Failed to recreate vector database directory: {}", e))
        })?;

        Ok(())
    }
}

impl DepartmentIndex {
    #[inline]
    pub fn department(&self) -> &str {
        &self.department
    }

    /// LanceDB table holding this build
    #[inline]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[inline]
    pub const fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    #[inline]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub const fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    /// The `limit` chunks nearest to `query_vector`, most similar first
    #[inline]
    pub async fn search(
        &self,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<SearchHit>, AssistantError> {
        if query_vector.len() != self.dimension {
            return Err(AssistantError::Embedding(format!(
                "Query vector has dimension {}, index '{}' expects {}",
                query_vector.len(),
                self.department,
                self.dimension
            )));
        }

        debug!(
            "Searching '{}' for {} nearest chunks",
            self.department, limit
        );

        let mut results = self
            .table
            .vector_search(query_vector)
            .map_err(|e| {
                AssistantError::Database(format!("Failed to create vector search: {}", e))
            })?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to execute search: {}", e)))?;

        let mut hits = Vec::new();
        while let Some(batch) = results
            .try_next()
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to read result stream: {}", e)))?
        {
            hits.extend(parse_search_batch(&batch)?);
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        Ok(hits)
    }

    /// Row count as stored in the table
    #[inline]
    pub async fn count_rows(&self) -> Result<usize, AssistantError> {
        self.table
            .count_rows(None)
            .await
            .map_err(|e| AssistantError::Database(format!("Failed to count rows: {}", e)))
    }
}

impl std::fmt::Debug for DepartmentIndex {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepartmentIndex")
            .field("table_name", &self.table_name)
            .field("department", &self.department)
            .field("chunk_count", &self.chunk_count)
            .field("dimension", &self.dimension)
            .field("built_at", &self.built_at)
            .finish_non_exhaustive()
    }
}

fn create_schema(vector_dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, false)),
                vector_dim as i32,
            ),
            false,
        ),
        Field::new("content", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("format", DataType::Utf8, false),
        Field::new("department", DataType::Utf8, false),
        Field::new("row", DataType::UInt32, true),
        Field::new("chunk_index", DataType::UInt32, true),
        Field::new("created_at", DataType::Utf8, false),
    ]))
}

fn create_record_batch(
    records: &[ChunkRecord],
    vector_dim: usize,
    built_at: &DateTime<Utc>,
) -> Result<RecordBatch, AssistantError> {
    let len = records.len();
    let created_at = built_at.to_rfc3339();

    let mut ids = Vec::with_capacity(len);
    let mut flat_values = Vec::with_capacity(len * vector_dim);
    let mut contents = Vec::with_capacity(len);
    let mut sources = Vec::with_capacity(len);
    let mut formats = Vec::with_capacity(len);
    let mut departments = Vec::with_capacity(len);
    let mut rows = Vec::with_capacity(len);
    let mut chunk_indices = Vec::with_capacity(len);

    for record in records {
        let metadata = &record.document.metadata;
        ids.push(record.id.as_str());
        flat_values.extend_from_slice(&record.vector);
        contents.push(record.document.text.as_str());
        sources.push(metadata.source.to_string_lossy().into_owned());
        formats.push(metadata.format.as_str());
        departments.push(metadata.department.as_str());
        rows.push(metadata.row.map(|r| r as u32));
        chunk_indices.push(metadata.chunk_index.map(|i| i as u32));
    }

    let values_array = Float32Array::from(flat_values);
    let field = Arc::new(Field::new("item", DataType::Float32, false));
    let vector_array =
        FixedSizeListArray::try_new(field, vector_dim as i32, Arc::new(values_array), None)
            .map_err(|e| {
                AssistantError::Database(format!("Failed to create vector array: {}", e))
            })?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(StringArray::from(contents)),
        Arc::new(StringArray::from(sources)),
        Arc::new(StringArray::from(formats)),
        Arc::new(StringArray::from(departments)),
        Arc::new(UInt32Array::from(rows)),
        Arc::new(UInt32Array::from(chunk_indices)),
        Arc::new(StringArray::from(vec![created_at.as_str(); len])),
    ];

    RecordBatch::try_new(create_schema(vector_dim), arrays)
        .map_err(|e| AssistantError::Database(format!("Failed to create record batch: {}", e)))
}

async fn detect_vector_dimension(table: &Table) -> Result<usize, AssistantError> {
    let schema = table
        .schema()
        .await
        .map_err(|e| AssistantError::Database(format!("Failed to get table schema: {}", e)))?;

    for field in schema.fields() {
        if field.name() == "vector" {
            if let DataType::FixedSizeList(_, size) = field.data_type() {
                return Ok(*size as usize);
            }
        }
    }

    Err(AssistantError::Database(
        "Could not find vector column or determine dimension".to_string(),
    ))
}

async fn read_built_at(table: &Table) -> Result<DateTime<Utc>, AssistantError> {
    let batches: Vec<RecordBatch> = table
        .query()
        .select(Select::columns(&["created_at"]))
        .limit(1)
        .execute()
        .await
        .map_err(|e| AssistantError::Database(format!("Failed to query table: {}", e)))?
        .try_collect()
        .await
        .map_err(|e| AssistantError::Database(format!("Failed to read result stream: {}", e)))?;

    let value = batches
        .iter()
        .find(|batch| batch.num_rows() > 0)
        .map(|batch| string_column(batch, "created_at").map(|col| col.value(0).to_string()))
        .transpose()?
        .ok_or_else(|| AssistantError::Database("Table has no rows".to_string()))?;

    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AssistantError::Database(format!("Invalid created_at '{}': {}", value, e)))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, AssistantError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| AssistantError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| AssistantError::Database(format!("Invalid {} column type", name)))
}

fn u32_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a UInt32Array, AssistantError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| AssistantError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<UInt32Array>()
        .ok_or_else(|| AssistantError::Database(format!("Invalid {} column type", name)))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<SearchHit>, AssistantError> {
    let contents = string_column(batch, "content")?;
    let sources = string_column(batch, "source")?;
    let formats = string_column(batch, "format")?;
    let departments = string_column(batch, "department")?;
    let rows = u32_column(batch, "row")?;
    let chunk_indices = u32_column(batch, "chunk_index")?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let optional = |array: &UInt32Array, i: usize| {
        (!array.is_null(i)).then(|| array.value(i) as usize)
    };

    let mut hits = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let format = SourceFormat::parse(formats.value(i)).ok_or_else(|| {
            AssistantError::Database(format!("Unknown source format: {}", formats.value(i)))
        })?;

        let metadata = DocumentMetadata {
            source: PathBuf::from(sources.value(i)),
            format,
            department: departments.value(i).to_string(),
            row: optional(rows, i),
            chunk_index: optional(chunk_indices, i),
        };

        let distance = distances.map_or(0.0, |d| if d.is_null(i) { 0.0 } else { d.value(i) });

        hits.push(SearchHit {
            document: Document::new(contents.value(i).to_string(), metadata),
            distance,
            score: 1.0 - distance,
        });
    }

    Ok(hits)
}
