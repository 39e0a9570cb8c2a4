// Indexer module
// Builds and caches one similarity index per department for the life of the process


use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::anyhow;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::Config;
use crate::database::lancedb::{ChunkRecord, DepartmentIndex, IndexStore};
use crate::embeddings::{ChunkingConfig, Embedder, embedder_from_config};
use crate::loader::{DepartmentTagger, SourceFormat, capitalize, load_and_split_with};
use crate::{AssistantError, Result};

/// Cache counters reported by [`VectorStoreManager::cache_stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Requests answered from the cache
    pub hits: usize,
    /// Requests that had to look at the department's files
    pub misses: usize,
    /// Indexes built and cached
    pub builds: usize,
}

impl CacheStats {
    #[inline]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicUsize,
    misses: AtomicUsize,
    builds: AtomicUsize,
}

/// Enumerates department files, builds their indexes, and caches them.
///
/// One instance is meant to be shared by every session in the process. The
/// cache is keyed by lowercased department name and never evicts on its own;
/// builds for the same department are serialized so concurrent callers wait
/// for the first one instead of duplicating the work.
///
/// Every build gets its own table. Indexes removed from the cache are retired,
/// and their tables are dropped once no session holds them any more.
pub struct VectorStoreManager {
    data_root: PathBuf,
    chunking: ChunkingConfig,
    embedder: Arc<dyn Embedder>,
    store: IndexStore,
    cache: RwLock<HashMap<String, Arc<DepartmentIndex>>>,
    build_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    retired: Mutex<Vec<RetiredIndex>>,
    counters: CacheCounters,
}

/// Table of an index no longer in the cache, and a way to tell whether it is still in use
struct RetiredIndex {
    table_name: String,
    index: Weak<DepartmentIndex>,
}

impl VectorStoreManager {
    /// Create a manager with an empty cache
    ///
    /// # Arguments
    ///
    /// * `data_root` - Directory holding one folder per department
    /// * `chunking` - Chunk size and overlap used when loading documents
    /// * `embedder` - Embedder for both indexing and queries
    /// * `store` - Where department tables are written
    #[inline]
    pub fn new<P: AsRef<Path>>(
        data_root: P,
        chunking: ChunkingConfig,
        embedder: Arc<dyn Embedder>,
        store: IndexStore,
    ) -> Self {
        Self {
            data_root: data_root.as_ref().to_path_buf(),
            chunking,
            embedder,
            store,
            cache: RwLock::new(HashMap::new()),
            build_locks: Mutex::new(HashMap::new()),
            retired: Mutex::new(Vec::new()),
            counters: CacheCounters::default(),
        }
    }

    /// Manager over `config.data_root` with the configured embedder and vector directory
    #[inline]
    pub async fn from_config(config: &Config) -> Result<Self> {
        let embedder = embedder_from_config(config)
            .map_err(|e| AssistantError::Config(format!("{:#}", e)))?;
        let store = IndexStore::new(config.vector_database_path()).await?;

        info!(
            "Vector store manager ready for {} using {}",
            config.data_root.display(),
            embedder.model_name()
        );

        Ok(Self::new(&config.data_root, config.chunking, embedder, store))
    }

    #[inline]
    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    /// Embedder used for both indexing and queries
    #[inline]
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    #[inline]
    pub fn store(&self) -> &IndexStore {
        &self.store
    }

    /// Supported files under the department's folder, matched case-insensitively
    #[inline]
    pub fn list_department_files(&self, department: &str) -> Result<Vec<PathBuf>> {
        list_department_files(&self.data_root, department)
    }

    /// The department's index, building and caching it on first use.
    ///
    /// Returns `None` when the department has no supported files, or when no
    /// chunk survives the department check; nothing is cached in that case.
    ///
    /// # Arguments
    ///
    /// * `department` - Department name, matched case-insensitively
    ///
    /// # Returns
    ///
    /// The shared index, `None` for a department without content, or the
    /// loading, embedding or database error of a failed build
    #[inline]
    pub async fn get_department_index(
        &self,
        department: &str,
    ) -> Result<Option<Arc<DepartmentIndex>>> {
        let key = department.trim().to_lowercase();

        if let Some(index) = self.cached(&key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for department '{}'", key);
            return Ok(Some(index));
        }

        let lock = self.build_lock(&key).await;
        let result = {
            let _guard = lock.lock().await;
            self.build_locked(&key).await
        };
        self.release_build_lock(&key, &lock).await;

        if matches!(result, Ok(Some(_))) {
            self.release_retired().await;
        }
        result
    }

    async fn build_locked(&self, key: &str) -> Result<Option<Arc<DepartmentIndex>>> {
        // Another caller may have finished the build while we waited
        if let Some(index) = self.cached(key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache filled while waiting for department '{}'", key);
            return Ok(Some(index));
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);

        let started = Instant::now();
        let Some(records) = self.prepare_records(key).await? else {
            info!("No indexable documents for department '{}'", key);
            return Ok(None);
        };

        let index = Arc::new(self.store.build_index(&capitalize(key), &records).await?);
        self.cache
            .write()
            .await
            .insert(key.to_string(), Arc::clone(&index));
        self.counters.builds.fetch_add(1, Ordering::Relaxed);

        info!(
            "Built index for department '{}' with {} chunks in {:.2?}",
            key,
            index.chunk_count(),
            started.elapsed()
        );

        Ok(Some(index))
    }

    /// Drop every cached index; later requests rebuild from the files
    #[inline]
    pub async fn clear_cache(&self) {
        let removed: Vec<Arc<DepartmentIndex>> = {
            let mut cache = self.cache.write().await;
            cache.drain().map(|(_, index)| index).collect()
        };
        info!("Cleared {} cached department index(es)", removed.len());
        self.retire(removed).await;
    }

    /// Drop one department's cached index; returns whether it was cached
    #[inline]
    pub async fn evict(&self, department: &str) -> bool {
        let key = department.trim().to_lowercase();
        let removed = self.cache.write().await.remove(&key);
        let was_cached = removed.is_some();
        self.retire(removed.into_iter().collect()).await;
        was_cached
    }

    /// Drop the tables of retired indexes that no session holds any more.
    ///
    /// Returns how many tables were dropped. Tables still in use stay retired
    /// and are checked again after the next build or cache clear.
    #[inline]
    pub async fn release_retired(&self) -> usize {
        let mut retired = self.retired.lock().await;
        let pending = std::mem::take(&mut *retired);
        let mut still_held = Vec::new();
        let mut dropped = 0;

        for entry in pending {
            if entry.index.strong_count() > 0 {
                still_held.push(entry);
                continue;
            }
            match self.store.drop_table(&entry.table_name).await {
                Ok(_) => dropped += 1,
                Err(e) => {
                    warn!("Failed to drop retired table {}: {}", entry.table_name, e);
                    still_held.push(entry);
                }
            }
        }

        if dropped > 0 {
            debug!("Dropped {} retired table(s)", dropped);
        }
        *retired = still_held;
        dropped
    }

    /// Number of retired tables waiting for their last session to let go
    #[inline]
    pub async fn retired_count(&self) -> usize {
        self.retired.lock().await.len()
    }

    /// Number of departments with a build lock entry
    #[inline]
    pub async fn build_lock_count(&self) -> usize {
        self.build_locks.lock().await.len()
    }

    /// Capitalized names of the folders under the data root holding a supported file
    #[inline]
    pub fn list_available_departments(&self) -> Result<Vec<String>> {
        if !self.data_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut departments = Vec::new();
        for entry in fs::read_dir(&self.data_root)? {
            let path = entry?.path();
            if path.is_dir() && !supported_files(&path).is_empty() {
                if let Some(name) = path.file_name() {
                    departments.push(capitalize(&name.to_string_lossy()));
                }
            }
        }

        departments.sort();
        departments.dedup();
        Ok(departments)
    }

    #[inline]
    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            builds: self.counters.builds.load(Ordering::Relaxed),
        }
    }

    /// Lowercased keys of the cached departments, sorted
    #[inline]
    pub async fn cached_departments(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.cache.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn cached(&self, key: &str) -> Option<Arc<DepartmentIndex>> {
        self.cache.read().await.get(key).cloned()
    }

    async fn build_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.build_locks.lock().await;
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Remove the key's lock entry unless another caller is waiting on it
    async fn release_build_lock(&self, key: &str, lock: &Arc<Mutex<()>>) {
        let mut locks = self.build_locks.lock().await;
        // One reference in the map plus ours
        if Arc::strong_count(lock) <= 2 {
            locks.remove(key);
        }
    }

    async fn retire(&self, removed: Vec<Arc<DepartmentIndex>>) {
        if removed.is_empty() {
            return;
        }
        {
            let mut retired = self.retired.lock().await;
            retired.extend(removed.iter().map(|index| RetiredIndex {
                table_name: index.table_name().to_string(),
                index: Arc::downgrade(index),
            }));
        }
        drop(removed);
        self.release_retired().await;
    }

    /// Load, chunk, filter and embed on the blocking pool
    async fn prepare_records(&self, key: &str) -> Result<Option<Vec<ChunkRecord>>> {
        let data_root = self.data_root.clone();
        let chunking = self.chunking;
        let embedder = Arc::clone(&self.embedder);
        let department = key.to_string();

        tokio::task::spawn_blocking(move || {
            prepare_records(&data_root, &department, &chunking, embedder.as_ref())
        })
        .await
        .map_err(|e| AssistantError::Other(anyhow!("Index build task failed: {}", e)))?
    }
}

fn prepare_records(
    data_root: &Path,
    department: &str,
    chunking: &ChunkingConfig,
    embedder: &dyn Embedder,
) -> Result<Option<Vec<ChunkRecord>>> {
    let files = list_department_files(data_root, department)?;
    if files.is_empty() {
        return Ok(None);
    }
    debug!("Found {} file(s) for department '{}'", files.len(), department);

    let tagger = DepartmentTagger::for_root(data_root);
    let chunks = load_and_split_with(&files, chunking, &tagger)
        .map_err(|e| AssistantError::Loader(format!("{:#}", e)))?;

    let total = chunks.len();
    let chunks: Vec<_> = chunks
        .into_iter()
        .filter(|chunk| chunk.metadata.belongs_to(department))
        .collect();
    if chunks.len() < total {
        debug!(
            "Dropped {} chunk(s) tagged for another department",
            total - chunks.len()
        );
    }
    if chunks.is_empty() {
        return Ok(None);
    }

    let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
    let vectors = embedder
        .embed_documents(&texts)
        .map_err(|e| AssistantError::Embedding(format!("{:#}", e)))?;

    if vectors.len() != chunks.len() {
        return Err(AssistantError::Embedding(format!(
            "Expected {} embeddings, got {}",
            chunks.len(),
            vectors.len()
        )));
    }

    Ok(Some(
        vectors
            .into_iter()
            .zip(chunks)
            .map(|(vector, chunk)| ChunkRecord::new(vector, chunk))
            .collect(),
    ))
}

fn list_department_files(data_root: &Path, department: &str) -> Result<Vec<PathBuf>> {
    let Some(folder) = resolve_department_dir(data_root, department)? else {
        return Ok(Vec::new());
    };
    Ok(supported_files(&folder))
}

/// Folder under `data_root` whose name equals `department`, ignoring case
fn resolve_department_dir(data_root: &Path, department: &str) -> Result<Option<PathBuf>> {
    let wanted = department.trim().to_lowercase();
    if wanted.is_empty() || !data_root.is_dir() {
        return Ok(None);
    }

    let exact = data_root.join(&wanted);
    if exact.is_dir() {
        return Ok(Some(exact));
    }

    for entry in fs::read_dir(data_root)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().to_lowercase() == wanted);
        if matches && path.is_dir() {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

fn supported_files(folder: &Path) -> Vec<PathBuf> {
    WalkDir::new(folder)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| SourceFormat::from_path(entry.path()).is_some())
        .map(walkdir::DirEntry::into_path)
        .collect()
}
