// Embeddings module
// Text chunking plus the embedding backends used to index department documents

pub mod chunking;
pub mod hashing;
pub mod ollama;

use anyhow::Result;
use std::sync::Arc;

use crate::config::{Config, EmbeddingProvider};

pub use chunking::{ChunkingConfig, TextSplitter};
pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;

/// Turns text into fixed-length vectors.
///
/// Implementations must be deterministic: identical input yields identical
/// vectors, and every vector from one embedder has the same dimension.
pub trait Embedder: Send + Sync {
    /// Identifier of the model producing the vectors
    fn model_name(&self) -> &str;

    /// Embed a batch of document chunks, preserving order
    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query
    #[inline]
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_documents(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Embedder returned no vector for query"))
    }
}

/// Build the embedder selected in the configuration
#[inline]
pub fn embedder_from_config(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embeddings.provider {
        EmbeddingProvider::Ollama => Ok(Arc::new(OllamaClient::new(config)?)),
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(
            config.embeddings.hashing_dimension,
        ))),
    }
}
