// Chat module
// Retrieval-then-generate answering over one department's index

#[cfg(test)]
mod tests;

pub mod llm;

use anyhow::anyhow;
use std::sync::Arc;
use tracing::debug;

use crate::database::lancedb::{DepartmentIndex, SearchHit};
use crate::embeddings::Embedder;
use crate::{AssistantError, Result};

pub use llm::{ChatClient, ChatMessage, ChatModel, MessageRole};

/// Chunks retrieved per question unless configured otherwise
pub const DEFAULT_TOP_K: usize = 4;

const PROMPT_PREAMBLE: &str = "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.";

/// Generated answer and the chunks it was conditioned on
#[derive(Debug, Clone)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SearchHit>,
}

/// Answers questions from a department index with a language model
#[derive(Clone)]
pub struct RagChain {
    index: Arc<DepartmentIndex>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn ChatModel>,
    top_k: usize,
}

impl RagChain {
    /// Create a chain over one department's index
    ///
    /// # Arguments
    ///
    /// * `index` - The department index searched for context
    /// * `embedder` - Must be the embedder the index was built with
    /// * `llm` - Model that writes the answer
    /// * `top_k` - Chunks retrieved per question, at least 1
    #[inline]
    pub fn new(
        index: Arc<DepartmentIndex>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn ChatModel>,
        top_k: usize,
    ) -> Self {
        Self {
            index,
            embedder,
            llm,
            top_k: top_k.max(1),
        }
    }

    #[inline]
    pub fn department(&self) -> &str {
        self.index.department()
    }

    #[inline]
    pub const fn top_k(&self) -> usize {
        self.top_k
    }

    /// Retrieve the `top_k` nearest chunks, then ask the model with all of them as context
    #[inline]
    pub async fn answer(&self, question: &str) -> Result<RagAnswer> {
        let embedder = Arc::clone(&self.embedder);
        let query = question.to_string();
        let query_vector = tokio::task::spawn_blocking(move || embedder.embed_query(&query))
            .await
            .map_err(|e| AssistantError::Other(anyhow!("Embedding task failed: {}", e)))?
            .map_err(|e| AssistantError::Embedding(format!("{:#}", e)))?;

        let sources = self.index.search(&query_vector, self.top_k).await?;
        debug!(
            "Retrieved {} chunk(s) from '{}' for question",
            sources.len(),
            self.index.department()
        );

        let prompt = build_prompt(&sources, question);
        let llm = Arc::clone(&self.llm);
        let answer = tokio::task::spawn_blocking(move || llm.complete(&[ChatMessage::user(prompt)]))
            .await
            .map_err(|e| AssistantError::Other(anyhow!("Generation task failed: {}", e)))?
            .map_err(|e| AssistantError::Generation(format!("{:#}", e)))?;

        Ok(RagAnswer { answer, sources })
    }
}

/// Run `question` through `chain`, keeping only the answer text
///
/// # Arguments
///
/// * `chain` - Retrieval chain bound to one department index
/// * `question` - The user's question, passed to the model as written
///
/// # Returns
///
/// The model's answer, or the retrieval or generation error
#[inline]
pub async fn handle_query(chain: &RagChain, question: &str) -> Result<String> {
    Ok(chain.answer(question).await?.answer)
}

/// Prompt with every retrieved chunk stuffed into the context, separated by blank lines
#[inline]
pub fn build_prompt(sources: &[SearchHit], question: &str) -> String {
    let context = sources
        .iter()
        .map(|hit| hit.document.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{}\n\n{}\n\nQuestion: {}\nHelpful Answer:",
        PROMPT_PREAMBLE, context, question
    )
}
