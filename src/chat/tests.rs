use super::*;
use crate::database::lancedb::{ChunkRecord, IndexStore};
use crate::embeddings::HashingEmbedder;
use crate::loader::{Document, DocumentMetadata, SourceFormat};
use std::sync::Mutex;
use tempfile::TempDir;

/// Chat model that records prompts and replies with a fixed result
struct ScriptedModel {
    reply: std::result::Result<String, String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn replying(reply: &str) -> Self {
        Self {
            reply: Ok(reply.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock should not be poisoned").clone()
    }
}

impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    fn complete(&self, messages: &[ChatMessage]) -> anyhow::Result<String> {
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, MessageRole::User);
        self.prompts
            .lock()
            .expect("lock should not be poisoned")
            .push(messages[0].content.clone());
        self.reply.clone().map_err(|e| anyhow::anyhow!(e))
    }
}

fn hit(text: &str) -> SearchHit {
    SearchHit {
        document: Document::new(
            text.to_string(),
            DocumentMetadata::new("data/hr/policy.md", SourceFormat::Markdown, "Hr"),
        ),
        distance: 0.2,
        score: 0.8,
    }
}

async fn hr_index(embedder: &HashingEmbedder) -> (Arc<DepartmentIndex>, TempDir) {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let store = IndexStore::new(temp_dir.path().join("vectors"))
        .await
        .expect("should create index store");

    let texts = [
        "Employees receive twenty days of paid leave per year.",
        "Remote work requires manager approval.",
        "Health insurance covers dependents.",
        "Performance reviews happen every six months.",
        "The office opens at eight in the morning.",
        "Expense reports are due monthly.",
    ];
    let records: Vec<ChunkRecord> = texts
        .iter()
        .enumerate()
        .map(|(i, text)| {
            let mut metadata =
                DocumentMetadata::new("data/hr/handbook.md", SourceFormat::Markdown, "Hr");
            metadata.chunk_index = Some(i);
            ChunkRecord::new(embedder.embed(text), Document::new(text.to_string(), metadata))
        })
        .collect();

    let index = store
        .build_index("Hr", &records)
        .await
        .expect("should build index");
    (Arc::new(index), temp_dir)
}

#[test]
fn prompt_stuffs_context_in_order() {
    let prompt = build_prompt(&[hit("First chunk."), hit("Second chunk.")], "What is first?");

    assert_eq!(
        prompt,
        "Use the following pieces of context to answer the question at the end. \
If you don't know the answer, just say that you don't know, don't try to make up an answer.\n\n\
First chunk.\n\nSecond chunk.\n\nQuestion: What is first?\nHelpful Answer:"
    );
}

#[test]
fn prompt_keeps_braces_literal() {
    let prompt = build_prompt(&[hit("Template {question} text")], "Why {context}?");
    assert!(prompt.contains("Template {question} text"));
    assert!(prompt.contains("Question: Why {context}?"));
}

#[tokio::test]
async fn answer_uses_top_k_sources() {
    let embedder = HashingEmbedder::default();
    let (index, _temp_dir) = hr_index(&embedder).await;
    let model = Arc::new(ScriptedModel::replying("Twenty days."));

    let chain = RagChain::new(
        index,
        Arc::new(embedder),
        Arc::clone(&model) as Arc<dyn ChatModel>,
        DEFAULT_TOP_K,
    );
    assert_eq!(chain.department(), "Hr");

    let result = chain
        .answer("How many days of paid leave do employees get?")
        .await
        .expect("answer should succeed");

    assert_eq!(result.answer, "Twenty days.");
    assert_eq!(result.sources.len(), 4);
    assert_eq!(
        result.sources[0].document.text,
        "Employees receive twenty days of paid leave per year."
    );

    let prompts = model.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Employees receive twenty days of paid leave per year."));
    assert!(prompts[0].ends_with(
        "Question: How many days of paid leave do employees get?\nHelpful Answer:"
    ));
}

#[tokio::test]
async fn top_k_larger_than_index_returns_everything() {
    let embedder = HashingEmbedder::default();
    let (index, _temp_dir) = hr_index(&embedder).await;
    let chain = RagChain::new(
        index,
        Arc::new(embedder),
        Arc::new(ScriptedModel::replying("ok")),
        50,
    );

    let result = chain.answer("office hours").await.expect("answer should succeed");
    assert_eq!(result.sources.len(), 6);
}

#[tokio::test]
async fn generation_failure_is_reported() {
    let embedder = HashingEmbedder::default();
    let (index, _temp_dir) = hr_index(&embedder).await;
    let chain = RagChain::new(
        index,
        Arc::new(embedder),
        Arc::new(ScriptedModel::failing("rate limited")),
        DEFAULT_TOP_K,
    );

    let error = handle_query(&chain, "Anything?")
        .await
        .expect_err("generation should fail");

    assert!(matches!(&error, AssistantError::Generation(message) if message.contains("rate limited")));
    assert_eq!(
        error.to_string(),
        "Error generating response: rate limited"
    );
}

#[tokio::test]
async fn handle_query_returns_text() {
    let embedder = HashingEmbedder::default();
    let (index, _temp_dir) = hr_index(&embedder).await;
    let chain = RagChain::new(
        index,
        Arc::new(embedder),
        Arc::new(ScriptedModel::replying("Managers approve remote work.")),
        2,
    );
    assert_eq!(chain.top_k(), 2);

    let answer = handle_query(&chain, "Who approves remote work?")
        .await
        .expect("answer should succeed");
    assert_eq!(answer, "Managers approve remote work.");
}
