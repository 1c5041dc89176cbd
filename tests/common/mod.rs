#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use lexcase::corpus::CorpusStore;
use lexcase::embedding::EmbeddingProvider;
use lexcase::error::{Error, Result};
use lexcase::llm::{FragmentStream, GenerationProvider, Message, Role};
use lexcase::models::{Chunk, ChunkMetadata};
use lexcase::pipeline::AnswerPipeline;
use lexcase::retrieval::RetrievalParams;
use lexcase::tools::ToolRegistry;

pub const VOCAB: [&str; 8] = [
    "contract", "breach", "damages", "tort", "negligence", "property", "tax", "criminal",
];

/// Bag-of-vocabulary embedder: one dimension per [`VOCAB`] word plus a
/// constant so no vector is all zeros.
#[derive(Default)]
pub struct KeywordEmbedder {
    pub batch_calls: AtomicUsize,
    pub texts_embedded: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn vector(text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v: Vec<f32> = VOCAB
            .iter()
            .map(|w| lower.matches(w).count() as f32)
            .collect();
        v.push(0.1);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        self.texts_embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Embedder whose backend is always down.
#[derive(Default)]
pub struct FailingEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::embedding("embedding backend unreachable"))
    }
}

/// Records every conversation it is asked to answer.
pub struct RecordingGenerator {
    pub reply: String,
    pub fragments: Vec<String>,
    pub calls: Mutex<Vec<Vec<Message>>>,
}

impl RecordingGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fragments: vec!["Hadley".into(), " v. ".into(), "Baxendale".into()],
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Content of the user turn of the `n`th call.
    pub fn user_turn(&self, n: usize) -> String {
        let calls = self.calls.lock().unwrap();
        calls[n]
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default()
    }

    /// System messages of the `n`th call, excluding the fixed instruction.
    pub fn directives(&self, n: usize) -> Vec<String> {
        let calls = self.calls.lock().unwrap();
        calls[n]
            .iter()
            .skip(1)
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.clone())
            .collect()
    }
}

#[async_trait]
impl GenerationProvider for RecordingGenerator {
    fn model_name(&self) -> &str {
        "recording"
    }

    async fn generate(&self, messages: &[Message], _tools: &ToolRegistry) -> Result<String> {
        self.calls.lock().unwrap().push(messages.to_vec());
        Ok(self.reply.clone())
    }

    async fn generate_stream(
        &self,
        messages: Vec<Message>,
        _tools: Arc<ToolRegistry>,
    ) -> Result<FragmentStream> {
        self.calls.lock().unwrap().push(messages);
        let items: Vec<Result<String>> = self.fragments.iter().cloned().map(Ok).collect();
        Ok(stream::iter(items).boxed())
    }
}

pub fn chunk(text: &str, source: &str, page: u32) -> Chunk {
    Chunk {
        text: text.to_string(),
        metadata: ChunkMetadata {
            source_path: source.to_string(),
            page_number: page,
        },
    }
}

/// Five chunks covering distinct areas of law.
pub fn sample_chunks() -> Vec<Chunk> {
    vec![
        chunk(
            "Hadley v Baxendale limits damages for breach of contract to foreseeable loss.",
            "contracts.pdf",
            1,
        ),
        chunk(
            "Donoghue v Stevenson established the modern tort of negligence.",
            "torts.pdf",
            1,
        ),
        chunk(
            "Adverse possession can transfer title to real property.",
            "property.pdf",
            1,
        ),
        chunk(
            "Carlill v Carbolic Smoke Ball: unilateral contract formed by performance.",
            "contracts.pdf",
            2,
        ),
        chunk(
            "A criminal conviction requires proof beyond reasonable doubt.",
            "criminal.pdf",
            1,
        ),
    ]
}

pub fn pipeline_with(
    store: Arc<CorpusStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
) -> AnswerPipeline {
    AnswerPipeline::new(
        store,
        embedder,
        generator,
        ToolRegistry::with_builtins(),
        RetrievalParams::default(),
        true,
    )
}
