//! Answer pipeline: retrieve, build the prompt, generate.
//!
//! ```text
//! query ──▶ RetrievalEngine::retrieve ──▶ context_string
//!                                             │
//! history (session directives) ───────────────┼──▶ build_prompt ──▶ GenerationProvider
//!                                             │                        (+ ToolRegistry)
//! ```
//!
//! [`AnswerPipeline::answer`] returns the whole answer.
//! [`AnswerPipeline::stream`] retrieves eagerly (so "nothing ingested" is
//! reported before any output) and returns an [`AnswerStream`] that invokes
//! the model on first poll.
//!
//! # Streaming protocol
//!
//! An [`AnswerStream`] moves through [`StreamPhase`]s:
//!
//! ```text
//! Built ──▶ Invoking ──▶ Streaming ──▶ Completed
//!   └──────────┴────────────┴────────▶ Errored
//! ```
//!
//! Empty fragments are skipped. A failure after the stream was handed out
//! becomes a single final item `"\n[stream-error] {error}"`, after which the
//! stream ends. Dropping the stream drops the upstream request.

use futures::future::BoxFuture;
use futures::{FutureExt, Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::config::Config;
use crate::corpus::CorpusStore;
use crate::embedding::{self, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::llm::{self, FragmentStream, GenerationProvider, Message};
use crate::models::ChunkMetadata;
use crate::retrieval::{context_string, IndexCache, RetrievalParams, RetrievedChunk};
use crate::tools::ToolRegistry;

pub const SYSTEM_INSTRUCTION: &str = "You are a helpful legal research assistant. \
Use provided context chunks to answer. Cite case names you rely on. \
If the user seems to be asking about contract disputes, surface relevant precedents.";

const ANSWER_TAIL: &str = "If useful, you may call tools.";
const STREAM_TAIL: &str = "Stream your response.";

/// Prefix of the in-band marker that terminates a failed stream.
pub const STREAM_ERROR_MARKER: &str = "\n[stream-error] ";

/// Assemble the conversation: system instruction, session directives, then
/// the user turn carrying the query and the fused context.
pub fn build_prompt(query: &str, context: &str, history: &[Message], tail: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(SYSTEM_INSTRUCTION));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(format!(
        "Query: {}\n\nContext:\n{}\n\n{}",
        query, context, tail
    )));
    messages
}

/// A complete answer and the provenance of its context.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<ChunkMetadata>,
}

pub struct AnswerPipeline {
    store: Arc<CorpusStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    generator: Arc<dyn GenerationProvider>,
    tools: Arc<ToolRegistry>,
    params: RetrievalParams,
    cache: IndexCache,
}

impl AnswerPipeline {
    pub fn new(
        store: Arc<CorpusStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn GenerationProvider>,
        tools: ToolRegistry,
        params: RetrievalParams,
        cache_indexes: bool,
    ) -> Self {
        Self {
            store,
            embedder,
            generator,
            tools: Arc::new(tools),
            params,
            cache: IndexCache::new(cache_indexes),
        }
    }

    /// Wire the configured embedding and generation providers.
    pub fn from_config(config: &Config, store: Arc<CorpusStore>) -> Result<Self> {
        let embedder = embedding::create_provider(&config.embedding)?;
        let generator = llm::create_generator(&config.llm)?;
        tracing::info!(
            embedding = embedder.model_name(),
            generation = generator.model_name(),
            "answer pipeline ready"
        );
        Ok(Self::new(
            store,
            embedder,
            generator,
            ToolRegistry::with_builtins(),
            RetrievalParams::from_config(config),
            config.retrieval.cache_indexes,
        ))
    }

    pub fn store(&self) -> &Arc<CorpusStore> {
        &self.store
    }

    /// Fused context chunks for `query`.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must not be empty".into()));
        }
        let engine = self
            .cache
            .engine(&self.store, self.embedder.clone(), &self.params)
            .await?;
        let hits = engine.retrieve(query).await;
        tracing::debug!(hits = hits.len(), "context retrieved");
        Ok(hits)
    }

    pub async fn answer(&self, query: &str, history: &[Message]) -> Result<String> {
        self.answer_with_sources(query, history)
            .await
            .map(|answer| answer.text)
    }

    pub async fn answer_with_sources(&self, query: &str, history: &[Message]) -> Result<Answer> {
        let hits = self.retrieve(query).await?;
        let messages = build_prompt(query, &context_string(&hits), history, ANSWER_TAIL);
        let text = self.generator.generate(&messages, &self.tools).await?;
        Ok(Answer {
            text,
            sources: hits.into_iter().map(|h| h.chunk.metadata).collect(),
        })
    }

    /// Retrieve now, generate lazily.
    ///
    /// Retrieval errors (including [`Error::NotIngested`]) are returned here;
    /// generation errors surface inside the stream.
    pub async fn stream(&self, query: &str, history: &[Message]) -> Result<AnswerStream> {
        let hits = self.retrieve(query).await?;
        let messages = build_prompt(query, &context_string(&hits), history, STREAM_TAIL);
        Ok(AnswerStream::new(
            self.generator.clone(),
            messages,
            self.tools.clone(),
            hits.into_iter().map(|h| h.chunk.metadata).collect(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Built,
    Invoking,
    Streaming,
    Completed,
    Errored,
}

type Invocation = (Arc<dyn GenerationProvider>, Vec<Message>, Arc<ToolRegistry>);

/// Lazy, finite, non-restartable sequence of answer fragments.
pub struct AnswerStream {
    phase: StreamPhase,
    invocation: Option<Invocation>,
    opening: Option<BoxFuture<'static, Result<FragmentStream>>>,
    fragments: Option<FragmentStream>,
    sources: Vec<ChunkMetadata>,
}

impl AnswerStream {
    pub fn new(
        generator: Arc<dyn GenerationProvider>,
        messages: Vec<Message>,
        tools: Arc<ToolRegistry>,
        sources: Vec<ChunkMetadata>,
    ) -> Self {
        Self {
            phase: StreamPhase::Built,
            invocation: Some((generator, messages, tools)),
            opening: None,
            fragments: None,
            sources,
        }
    }

    pub fn phase(&self) -> StreamPhase {
        self.phase
    }

    pub fn sources(&self) -> &[ChunkMetadata] {
        &self.sources
    }

    fn fail(&mut self, err: Error) -> String {
        tracing::warn!(error = %err, phase = ?self.phase, "answer stream failed");
        self.phase = StreamPhase::Errored;
        self.invocation = None;
        self.opening = None;
        self.fragments = None;
        format!("{}{}", STREAM_ERROR_MARKER, err)
    }
}

impl Stream for AnswerStream {
    type Item = String;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        let this = self.get_mut();
        loop {
            match this.phase {
                StreamPhase::Built => {
                    let Some((generator, messages, tools)) = this.invocation.take() else {
                        return Poll::Ready(Some(
                            this.fail(Error::generation("stream has no pending invocation")),
                        ));
                    };
                    this.opening = Some(
                        async move { generator.generate_stream(messages, tools).await }.boxed(),
                    );
                    this.phase = StreamPhase::Invoking;
                }
                StreamPhase::Invoking => {
                    let Some(opening) = this.opening.as_mut() else {
                        return Poll::Ready(Some(
                            this.fail(Error::generation("stream lost its invocation")),
                        ));
                    };
                    match opening.as_mut().poll(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Ok(fragments)) => {
                            this.opening = None;
                            this.fragments = Some(fragments);
                            this.phase = StreamPhase::Streaming;
                        }
                        Poll::Ready(Err(e)) => return Poll::Ready(Some(this.fail(e))),
                    }
                }
                StreamPhase::Streaming => {
                    let Some(fragments) = this.fragments.as_mut() else {
                        this.phase = StreamPhase::Completed;
                        return Poll::Ready(None);
                    };
                    match fragments.poll_next_unpin(cx) {
                        Poll::Pending => return Poll::Pending,
                        Poll::Ready(Some(Ok(text))) if text.is_empty() => continue,
                        Poll::Ready(Some(Ok(text))) => return Poll::Ready(Some(text)),
                        Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(this.fail(e))),
                        Poll::Ready(None) => {
                            this.fragments = None;
                            this.phase = StreamPhase::Completed;
                            return Poll::Ready(None);
                        }
                    }
                }
                StreamPhase::Completed | StreamPhase::Errored => return Poll::Ready(None),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream;

    struct ScriptedGenerator {
        fragments: Vec<Result<String>>,
        fail_to_open: bool,
    }

    #[async_trait]
    impl GenerationProvider for ScriptedGenerator {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _messages: &[Message], _tools: &ToolRegistry) -> Result<String> {
            Ok("answer".into())
        }

        async fn generate_stream(
            &self,
            _messages: Vec<Message>,
            _tools: Arc<ToolRegistry>,
        ) -> Result<FragmentStream> {
            if self.fail_to_open {
                return Err(Error::generation("model offline"));
            }
            let items: Vec<Result<String>> = self
                .fragments
                .iter()
                .map(|r| match r {
                    Ok(s) => Ok(s.clone()),
                    Err(e) => Err(Error::generation(e)),
                })
                .collect();
            Ok(stream::iter(items).boxed())
        }
    }

    fn answer_stream(fragments: Vec<Result<String>>, fail_to_open: bool) -> AnswerStream {
        AnswerStream::new(
            Arc::new(ScriptedGenerator {
                fragments,
                fail_to_open,
            }),
            vec![Message::user("q")],
            Arc::new(ToolRegistry::new()),
            Vec::new(),
        )
    }

    #[test]
    fn test_prompt_layout() {
        let history = vec![Message::system("User is interested in tort cases. Prefer such precedents when relevant.")];
        let messages = build_prompt("duty of care?", "a\n---\nb", &history, ANSWER_TAIL);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].content, SYSTEM_INSTRUCTION);
        assert_eq!(messages[1], history[0]);
        assert_eq!(
            messages[2].content,
            "Query: duty of care?\n\nContext:\na\n---\nb\n\nIf useful, you may call tools."
        );
    }

    #[tokio::test]
    async fn test_stream_completes_and_skips_empty_fragments() {
        let mut s = answer_stream(
            vec![Ok("Hadley".into()), Ok(String::new()), Ok(" v. Baxendale".into())],
            false,
        );
        assert_eq!(s.phase(), StreamPhase::Built);
        let mut out = Vec::new();
        while let Some(f) = s.next().await {
            out.push(f);
        }
        assert_eq!(out, vec!["Hadley".to_string(), " v. Baxendale".to_string()]);
        assert_eq!(s.phase(), StreamPhase::Completed);
    }

    #[tokio::test]
    async fn test_mid_stream_error_emits_marker_once() {
        let mut s = answer_stream(
            vec![
                Ok("partial".into()),
                Err(Error::generation("connection reset")),
                Ok("never".into()),
            ],
            false,
        );
        let out: Vec<String> = (&mut s).collect().await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], "partial");
        assert!(out[1].starts_with(STREAM_ERROR_MARKER));
        assert!(out[1].contains("connection reset"));
        assert_eq!(s.phase(), StreamPhase::Errored);
        assert_eq!(s.next().await, None);
    }

    #[tokio::test]
    async fn test_invocation_failure_is_in_band() {
        let out: Vec<String> = answer_stream(Vec::new(), true).collect().await;
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with(STREAM_ERROR_MARKER));
        assert!(out[0].contains("model offline"));
    }
}
