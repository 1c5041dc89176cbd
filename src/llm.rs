//! Generation capability and the Ollama chat client.
//!
//! [`GenerationProvider`] is the seam between the answer pipeline and the
//! language model. The pipeline hands it a conversation and a
//! [`ToolRegistry`]; the provider decides whether the model may call tools
//! and runs those calls itself, so tool use never shows up as control flow
//! in the pipeline.
//!
//! # Ollama
//!
//! [`OllamaChat`] talks to `POST /api/chat`. Registered tools are offered
//! as function schemas. When the model answers with `tool_calls`, each call
//! is executed through the registry, the results are appended as `tool`
//! messages and the model is invoked again, for at most `max_tool_rounds`
//! rounds. The final round is sent without tools so the model must answer.
//!
//! Streaming responses are newline-delimited JSON. Network chunks do not
//! align with lines, so bytes are buffered until a full line is available.
//!
//! `timeout_secs` bounds a whole non-streaming call. For streams it bounds
//! opening the response and each gap between body chunks, so a long answer
//! that keeps producing tokens is never cut off.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::tools::ToolRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A model-requested tool invocation, in Ollama's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self::new(Role::Tool, content)
    }
}

/// Incremental text fragments produced by a streaming generation.
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce a complete answer, running any tool calls the model makes.
    async fn generate(&self, messages: &[Message], tools: &ToolRegistry) -> Result<String>;

    /// Open a fragment stream. Errors before the first byte are returned
    /// directly; later failures arrive as `Err` items.
    async fn generate_stream(
        &self,
        messages: Vec<Message>,
        tools: Arc<ToolRegistry>,
    ) -> Result<FragmentStream>;
}

/// Run every requested call and return the `tool` messages to append.
pub async fn run_tool_calls(tools: &ToolRegistry, calls: &[ToolCall]) -> Vec<Message> {
    let mut out = Vec::with_capacity(calls.len());
    for call in calls {
        let content = match tools.call(&call.function.name, call.function.arguments.clone()).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(tool = %call.function.name, error = %e, "tool call failed");
                e.to_string()
            }
        };
        out.push(Message::tool(content));
    }
    out
}

// ============ Disabled ============

/// Always fails; used when `llm.provider = "disabled"`.
pub struct DisabledGenerator;

#[async_trait]
impl GenerationProvider for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _messages: &[Message], _tools: &ToolRegistry) -> Result<String> {
        Err(Error::generation("generation provider is disabled"))
    }

    async fn generate_stream(
        &self,
        _messages: Vec<Message>,
        _tools: Arc<ToolRegistry>,
    ) -> Result<FragmentStream> {
        Err(Error::generation("generation provider is disabled"))
    }
}

// ============ Ollama ============

#[derive(Clone)]
pub struct OllamaChat {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
    max_tool_rounds: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// One `/api/chat` response object (the whole body, or one NDJSON line).
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<Message>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tool_rounds: config.max_tool_rounds,
            timeout,
        })
    }

    fn request<'a>(
        &'a self,
        messages: &'a [Message],
        stream: bool,
        tools: Vec<Value>,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            stream,
            tools,
            options: ChatOptions {
                temperature: self.temperature,
            },
        }
    }

    fn tool_schemas(&self, tools: &ToolRegistry, round: usize) -> Vec<Value> {
        if round < self.max_tool_rounds {
            tools.ollama_schemas()
        } else {
            Vec::new()
        }
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let builder = self.client.post(&self.url).json(request);
        let sent = if request.stream {
            tokio::time::timeout(self.timeout, builder.send())
                .await
                .map_err(|_| Error::generation("Ollama did not start streaming in time"))?
        } else {
            builder.timeout(self.timeout).send().await
        };
        let response =
            sent.map_err(|e| Error::generation(format!("Ollama request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::generation(format!(
                "Ollama returned HTTP {}: {}",
                status, body
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationProvider for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, messages: &[Message], tools: &ToolRegistry) -> Result<String> {
        let mut conversation = messages.to_vec();
        let mut round = 0;
        loop {
            let schemas = self.tool_schemas(tools, round);
            let offered_tools = !schemas.is_empty();
            let request = self.request(&conversation, false, schemas);
            let chunk: ChatChunk = self
                .send(&request)
                .await?
                .json()
                .await
                .map_err(|e| Error::generation(format!("invalid Ollama response: {}", e)))?;
            if let Some(err) = chunk.error {
                return Err(Error::generation(err));
            }
            let reply = chunk
                .message
                .ok_or_else(|| Error::generation("Ollama response has no message"))?;

            if reply.tool_calls.is_empty() || !offered_tools {
                return Ok(reply.content);
            }

            tracing::debug!(round, calls = reply.tool_calls.len(), "model requested tools");
            let results = run_tool_calls(tools, &reply.tool_calls).await;
            conversation.push(reply);
            conversation.extend(results);
            round += 1;
        }
    }

    async fn generate_stream(
        &self,
        messages: Vec<Message>,
        tools: Arc<ToolRegistry>,
    ) -> Result<FragmentStream> {
        let schemas = self.tool_schemas(&tools, 0);
        let response = self.send(&self.request(&messages, true, schemas)).await?;

        let state = StreamState {
            chat: self.clone(),
            conversation: messages,
            tools,
            round: 0,
            body: Some(byte_stream(response)),
            lines: LineBuffer::default(),
            reply_text: String::new(),
            pending_calls: Vec::new(),
            finished: false,
        };

        Ok(stream::unfold(state, |mut state| async move {
            let item = state.next_fragment().await?;
            Some((item, state))
        })
        .boxed())
    }
}

fn byte_stream(response: reqwest::Response) -> BoxStream<'static, reqwest::Result<Vec<u8>>> {
    response
        .bytes_stream()
        .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
        .boxed()
}

/// Accumulates bytes and yields complete lines.
#[derive(Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Next complete (newline-terminated) line, without the newline.
    pub fn next_line(&mut self) -> Option<String> {
        let idx = self.buf.iter().position(|&b| b == b'\n')?;
        let line: Vec<u8> = self.buf.drain(..=idx).collect();
        Some(String::from_utf8_lossy(&line[..idx]).into_owned())
    }

    /// Whatever is left once the body has ended.
    pub fn take_rest(&mut self) -> Option<String> {
        if self.buf.iter().all(|b| b.is_ascii_whitespace()) {
            self.buf.clear();
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

struct StreamState {
    chat: OllamaChat,
    conversation: Vec<Message>,
    tools: Arc<ToolRegistry>,
    round: usize,
    body: Option<BoxStream<'static, reqwest::Result<Vec<u8>>>>,
    lines: LineBuffer,
    reply_text: String,
    pending_calls: Vec<ToolCall>,
    finished: bool,
}

impl StreamState {
    /// Next non-empty fragment, an error, or `None` when the answer is complete.
    async fn next_fragment(&mut self) -> Option<Result<String>> {
        loop {
            if self.finished {
                return None;
            }

            if let Some(line) = self.lines.next_line() {
                match self.handle_line(&line) {
                    Ok(Some(text)) => return Some(Ok(text)),
                    Ok(None) => continue,
                    Err(e) => return Some(self.fail(e)),
                }
            }

            let Some(body) = self.body.as_mut() else {
                if let Err(e) = self.next_round().await {
                    return Some(self.fail(e));
                }
                continue;
            };
            let next = match tokio::time::timeout(self.chat.timeout, body.next()).await {
                Ok(next) => next,
                Err(_) => {
                    return Some(self.fail(Error::generation(format!(
                        "stream stalled for more than {}s",
                        self.chat.timeout.as_secs()
                    ))))
                }
            };
            match next {
                Some(Ok(bytes)) => self.lines.push(&bytes),
                Some(Err(e)) => {
                    return Some(self.fail(Error::generation(format!("stream interrupted: {}", e))))
                }
                None => {
                    self.body = None;
                    if let Some(rest) = self.lines.take_rest() {
                        match self.handle_line(&rest) {
                            Ok(Some(text)) => return Some(Ok(text)),
                            Ok(None) => {}
                            Err(e) => return Some(self.fail(e)),
                        }
                    }
                }
            }
        }
    }

    /// Parse one NDJSON line, returning any text it carries.
    fn handle_line(&mut self, line: &str) -> Result<Option<String>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let chunk: ChatChunk = serde_json::from_str(line)
            .map_err(|e| Error::generation(format!("invalid stream line: {}", e)))?;
        if let Some(err) = chunk.error {
            return Err(Error::generation(err));
        }
        let Some(message) = chunk.message else {
            return Ok(None);
        };
        self.pending_calls.extend(message.tool_calls);
        if message.content.is_empty() {
            return Ok(None);
        }
        self.reply_text.push_str(&message.content);
        Ok(Some(message.content))
    }

    /// The current response body ended: run requested tools and reopen, or finish.
    async fn next_round(&mut self) -> Result<()> {
        if self.pending_calls.is_empty() || self.round >= self.chat.max_tool_rounds {
            self.finished = true;
            return Ok(());
        }

        let calls = std::mem::take(&mut self.pending_calls);
        tracing::debug!(round = self.round, calls = calls.len(), "model requested tools mid-stream");
        let results = run_tool_calls(&self.tools, &calls).await;
        self.conversation.push(Message {
            role: Role::Assistant,
            content: std::mem::take(&mut self.reply_text),
            tool_calls: calls,
        });
        self.conversation.extend(results);
        self.round += 1;

        let schemas = self.chat.tool_schemas(&self.tools, self.round);
        let response = self
            .chat
            .send(&self.chat.request(&self.conversation, true, schemas))
            .await?;
        self.body = Some(byte_stream(response));
        Ok(())
    }

    fn fail(&mut self, e: Error) -> Result<String> {
        self.finished = true;
        self.body = None;
        Err(e)
    }
}

/// Instantiate the configured [`GenerationProvider`].
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn GenerationProvider>> {
    match config.provider.as_str() {
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        other => Err(Error::Config(format!("Unknown llm provider: {}", other))),
    }
}
