//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: always fails; retrieval then degrades to lexical-only.
//! - **[`OllamaProvider`]**: calls a local Ollama server (`POST /api/embeddings`).
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with batching.
//!
//! Also provides [`cosine_similarity`] for the semantic index.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the appropriate provider based
//! on the configuration:
//!
//! ```rust
//! # use lexcase::config::EmbeddingConfig;
//! # use lexcase::embedding::create_provider;
//! let config = EmbeddingConfig::default(); // ollama, nomic-embed-text
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "nomic-embed-text");
//! ```
//!
//! # Retry Strategy
//!
//! Remote providers retry transient failures with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, ... (capped at 2^5)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Text → vector capability.
///
/// Implementations must return one vector per input, in input order, all of
/// the same dimensionality.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;

    /// Embed a batch of texts.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text (e.g. a search query).
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("empty embedding response"))
    }
}

// ============ Disabled Provider ============

/// A no-op embedding provider that always returns errors.
///
/// Used when `embedding.provider = "disabled"` in the configuration.
pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::embedding("embedding provider is disabled"))
    }
}

// ============ Retry ============

/// Outcome of a single remote attempt.
enum Attempt<T> {
    Done(T),
    Retry(String),
    Fail(String),
}

async fn with_retry<T, F, Fut>(max_retries: u32, label: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Attempt<T>>,
{
    let mut last_err = None;
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::warn!(
                provider = label,
                attempt = attempt + 1,
                ?delay,
                "embedding request failed, retrying"
            );
            tokio::time::sleep(delay).await;
        }
        match op().await {
            Attempt::Done(v) => return Ok(v),
            Attempt::Retry(msg) => last_err = Some(msg),
            Attempt::Fail(msg) => return Err(Error::Embedding(msg)),
        }
    }
    Err(Error::Embedding(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", label)
    })))
}

fn classify_status(status: reqwest::StatusCode, body: String, label: &str) -> String {
    format!("{} API error {}: {}", label, status, body)
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))
}

// ============ Ollama Provider ============

/// Embedding provider backed by a local Ollama server.
///
/// Ollama's `/api/embeddings` endpoint takes one prompt per request, so a
/// batch is embedded sequentially.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_retries: u32,
}

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embedding: Vec<f32>,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Config("embedding.model required for Ollama provider".into()))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model,
            max_retries: config.max_retries,
        })
    }

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/api/embeddings", self.base_url);
        let url = url.as_str();
        let this = self;
        with_retry(self.max_retries, "Ollama", move || async move {
            let request = OllamaEmbedRequest {
                model: &this.model,
                prompt: text,
            };
            let response = match this.client.post(url).json(&request).send().await {
                Ok(r) => r,
                Err(e) => return Attempt::Retry(format!("Ollama request failed: {}", e)),
            };
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let msg = classify_status(status, body, "Ollama");
                return if status.as_u16() == 429 || status.is_server_error() {
                    Attempt::Retry(msg)
                } else {
                    Attempt::Fail(msg)
                };
            }
            match response.json::<OllamaEmbedResponse>().await {
                Ok(parsed) if !parsed.embedding.is_empty() => Attempt::Done(parsed.embedding),
                Ok(_) => Attempt::Fail("Ollama returned an empty embedding".into()),
                Err(e) => Attempt::Fail(format!("invalid Ollama response: {}", e)),
            }
        })
        .await
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed_one(text).await?);
        }
        Ok(out)
    }
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST /v1/embeddings` with the configured model. Requires the
/// `OPENAI_API_KEY` environment variable.
pub struct OpenAIProvider {
    client: reqwest::Client,
    model: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAIProvider {
    /// # Errors
    ///
    /// Returns an error if `model` is not set in config, or if
    /// `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::Config("embedding.model required for OpenAI provider".into()))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::Config("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self {
            client: http_client(config.timeout_secs)?,
            model,
            api_key,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let body = &body;
        let this = self;
        with_retry(self.max_retries, "OpenAI", move || async move {
            let response = match this
                .client
                .post("https://api.openai.com/v1/embeddings")
                .header("Authorization", format!("Bearer {}", this.api_key))
                .json(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => return Attempt::Retry(format!("OpenAI request failed: {}", e)),
            };
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let msg = classify_status(status, body, "OpenAI");
                return if status.as_u16() == 429 || status.is_server_error() {
                    Attempt::Retry(msg)
                } else {
                    Attempt::Fail(msg)
                };
            }
            match response.json::<serde_json::Value>().await {
                Ok(json) => match parse_openai_response(&json) {
                    Ok(v) => Attempt::Done(v),
                    Err(e) => Attempt::Fail(e),
                },
                Err(e) => Attempt::Fail(format!("invalid OpenAI response: {}", e)),
            }
        })
        .await
    }
}

/// Extract the `data[].embedding` arrays, ordered by their `index` field.
fn parse_openai_response(json: &serde_json::Value) -> std::result::Result<Vec<Vec<f32>>, String> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or("Invalid OpenAI response: missing data array")?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or("Invalid OpenAI response: missing embedding")?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Create the appropriate [`EmbeddingProvider`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledProvider)),
        "ollama" => Ok(Arc::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Arc::new(OpenAIProvider::new(config)?)),
        other => Err(Error::Config(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors or vectors
/// of different lengths.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[tokio::test]
    async fn test_disabled_provider_fails_with_embedding_error() {
        let err = DisabledProvider.embed("contract").await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[test]
    fn test_create_provider_requires_model() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: None,
            ..Default::default()
        };
        assert!(matches!(create_provider(&config), Err(Error::Config(_))));
    }

    #[test]
    fn test_openai_response_reordered_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vecs = parse_openai_response(&json).unwrap();
        assert_eq!(vecs, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_embedding_error() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            base_url: "http://127.0.0.1:9".to_string(),
            max_retries: 0,
            timeout_secs: 2,
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        let err = provider.embed("tort").await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }
}
