use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorpusConfig {
    #[serde(default = "default_corpus_path")]
    pub path: PathBuf,
}

impl Default for CorpusConfig {
    fn default() -> Self {
        Self {
            path: default_corpus_path(),
        }
    }
}

fn default_corpus_path() -> PathBuf {
    PathBuf::from("data/corpus.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    900
}
fn default_overlap_chars() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_semantic_weight")]
    pub semantic_weight: f64,
    #[serde(default = "default_lexical_weight")]
    pub lexical_weight: f64,
    /// Rank offset in the reciprocal-rank fusion formula.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Reuse built indexes until the corpus changes.
    #[serde(default = "default_true")]
    pub cache_indexes: bool,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            semantic_weight: default_semantic_weight(),
            lexical_weight: default_lexical_weight(),
            rrf_k: default_rrf_k(),
            cache_indexes: true,
        }
    }
}

fn default_top_k() -> usize {
    6
}
fn default_semantic_weight() -> f64 {
    0.55
}
fn default_lexical_weight() -> f64 {
    0.45
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            base_url: default_ollama_url(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("nomic-embed-text".to_string())
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    2
}
fn default_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on model-requested tool rounds per answer.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            base_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            max_tool_rounds: default_max_tool_rounds(),
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "mistral:7b".to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    300
}
fn default_max_tool_rounds() -> usize {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedbackConfig {
    /// Ratings strictly below this value trigger healing.
    #[serde(default = "default_heal_below")]
    pub heal_below: u8,
    #[serde(default = "default_case_key")]
    pub case_key: String,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            heal_below: default_heal_below(),
            case_key: default_case_key(),
        }
    }
}

fn default_heal_below() -> u8 {
    3
}
fn default_case_key() -> String {
    "default".to_string()
}

impl Config {
    /// Fully defaulted configuration, used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Apply process environment overrides (`OLLAMA_BASE_URL`, `OLLAMA_MODEL`,
    /// `OLLAMA_EMBED_MODEL`, `LEXCASE_DATA`).
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("OLLAMA_BASE_URL") {
            self.llm.base_url = url.clone();
            if self.embedding.provider == "ollama" {
                self.embedding.base_url = url;
            }
        }
        if let Some(model) = lookup("OLLAMA_MODEL") {
            self.llm.model = model;
        }
        if let Some(model) = lookup("OLLAMA_EMBED_MODEL") {
            self.embedding.model = Some(model);
        }
        if let Some(path) = lookup("LEXCASE_DATA") {
            self.corpus.path = PathBuf::from(path);
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.max_chars == 0 {
            anyhow::bail!("chunking.max_chars must be > 0");
        }
        if self.chunking.overlap_chars >= self.chunking.max_chars {
            anyhow::bail!("chunking.overlap_chars must be < chunking.max_chars");
        }

        // Validate retrieval
        if self.retrieval.top_k < 1 {
            anyhow::bail!("retrieval.top_k must be >= 1");
        }
        for (name, w) in [
            ("semantic_weight", self.retrieval.semantic_weight),
            ("lexical_weight", self.retrieval.lexical_weight),
        ] {
            if !(0.0..=1.0).contains(&w) {
                anyhow::bail!("retrieval.{} must be in [0.0, 1.0]", name);
            }
        }
        if self.retrieval.rrf_k < 0.0 {
            anyhow::bail!("retrieval.rrf_k must be >= 0");
        }

        // Validate embedding
        match self.embedding.provider.as_str() {
            "disabled" | "ollama" | "openai" => {}
            other => anyhow::bail!(
                "Unknown embedding provider: '{}'. Must be disabled, ollama, or openai.",
                other
            ),
        }
        if self.embedding.is_enabled() && self.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                self.embedding.provider
            );
        }
        if self.embedding.batch_size == 0 {
            anyhow::bail!("embedding.batch_size must be > 0");
        }

        match self.llm.provider.as_str() {
            "disabled" | "ollama" => {}
            other => anyhow::bail!(
                "Unknown llm provider: '{}'. Must be disabled or ollama.",
                other
            ),
        }

        if !(1..=5).contains(&self.feedback.heal_below) {
            anyhow::bail!("feedback.heal_below must be in [1, 5]");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.apply_env_overrides();
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_values() {
        let cfg = Config::minimal();
        assert_eq!(cfg.chunking.max_chars, 900);
        assert_eq!(cfg.chunking.overlap_chars, 150);
        assert_eq!(cfg.retrieval.top_k, 6);
        assert!((cfg.retrieval.semantic_weight - 0.55).abs() < 1e-9);
        assert!((cfg.retrieval.lexical_weight - 0.45).abs() < 1e-9);
        assert_eq!(cfg.feedback.heal_below, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_parses() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.llm.model, "mistral:7b");
        assert!(cfg.embedding.is_enabled());
    }

    #[test]
    fn test_semantic_retrieval_is_on_by_default() {
        let cfg = Config::minimal();
        assert_eq!(cfg.embedding.provider, "ollama");
        assert_eq!(cfg.embedding.model.as_deref(), Some("nomic-embed-text"));
        assert!(cfg.embedding.is_enabled());

        let off: Config = toml::from_str("[embedding]\nprovider = \"disabled\"\n").unwrap();
        assert!(!off.embedding.is_enabled());
        assert!(off.validate().is_ok());
    }

    #[test]
    fn test_overlap_must_be_smaller_than_max() {
        let mut cfg = Config::minimal();
        cfg.chunking.overlap_chars = 900;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_enabled_embedding_requires_model() {
        let mut cfg = Config::minimal();
        cfg.embedding.model = None;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let cfg: Config = toml::from_str("[embedding]\nprovider = \"magic\"\n").unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_overrides_apply() {
        let mut cfg: Config = toml::from_str(
            "[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\n",
        )
        .unwrap();
        cfg.apply_overrides(|key| match key {
            "OLLAMA_BASE_URL" => Some("http://gpu-box:11434".to_string()),
            "OLLAMA_MODEL" => Some("llama3".to_string()),
            _ => None,
        });
        assert_eq!(cfg.llm.base_url, "http://gpu-box:11434");
        assert_eq!(cfg.embedding.base_url, "http://gpu-box:11434");
        assert_eq!(cfg.llm.model, "llama3");
        assert_eq!(cfg.embedding.model.as_deref(), Some("nomic-embed-text"));
    }
}
