//! Core data models shared by ingestion, retrieval and the HTTP surface.
//!
//! [`Chunk`] is the unit of the corpus; the request/response types mirror
//! the JSON bodies accepted and produced by the server.

use serde::{Deserialize, Serialize};

/// Where a chunk came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path (or upload filename) of the source document.
    pub source_path: String,
    /// 1-based page number within the source document.
    pub page_number: u32,
}

/// A bounded span of extracted document text. Immutable once created;
/// its identity is its position in the corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: ChunkMetadata,
}

/// Text of one extracted page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based.
    pub page_number: u32,
    pub text: String,
}

/// Legal case categories recognised by session memory, in match priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaseType {
    Contract,
    Tort,
    Criminal,
    Constitutional,
    Property,
    Tax,
}

impl CaseType {
    pub const ALL: [CaseType; 6] = [
        CaseType::Contract,
        CaseType::Tort,
        CaseType::Criminal,
        CaseType::Constitutional,
        CaseType::Property,
        CaseType::Tax,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaseType::Contract => "contract",
            CaseType::Tort => "tort",
            CaseType::Criminal => "criminal",
            CaseType::Constitutional => "constitutional",
            CaseType::Property => "property",
            CaseType::Tax => "tax",
        }
    }
}

impl std::fmt::Display for CaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub const DEFAULT_USER: &str = "default_user";

fn user_or_default(user_id: &Option<String>) -> &str {
    user_id.as_deref().unwrap_or(DEFAULT_USER)
}

/// Result of ingesting one document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReport {
    /// Chunks produced from this document.
    pub chunks: usize,
    /// Corpus size after the append.
    pub corpus_total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    /// Absent or `null` means [`DEFAULT_USER`].
    #[serde(default)]
    pub user_id: Option<String>,
}

impl QueryRequest {
    pub fn user_id(&self) -> &str {
        user_or_default(&self.user_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamParams {
    pub query: String,
    /// Absent or `null` means [`DEFAULT_USER`].
    #[serde(default)]
    pub user_id: Option<String>,
}

impl StreamParams {
    pub fn user_id(&self) -> &str {
        user_or_default(&self.user_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    /// Provenance of the chunks used as context, in fused rank order.
    pub sources: Vec<ChunkMetadata>,
    pub meta: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackRequest {
    pub query: String,
    pub rating: u8,
    /// Absent or `null` means [`DEFAULT_USER`].
    #[serde(default)]
    pub user_id: Option<String>,
}

impl FeedbackRequest {
    pub fn user_id(&self) -> &str {
        user_or_default(&self.user_id)
    }
}

/// Outcome of a feedback call: either a healed answer or an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedbackOutcome {
    pub healed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FeedbackOutcome {
    pub fn healed(answer: String) -> Self {
        Self {
            healed: true,
            answer: Some(answer),
            message: None,
        }
    }

    pub fn acknowledged() -> Self {
        Self {
            healed: false,
            answer: None,
            message: Some("Thanks for your feedback".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_request_defaults_user() {
        let req: QueryRequest = serde_json::from_str(r#"{"query":"q"}"#).unwrap();
        assert_eq!(req.user_id(), DEFAULT_USER);
    }

    #[test]
    fn null_user_id_means_default_user() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"query":"q","user_id":null}"#).unwrap();
        assert_eq!(req.user_id(), DEFAULT_USER);

        let req: FeedbackRequest =
            serde_json::from_str(r#"{"query":"q","rating":2,"user_id":null}"#).unwrap();
        assert_eq!(req.user_id(), DEFAULT_USER);

        let req: QueryRequest =
            serde_json::from_str(r#"{"query":"q","user_id":"u7"}"#).unwrap();
        assert_eq!(req.user_id(), "u7");
    }

    #[test]
    fn feedback_outcome_shapes() {
        let ack = serde_json::to_value(FeedbackOutcome::acknowledged()).unwrap();
        assert_eq!(ack["healed"], false);
        assert!(ack.get("answer").is_none());

        let healed = serde_json::to_value(FeedbackOutcome::healed("a".into())).unwrap();
        assert_eq!(healed["healed"], true);
        assert_eq!(healed["answer"], "a");
        assert!(healed.get("message").is_none());
    }
}
