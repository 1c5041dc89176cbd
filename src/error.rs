//! Error taxonomy for ingestion, retrieval and answering.
//!
//! Every variant is classified as either client-correctable (bad input,
//! nothing ingested yet) or server-side (persistence, model backends), so
//! callers can tell "ingest first" apart from "retry later".
//!
//! # HTTP mapping
//!
//! | Variant | Status | Code |
//! |---------|--------|------|
//! | `IngestionParse`, `UnsupportedDocument`, `EmptyDocument` | 400 | `parse_error` / `unsupported_document` / `empty_document` |
//! | `InvalidRequest` | 400 | `bad_request` |
//! | `NotIngested` | 400 | `not_ingested` |
//! | `Persistence` | 500 | `persistence_error` |
//! | `IndexBuild`, `Embedding`, `Generation` | 503 | `index_build_error` / `embedding_error` / `generation_error` |
//! | `Tool`, `Config` | 500 | `tool_error` / `config_error` |

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Hint returned alongside [`Error::NotIngested`].
pub const INGEST_HINT: &str = "Please ingest at least one document via /ingest first.";

#[derive(Debug, Error)]
pub enum Error {
    /// The uploaded document could not be parsed.
    #[error("failed to parse '{filename}': {message}")]
    IngestionParse { filename: String, message: String },

    #[error("unsupported document type: {0}")]
    UnsupportedDocument(String),

    /// Extraction succeeded but produced no text to index.
    #[error("document '{0}' contains no extractable text")]
    EmptyDocument(String),

    /// Corpus read/write failure.
    #[error("corpus persistence failed: {0}")]
    Persistence(String),

    #[error("no documents have been ingested yet")]
    NotIngested,

    /// Semantic index construction failed. Absorbed by retrieval.
    #[error("semantic index build failed: {0}")]
    IndexBuild(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn parse(filename: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IngestionParse {
            filename: filename.into(),
            message: message.into(),
        }
    }

    pub fn persistence(message: impl std::fmt::Display) -> Self {
        Self::Persistence(message.to_string())
    }

    pub fn generation(message: impl std::fmt::Display) -> Self {
        Self::Generation(message.to_string())
    }

    pub fn embedding(message: impl std::fmt::Display) -> Self {
        Self::Embedding(message.to_string())
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Error::IngestionParse { .. } => "parse_error",
            Error::UnsupportedDocument(_) => "unsupported_document",
            Error::EmptyDocument(_) => "empty_document",
            Error::Persistence(_) => "persistence_error",
            Error::NotIngested => "not_ingested",
            Error::IndexBuild(_) => "index_build_error",
            Error::Embedding(_) => "embedding_error",
            Error::Generation(_) => "generation_error",
            Error::Tool { .. } => "tool_error",
            Error::InvalidRequest(_) => "bad_request",
            Error::Config(_) => "config_error",
        }
    }

    /// True when the caller can fix the problem by changing the request
    /// (or by ingesting first) rather than by retrying.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::IngestionParse { .. }
                | Error::UnsupportedDocument(_)
                | Error::EmptyDocument(_)
                | Error::NotIngested
                | Error::InvalidRequest(_)
        )
    }

    pub fn status(&self) -> StatusCode {
        match self {
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            Error::IndexBuild(_) | Error::Embedding(_) | Error::Generation(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

/// JSON error envelope: `{ "error": { "code", "message", "hint"? } }`.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<&'static str>,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let hint = matches!(self, Error::NotIngested).then_some(INGEST_HINT);
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.to_string(),
                hint,
            },
        };
        (self.status(), Json(body)).into_response()
    }
}
