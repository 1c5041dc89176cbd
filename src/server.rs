//! HTTP surface.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Service banner and endpoint list |
//! | `GET`  | `/health` | Health check (corpus path, version) |
//! | `POST` | `/ingest` | Multipart upload (`file` field) of one document |
//! | `POST` | `/query` | Answer a query |
//! | `POST` | `/summary` | Same as `/query`, tagged `meta.alias = "summary"` |
//! | `GET`  | `/query_stream?query=&user_id=` | Plain-text fragment stream |
//! | `POST` | `/feedback` | Rate an answer; low ratings heal |
//! | `GET`  | `/feedback/stats` | Rating distribution per case key |
//!
//! # Error Contract
//!
//! Errors use the envelope produced by [`Error`]'s `IntoResponse`:
//!
//! ```json
//! { "error": { "code": "not_ingested", "message": "...", "hint": "Please ingest at least one document via /ingest first." } }
//! ```
//!
//! A stream that fails after it started ends with an in-band
//! `"\n[stream-error] ..."` line instead, since the status line has already
//! been sent.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser UI on
//! another port can call the API.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::corpus::CorpusStore;
use crate::error::{Error, Result};
use crate::feedback::{FeedbackHealer, RatingTally};
use crate::ingest::ingest_document;
use crate::memory::SessionMemory;
use crate::models::{FeedbackOutcome, FeedbackRequest, IngestReport, QueryRequest, QueryResponse, StreamParams};
use crate::pipeline::AnswerPipeline;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pipeline: Arc<AnswerPipeline>,
    pub memory: Arc<SessionMemory>,
    pub healer: Arc<FeedbackHealer>,
}

impl AppState {
    /// Assemble state around an existing pipeline (used by tests with fake providers).
    pub fn new(config: Config, pipeline: Arc<AnswerPipeline>) -> Self {
        let memory = Arc::new(SessionMemory::new());
        let healer = Arc::new(FeedbackHealer::new(
            pipeline.clone(),
            memory.clone(),
            Arc::new(RatingTally::new()),
            &config.feedback,
        ));
        Self {
            config: Arc::new(config),
            pipeline,
            memory,
            healer,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Arc::new(CorpusStore::open(&config.corpus.path));
        let pipeline = Arc::new(AnswerPipeline::from_config(config, store)?);
        Ok(Self::new(config.clone(), pipeline))
    }
}

/// Build the router with all routes, CORS and request tracing.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let upload_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/ingest", post(handle_ingest))
        .route("/query", post(handle_query))
        .route("/summary", post(handle_summary))
        .route("/query_stream", get(handle_query_stream))
        .route("/feedback", post(handle_feedback))
        .route("/feedback/stats", get(handle_feedback_stats))
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, corpus = %config.corpus.path.display(), "server listening");
    println!("lexcase listening on http://{}", config.server.bind);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Handlers ============

async fn handle_root() -> Json<Value> {
    Json(json!({
        "message": "Legal case research API",
        "endpoints": [
            "GET /health",
            "POST /ingest",
            "POST /query",
            "POST /summary",
            "GET /query_stream",
            "POST /feedback",
            "GET /feedback/stats"
        ]
    }))
}

async fn handle_health(State(state): State<AppState>) -> Json<Value> {
    let path = state.pipeline.store().path();
    let data_path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    Json(json!({
        "status": "ok",
        "data_path": data_path.display().to_string(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Error::InvalidRequest(format!("invalid multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| Error::InvalidRequest("file field has no filename".into()))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Error::InvalidRequest(format!("failed to read upload: {}", e)))?;

        let report = ingest_document(
            state.pipeline.store(),
            &state.config.chunking,
            &filename,
            bytes.to_vec(),
        )
        .await?;
        return Ok(Json(report));
    }
    Err(Error::InvalidRequest(
        "multipart body must contain a 'file' field".into(),
    ))
}

async fn answer_query(state: &AppState, request: &QueryRequest, meta: Value) -> Result<QueryResponse> {
    let history = state.memory.build_history(request.user_id(), &request.query);
    let answer = state
        .pipeline
        .answer_with_sources(&request.query, &history)
        .await?;
    Ok(QueryResponse {
        answer: answer.text,
        sources: answer.sources,
        meta,
    })
}

async fn handle_query(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    answer_query(&state, &request, json!({ "healed": false }))
        .await
        .map(Json)
}

async fn handle_summary(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>> {
    answer_query(&state, &request, json!({ "alias": "summary", "healed": false }))
        .await
        .map(Json)
}

async fn handle_query_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Result<Response> {
    let history = state.memory.build_history(params.user_id(), &params.query);
    let stream = state.pipeline.stream(&params.query, &history).await?;
    let body = Body::from_stream(stream.map(Ok::<_, Infallible>));
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response())
}

async fn handle_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackOutcome>> {
    state
        .healer
        .handle(&request.query, request.rating, request.user_id())
        .await
        .map(Json)
}

async fn handle_feedback_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "case_key": state.healer.case_key(),
        "ratings": state.healer.tally().snapshot(),
    }))
}
