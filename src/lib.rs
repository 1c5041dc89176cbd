//! # lexcase
//!
//! Retrieval-augmented question answering over a corpus of legal cases.
//!
//! Documents (PDF, DOCX, plain text) are split into overlapping chunks and
//! appended to a local SQLite corpus. Queries are answered by fusing a BM25
//! lexical ranking with an embedding ranking (weighted reciprocal rank
//! fusion), packing the top chunks into a prompt, and asking a local chat
//! model that may call a citation lookup tool. Answers can be streamed.
//! Per-user session memory biases prompts toward the case type a user has
//! been asking about, and low ratings trigger one rewritten re-answer.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌──────────────┐
//! │  extract  │──▶│  chunk   │──▶│ CorpusStore  │
//! │ PDF/DOCX  │   │ overlap  │   │   (SQLite)   │
//! └───────────┘   └──────────┘   └──────┬───────┘
//!                                       │ load_all
//!                          ┌────────────┴────────────┐
//!                          ▼                         ▼
//!                   ┌────────────┐           ┌──────────────┐
//!                   │  lexical   │           │   semantic   │
//!                   │   (BM25)   │           │ (embeddings) │
//!                   └─────┬──────┘           └──────┬───────┘
//!                         └──────── RRF ────────────┘
//!                                    │
//!              SessionMemory ──▶ AnswerPipeline ──▶ chat model (+ tools)
//!                                    ▲
//!                             FeedbackHealer
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env overrides, validation |
//! | [`error`] | Error taxonomy and HTTP mapping |
//! | [`models`] | Core data types |
//! | [`extract`] | PDF / DOCX / text page extraction |
//! | [`chunk`] | Overlapping chunk splitter |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Schema migrations |
//! | [`corpus`] | Append-only chunk store |
//! | [`ingest`] | Ingestion orchestration |
//! | [`lexical`] | BM25 index |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`semantic`] | Embedding index |
//! | [`retrieval`] | Weighted RRF fusion and index cache |
//! | [`memory`] | Per-user case-type memory |
//! | [`tools`] | Tool trait, registry, citation lookup |
//! | [`llm`] | Chat model client, tool loop, streaming |
//! | [`pipeline`] | Answer pipeline and answer streams |
//! | [`feedback`] | Rating tally and healing |
//! | [`server`] | HTTP API |

pub mod chunk;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod feedback;
pub mod ingest;
pub mod lexical;
pub mod llm;
pub mod memory;
pub mod migrate;
pub mod models;
pub mod pipeline;
pub mod retrieval;
pub mod semantic;
pub mod server;
pub mod tools;
