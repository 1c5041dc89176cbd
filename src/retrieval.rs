//! Rank fusion over the lexical and semantic indexes.
//!
//! A [`RetrievalEngine`] bundles both indexes over one corpus snapshot.
//! Queries run a lexical and a semantic lookup and merge the two ranked
//! lists with weighted reciprocal-rank fusion:
//!
//! ```text
//! score(d) = Σ_i  w_i / (rrf_k + rank_i(d))        rank is 1-based
//! ```
//!
//! A chunk found by both lookups accumulates both terms and is boosted; a
//! chunk found by one keeps its single weighted term. Ties are broken by
//! corpus position.
//!
//! # Degradation
//!
//! If the semantic index cannot be built, or the query itself cannot be
//! embedded, retrieval returns the lexical ranking unchanged.
//!
//! # Caching
//!
//! [`IndexCache`] keeps the last fully built engine and reuses it until the
//! corpus version changes. Lexical-only engines are never cached, so a
//! transient embedding outage does not pin degraded results.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::corpus::CorpusStore;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::lexical::LexicalIndex;
use crate::models::Chunk;
use crate::semantic::SemanticIndex;

/// Separator between chunk texts in the prompt context.
pub const CONTEXT_SEPARATOR: &str = "\n---\n";

/// Tunables for building and querying a [`RetrievalEngine`].
#[derive(Debug, Clone)]
pub struct RetrievalParams {
    pub top_k: usize,
    pub semantic_weight: f64,
    pub lexical_weight: f64,
    pub rrf_k: f64,
    pub embed_batch_size: usize,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self::from_config(&Config::minimal())
    }
}

impl RetrievalParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            top_k: config.retrieval.top_k,
            semantic_weight: config.retrieval.semantic_weight,
            lexical_weight: config.retrieval.lexical_weight,
            rrf_k: config.retrieval.rrf_k,
            embed_batch_size: config.embedding.batch_size,
        }
    }
}

/// One fused hit.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    /// Position of the chunk in the corpus.
    pub position: usize,
    pub chunk: Chunk,
    pub score: f64,
}

pub struct RetrievalEngine {
    chunks: Arc<Vec<Chunk>>,
    lexical: LexicalIndex,
    semantic: Option<SemanticIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    params: RetrievalParams,
}

impl RetrievalEngine {
    /// Load the corpus and build both indexes.
    ///
    /// Fails with [`Error::NotIngested`] before any index work if the corpus
    /// is empty. A semantic build failure is logged and absorbed.
    pub async fn build(
        store: &CorpusStore,
        embedder: Arc<dyn EmbeddingProvider>,
        params: RetrievalParams,
    ) -> Result<Self> {
        let chunks = Arc::new(store.load_all().await?);

        let lexical = {
            let chunks = chunks.clone();
            tokio::task::spawn_blocking(move || LexicalIndex::build(&chunks))
                .await
                .map_err(|e| Error::IndexBuild(format!("lexical index task failed: {}", e)))?
        };

        let semantic =
            match SemanticIndex::build(&chunks, embedder.as_ref(), params.embed_batch_size).await {
                Ok(index) => Some(index),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        model = embedder.model_name(),
                        "semantic index unavailable, falling back to lexical retrieval"
                    );
                    None
                }
            };

        tracing::debug!(
            chunks = chunks.len(),
            semantic = semantic.is_some(),
            "retrieval engine built"
        );

        Ok(Self {
            chunks,
            lexical,
            semantic,
            embedder,
            params,
        })
    }

    /// True when both indexes are available.
    pub fn is_complete(&self) -> bool {
        self.semantic.is_some()
    }

    pub fn corpus_len(&self) -> usize {
        self.chunks.len()
    }

    /// Fused ranking for `query`, best first.
    pub async fn retrieve(&self, query: &str) -> Vec<RetrievedChunk> {
        let k = self.params.top_k;
        let lexical_hits = self.lexical.search(query, k);

        let semantic_hits = match &self.semantic {
            Some(index) => match self.embedder.embed(query).await {
                Ok(vector) => Some(index.search(&vector, k)),
                Err(e) => {
                    tracing::warn!(error = %e, "query embedding failed, using lexical ranking");
                    None
                }
            },
            None => None,
        };

        let fused = semantic_hits.is_some();
        let ranked: Vec<(usize, f64)> = match semantic_hits {
            Some(semantic_hits) => {
                let semantic: Vec<usize> = semantic_hits.iter().map(|(p, _)| *p).collect();
                let lexical: Vec<usize> = lexical_hits.iter().map(|(p, _)| *p).collect();
                weighted_rrf(
                    &[
                        (semantic.as_slice(), self.params.semantic_weight),
                        (lexical.as_slice(), self.params.lexical_weight),
                    ],
                    self.params.rrf_k,
                )
            }
            None => lexical_hits,
        };

        // Re-ingested documents repeat chunk text at new positions; the fused
        // list keeps only the best-ranked copy of each text.
        let mut seen = HashSet::new();
        ranked
            .into_iter()
            .filter_map(|(position, score)| {
                let chunk = self.chunks.get(position)?;
                if fused && !seen.insert(chunk.text.as_str()) {
                    return None;
                }
                Some(RetrievedChunk {
                    position,
                    chunk: chunk.clone(),
                    score,
                })
            })
            .collect()
    }
}

/// Weighted reciprocal-rank fusion of several ranked position lists.
///
/// Each input list is best-first. The output contains every position that
/// appears in any list, best first, ties broken by ascending position.
pub fn weighted_rrf(lists: &[(&[usize], f64)], rrf_k: f64) -> Vec<(usize, f64)> {
    let mut scores: Vec<(usize, f64)> = Vec::new();
    for (list, weight) in lists {
        for (rank, &position) in list.iter().enumerate() {
            let contribution = weight / (rrf_k + (rank + 1) as f64);
            match scores.iter_mut().find(|(p, _)| *p == position) {
                Some((_, score)) => *score += contribution,
                None => scores.push((position, contribution)),
            }
        }
    }
    scores.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scores
}

/// Join chunk texts into the prompt context, preserving rank order.
pub fn context_string(hits: &[RetrievedChunk]) -> String {
    hits.iter()
        .map(|h| h.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

/// Reuses a fully built engine while the corpus is unchanged.
///
/// The lock only guards the slot. Builds run outside it, so concurrent
/// queries never wait on each other's embedding calls.
pub struct IndexCache {
    enabled: bool,
    slot: Mutex<Option<(u64, Arc<RetrievalEngine>)>>,
}

impl IndexCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            slot: Mutex::new(None),
        }
    }

    /// Return an engine consistent with the latest corpus, building one if
    /// the cached engine is stale, degraded or absent.
    pub async fn engine(
        &self,
        store: &CorpusStore,
        embedder: Arc<dyn EmbeddingProvider>,
        params: &RetrievalParams,
    ) -> Result<Arc<RetrievalEngine>> {
        if !self.enabled {
            return Ok(Arc::new(
                RetrievalEngine::build(store, embedder, params.clone()).await?,
            ));
        }

        // Read the version before loading so a concurrent append can only
        // make the cached stamp look older than the engine, never newer.
        let version = store.version().await?;
        if let Some(engine) = self.cached(version) {
            tracing::debug!(version, "reusing cached retrieval engine");
            return Ok(engine);
        }

        let engine = Arc::new(RetrievalEngine::build(store, embedder, params.clone()).await?);
        if engine.is_complete() {
            self.store_if_newer(version, &engine);
        }
        Ok(engine)
    }

    fn cached(&self, version: u64) -> Option<Arc<RetrievalEngine>> {
        let slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_ref() {
            Some((cached_version, engine)) if *cached_version == version => Some(engine.clone()),
            _ => None,
        }
    }

    fn store_if_newer(&self, version: u64, engine: &Arc<RetrievalEngine>) {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        let newer = slot
            .as_ref()
            .map_or(true, |(cached_version, _)| *cached_version <= version);
        if newer {
            *slot = Some((version, engine.clone()));
        }
    }
}
