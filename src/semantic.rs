//! Vector index over the corpus, built by embedding every chunk.
//!
//! Construction depends on an external model being reachable, so any
//! failure is reported as [`Error::IndexBuild`] for the retrieval engine to
//! absorb.

use crate::embedding::{cosine_similarity, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::Chunk;

pub struct SemanticIndex {
    vectors: Vec<Vec<f32>>,
    dims: usize,
}

impl SemanticIndex {
    /// Embed every chunk in batches of `batch_size`.
    pub async fn build(
        chunks: &[Chunk],
        embedder: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = embedder
                .embed_batch(&texts)
                .await
                .map_err(|e| Error::IndexBuild(e.to_string()))?;
            if embedded.len() != texts.len() {
                return Err(Error::IndexBuild(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    texts.len()
                )));
            }
            vectors.extend(embedded);
            tokio::task::yield_now().await;
        }

        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        if vectors.iter().any(|v| v.len() != dims || v.is_empty()) {
            return Err(Error::IndexBuild(
                "embedding vectors have inconsistent dimensionality".into(),
            ));
        }

        tracing::debug!(
            chunks = vectors.len(),
            dims,
            model = embedder.model_name(),
            "semantic index built"
        );
        Ok(Self { vectors, dims })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Top-`k` corpus positions by cosine similarity to `query`, best first.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if query.len() != self.dims {
            tracing::warn!(
                query_dims = query.len(),
                index_dims = self.dims,
                "query embedding dimensionality mismatch"
            );
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_similarity(query, v)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;
    use async_trait::async_trait;

    /// Maps a text to a vector by counting a few marker words.
    struct KeywordEmbedder;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedder {
        fn model_name(&self) -> &str {
            "keyword"
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    ["money", "injury", "land"]
                        .iter()
                        .map(|w| t.matches(w).count() as f32 + 0.01)
                        .collect()
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(Error::embedding("connection refused"))
        }
    }

    fn corpus(texts: &[&str]) -> Vec<Chunk> {
        texts
            .iter()
            .map(|t| Chunk {
                text: t.to_string(),
                metadata: ChunkMetadata {
                    source_path: "c.pdf".into(),
                    page_number: 1,
                },
            })
            .collect()
    }

    #[tokio::test]
    async fn test_nearest_neighbour_ranks_first() {
        let chunks = corpus(&["money owed", "personal injury claim", "land registry"]);
        let index = SemanticIndex::build(&chunks, &KeywordEmbedder, 2).await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.dims(), 3);

        let q = KeywordEmbedder.embed("injury").await.unwrap();
        let hits = index.search(&q, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 1);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_index_build_error() {
        let chunks = corpus(&["anything"]);
        let err = SemanticIndex::build(&chunks, &FailingEmbedder, 8)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::IndexBuild(_)));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_returns_nothing() {
        let chunks = corpus(&["money"]);
        let index = SemanticIndex::build(&chunks, &KeywordEmbedder, 8).await.unwrap();
        assert!(index.search(&[1.0, 0.0], 1).is_empty());
    }
}
