//! In-memory BM25 index over the corpus.
//!
//! Rebuilt from the full corpus whenever a retrieval engine is constructed;
//! nothing but the corpus itself is persisted.
//!
//! # Scoring
//!
//! Okapi BM25 with `k1 = 1.5`, `b = 0.75` and the non-negative IDF
//! `ln(1 + (N - n + 0.5) / (n + 0.5))`. Tokens are lower-cased runs of
//! alphanumeric characters, so `"Contract,"` and `"contract"` match.

use std::collections::HashMap;

use crate::models::Chunk;

const K1: f64 = 1.5;
const B: f64 = 0.75;

pub struct LexicalIndex {
    /// Per-document term frequencies, indexed by corpus position.
    term_freqs: Vec<HashMap<String, u32>>,
    doc_lens: Vec<usize>,
    avg_doc_len: f64,
    doc_freq: HashMap<String, usize>,
}

/// Split text into lower-cased alphanumeric tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

impl LexicalIndex {
    pub fn build(chunks: &[Chunk]) -> Self {
        let mut term_freqs = Vec::with_capacity(chunks.len());
        let mut doc_lens = Vec::with_capacity(chunks.len());
        let mut doc_freq: HashMap<String, usize> = HashMap::new();

        for chunk in chunks {
            let tokens = tokenize(&chunk.text);
            doc_lens.push(tokens.len());
            let mut tf: HashMap<String, u32> = HashMap::new();
            for token in tokens {
                *tf.entry(token).or_insert(0) += 1;
            }
            for term in tf.keys() {
                *doc_freq.entry(term.clone()).or_insert(0) += 1;
            }
            term_freqs.push(tf);
        }

        let total: usize = doc_lens.iter().sum();
        let avg_doc_len = if doc_lens.is_empty() {
            0.0
        } else {
            total as f64 / doc_lens.len() as f64
        };

        Self {
            term_freqs,
            doc_lens,
            avg_doc_len,
            doc_freq,
        }
    }

    pub fn len(&self) -> usize {
        self.doc_lens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lens.is_empty()
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        let total = self.len() as f64;
        (1.0 + (total - n + 0.5) / (n + 0.5)).ln()
    }

    fn score(&self, doc: usize, query_terms: &[String]) -> f64 {
        let tf = &self.term_freqs[doc];
        let len_norm = if self.avg_doc_len > 0.0 {
            self.doc_lens[doc] as f64 / self.avg_doc_len
        } else {
            0.0
        };
        query_terms
            .iter()
            .filter_map(|term| {
                let f = f64::from(*tf.get(term)?);
                Some(self.idf(term) * f * (K1 + 1.0) / (f + K1 * (1.0 - B + B * len_norm)))
            })
            .sum()
    }

    /// Top-`k` corpus positions for `query`, best first.
    ///
    /// Always returns `min(k, len)` documents once the query has a token,
    /// including documents that score zero; ties are broken by corpus
    /// position.
    pub fn search(&self, query: &str, k: usize) -> Vec<(usize, f64)> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || k == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(usize, f64)> = (0..self.len())
            .map(|doc| (doc, self.score(doc, &query_terms)))
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

    #[test]
    fn test_tokenize_lowercases_and_strips_punctuation() {
        assert_eq!(
            tokenize("Hadley v. Baxendale, (1854)!"),
            vec!["hadley", "v", "baxendale", "1854"]
        );
    }

    #[test]
    fn test_matching_document_ranks_first() {
        let index = LexicalIndex::build(&corpus(&[
            "The tax assessment was upheld.",
            "Breach of contract and damages for breach.",
            "A tort of negligence.",
        ]));
        let hits = index.search("contract breach", 6);
        assert_eq!(hits[0].0, 1);
        assert!(hits[0].1 > 0.0);
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[1].1, 0.0);
    }

    #[test]
    fn test_rare_terms_outweigh_common_ones() {
        let index = LexicalIndex::build(&corpus(&[
            "the court held the claim",
            "the court held foreseeability",
            "the court the court",
        ]));
        let hits = index.search("court foreseeability", 3);
        assert_eq!(hits[0].0, 1);
    }

    #[test]
    fn test_no_overlap_still_fills_top_k_in_position_order() {
        let index = LexicalIndex::build(&corpus(&["alpha beta", "gamma delta", "epsilon"]));
        let hits = index.search("omega", 2);
        assert_eq!(hits, vec![(0, 0.0), (1, 0.0)]);
        assert!(index.search("   ", 6).is_empty());
    }

    #[test]
    fn test_top_k_truncates_and_ties_break_by_position() {
        let index = LexicalIndex::build(&corpus(&["same words", "same words", "same words"]));
        let hits = index.search("same", 2);
        assert_eq!(hits.iter().map(|h| h.0).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_empty_corpus() {
        let index = LexicalIndex::build(&[]);
        assert!(index.is_empty());
        assert!(index.search("anything", 6).is_empty());
    }
}
