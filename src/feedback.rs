//! Ratings and the feedback-driven healing pass.
//!
//! Every rating is tallied under a case key. A rating below the healing
//! threshold rewrites the query, refreshes session memory with the rewritten
//! text, and answers it once more. Healing never recurses: rating a healed
//! answer is just another top-level feedback call.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::FeedbackConfig;
use crate::error::{Error, Result};
use crate::memory::SessionMemory;
use crate::models::FeedbackOutcome;
use crate::pipeline::AnswerPipeline;

/// Rating distribution per case key. Counts only ever increase.
#[derive(Default)]
pub struct RatingTally {
    buckets: DashMap<String, [u64; 5]>,
}

/// Serializable view of one case key's distribution (`"1"`..`"5"` → count).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution(pub BTreeMap<String, u64>);

impl RatingTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one rating. `rating` must already be validated to `1..=5`.
    pub fn record(&self, case_key: &str, rating: u8) {
        let slot = usize::from(rating.clamp(1, 5) - 1);
        self.buckets
            .entry(case_key.to_string())
            .or_insert([0; 5])[slot] += 1;
    }

    pub fn counts(&self, case_key: &str) -> [u64; 5] {
        self.buckets
            .get(case_key)
            .map(|entry| *entry.value())
            .unwrap_or([0; 5])
    }

    pub fn distribution(&self, case_key: &str) -> Distribution {
        Distribution::from_counts(&self.counts(case_key))
    }

    pub fn snapshot(&self) -> BTreeMap<String, Distribution> {
        self.buckets
            .iter()
            .map(|entry| (entry.key().clone(), Distribution::from_counts(entry.value())))
            .collect()
    }
}

impl Distribution {
    fn from_counts(counts: &[u64; 5]) -> Self {
        Self(
            counts
                .iter()
                .enumerate()
                .filter(|(_, n)| **n > 0)
                .map(|(i, n)| ((i + 1).to_string(), *n))
                .collect(),
        )
    }
}

/// Deterministic, side-effect free query transform used when healing.
pub trait QueryRewriter: Send + Sync {
    fn rewrite(&self, query: &str) -> String;
}

/// Normalizes the query and asks explicitly for a detailed, cited answer.
///
/// Whitespace runs collapse to one space, wrapping quotes and trailing
/// punctuation are removed, and a fixed instruction is prefixed.
pub struct ExpandingRewriter;

pub const HEAL_PREFIX: &str = "Explain in detail, citing the relevant precedents: ";

impl QueryRewriter for ExpandingRewriter {
    fn rewrite(&self, query: &str) -> String {
        let collapsed = query.split_whitespace().collect::<Vec<_>>().join(" ");
        let unquoted = collapsed.trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”'));
        let core = unquoted.trim_end_matches(|c: char| matches!(c, '?' | '!' | '.' | ',' | ';' | ':'));
        let core = core.trim();
        if core.starts_with(HEAL_PREFIX.trim_end()) {
            return core.to_string();
        }
        format!("{}{}", HEAL_PREFIX, core)
    }
}

pub struct FeedbackHealer {
    pipeline: Arc<AnswerPipeline>,
    memory: Arc<SessionMemory>,
    tally: Arc<RatingTally>,
    rewriter: Box<dyn QueryRewriter>,
    heal_below: u8,
    case_key: String,
}

impl FeedbackHealer {
    pub fn new(
        pipeline: Arc<AnswerPipeline>,
        memory: Arc<SessionMemory>,
        tally: Arc<RatingTally>,
        config: &FeedbackConfig,
    ) -> Self {
        Self {
            pipeline,
            memory,
            tally,
            rewriter: Box::new(ExpandingRewriter),
            heal_below: config.heal_below,
            case_key: config.case_key.clone(),
        }
    }

    /// Replace the rewrite strategy.
    pub fn with_rewriter(mut self, rewriter: Box<dyn QueryRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn tally(&self) -> &Arc<RatingTally> {
        &self.tally
    }

    pub fn case_key(&self) -> &str {
        &self.case_key
    }

    /// Record `rating` and, if it is low, answer a rewritten query once.
    pub async fn handle(&self, query: &str, rating: u8, user_id: &str) -> Result<FeedbackOutcome> {
        if !(1..=5).contains(&rating) {
            return Err(Error::InvalidRequest(format!(
                "rating must be between 1 and 5, got {}",
                rating
            )));
        }
        self.tally.record(&self.case_key, rating);
        tracing::info!(user_id, rating, case_key = %self.case_key, "feedback recorded");

        if rating >= self.heal_below {
            return Ok(FeedbackOutcome::acknowledged());
        }

        let healed_query = self.rewriter.rewrite(query);
        tracing::info!(user_id, healed_query = %healed_query, "healing low-rated answer");
        let history = self.memory.build_history(user_id, &healed_query);
        let answer = self.pipeline.answer(&healed_query, &history).await?;
        Ok(FeedbackOutcome::healed(answer))
    }
}
