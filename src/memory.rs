//! Per-user session memory.
//!
//! Tracks, for each user id, the legal case category most recently
//! mentioned in that user's queries. The category is turned into a system
//! directive that biases the prompt; it never filters retrieval.
//!
//! Profiles live for the life of the process. Updates are atomic per user
//! (last match wins); there is no cross-user ordering.

use dashmap::DashMap;
use regex::Regex;

use crate::llm::Message;
use crate::models::CaseType;

pub struct SessionMemory {
    profiles: DashMap<String, CaseType>,
    /// One whole-word, case-insensitive matcher per category, in priority order.
    matchers: Vec<(CaseType, Regex)>,
}

impl SessionMemory {
    pub fn new() -> Self {
        let matchers = CaseType::ALL
            .iter()
            .filter_map(|&case| {
                Regex::new(&format!(r"(?i)\b{}\b", regex::escape(case.as_str())))
                    .ok()
                    .map(|re| (case, re))
            })
            .collect();
        Self {
            profiles: DashMap::new(),
            matchers,
        }
    }

    /// First category (in enumeration order) mentioned in `text`.
    pub fn infer(&self, text: &str) -> Option<CaseType> {
        self.matchers
            .iter()
            .find(|(_, re)| re.is_match(text))
            .map(|(case, _)| *case)
    }

    /// Record the category mentioned in `query`, if any.
    ///
    /// A query with no recognised category leaves the profile unchanged.
    pub fn observe(&self, user_id: &str, query: &str) -> Option<CaseType> {
        let found = self.infer(query)?;
        let previous = self.profiles.insert(user_id.to_string(), found);
        if previous != Some(found) {
            tracing::debug!(user_id, case_type = %found, "session preference updated");
        }
        Some(found)
    }

    pub fn case_type(&self, user_id: &str) -> Option<CaseType> {
        self.profiles.get(user_id).map(|entry| *entry.value())
    }

    /// Context directives for `user_id`: one system message when a category
    /// is known, otherwise none.
    pub fn history_for(&self, user_id: &str) -> Vec<Message> {
        self.case_type(user_id)
            .map(|case| {
                vec![Message::system(format!(
                    "User is interested in {} cases. Prefer such precedents when relevant.",
                    case
                ))]
            })
            .unwrap_or_default()
    }

    /// Observe `query`, then return the user's directives.
    pub fn build_history(&self, user_id: &str, query: &str) -> Vec<Message> {
        self.observe(user_id, query);
        self.history_for(user_id)
    }

    /// Number of users with a known preference.
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

impl Default for SessionMemory {
    fn default() -> Self {
        Self::new()
    }
}
