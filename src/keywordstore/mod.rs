//! Inverted keyword index backing the economy indexing path.
//!
//! The store maps lowercase terms to posting lists. A process-local
//! implementation is the default backend; the trait seam exists so an
//! external search engine can slot in without touching the indexer.

use crate::backend::BackendError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// One posting: a term's occurrence count within a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingEntry {
    /// Lowercase term.
    pub term: String,
    /// Unit the term occurs in.
    pub unit_id: String,
    /// Occurrences of the term within the unit text.
    pub term_frequency: usize,
}

/// Interface implemented by keyword index backends.
#[async_trait]
pub trait KeywordStore: Send + Sync {
    /// Write postings, replacing any existing postings for the same
    /// term/unit combinations.
    async fn upsert_postings(&self, postings: &[PostingEntry]) -> Result<(), BackendError>;

    /// Remove every posting that references the given unit ids.
    async fn delete_units(&self, unit_ids: &[String]) -> Result<(), BackendError>;
}

/// Process-local keyword store.
#[derive(Default)]
pub struct InMemoryKeywordStore {
    /// term -> unit_id -> term frequency
    postings: RwLock<HashMap<String, HashMap<String, usize>>>,
}

impl InMemoryKeywordStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Unit ids whose text contains `term`, in unspecified order.
    pub async fn units_for_term(&self, term: &str) -> Vec<String> {
        self.postings
            .read()
            .await
            .get(term)
            .map(|units| units.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of distinct terms currently indexed.
    pub async fn term_count(&self) -> usize {
        self.postings.read().await.len()
    }
}

#[async_trait]
impl KeywordStore for InMemoryKeywordStore {
    async fn upsert_postings(&self, entries: &[PostingEntry]) -> Result<(), BackendError> {
        let mut postings = self.postings.write().await;
        for entry in entries {
            postings
                .entry(entry.term.clone())
                .or_default()
                .insert(entry.unit_id.clone(), entry.term_frequency);
        }
        Ok(())
    }

    async fn delete_units(&self, unit_ids: &[String]) -> Result<(), BackendError> {
        let retired: HashSet<&str> = unit_ids.iter().map(String::as_str).collect();
        let mut postings = self.postings.write().await;
        postings.retain(|_, units| {
            units.retain(|unit_id, _| !retired.contains(unit_id.as_str()));
            !units.is_empty()
        });
        Ok(())
    }
}
