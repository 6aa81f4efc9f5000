//! Sparse indexer: tokenizes unit text into term postings for the keyword
//! store.

use crate::backend::RetryPolicy;
use crate::indexer::Indexer;
use crate::keywordstore::{KeywordStore, PostingEntry};
use crate::pipeline::types::{IndexUnit, PipelineError, Stage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds postings from unit text and commits them to the keyword store.
pub struct KeywordIndexer {
    store: Arc<dyn KeywordStore>,
    retry: RetryPolicy,
}

impl KeywordIndexer {
    /// Build an indexer over the given keyword store.
    pub fn new(store: Arc<dyn KeywordStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }
}

/// Lowercase alphanumeric-run tokenizer with per-term frequencies.
///
/// Single-character runs are dropped; they carry no retrieval signal and
/// bloat the posting table.
pub fn tokenize(text: &str) -> HashMap<String, usize> {
    let mut frequencies = HashMap::new();
    for run in text
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|run| run.chars().count() > 1)
    {
        *frequencies.entry(run.to_lowercase()).or_insert(0) += 1;
    }
    frequencies
}

#[async_trait]
impl Indexer for KeywordIndexer {
    async fn commit_units(&self, units: &[IndexUnit]) -> Result<(), PipelineError> {
        if units.is_empty() {
            return Ok(());
        }

        let mut postings = Vec::new();
        for unit in units {
            for (term, term_frequency) in tokenize(&unit.text) {
                postings.push(PostingEntry {
                    term,
                    unit_id: unit.unit_id.clone(),
                    term_frequency,
                });
            }
        }

        self.retry
            .run("keyword_upsert", || self.store.upsert_postings(&postings))
            .await
            .map_err(|error| PipelineError::at(Stage::KeywordWrite, error))?;

        tracing::debug!(
            units = units.len(),
            postings = postings.len(),
            "Keyword commit complete"
        );
        Ok(())
    }

    async fn retire_units(&self, unit_ids: &[String]) -> Result<(), PipelineError> {
        self.retry
            .run("keyword_delete", || self.store.delete_units(unit_ids))
            .await
            .map_err(|error| PipelineError::at(Stage::Retire, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keywordstore::InMemoryKeywordStore;
    use serde_json::Map;
    use std::time::Duration;

    fn unit(id: &str, text: &str) -> IndexUnit {
        IndexUnit {
            unit_id: id.to_string(),
            text: text.to_string(),
            payload: Map::new(),
        }
    }

    fn indexer(store: Arc<InMemoryKeywordStore>) -> KeywordIndexer {
        KeywordIndexer::new(
            store,
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
        )
    }

    #[test]
    fn tokenizer_lowercases_and_counts() {
        let frequencies = tokenize("Rust rust RUST, indexing; a I 42");
        assert_eq!(frequencies["rust"], 3);
        assert_eq!(frequencies["indexing"], 1);
        assert_eq!(frequencies["42"], 1);
        // Single-character runs are dropped.
        assert!(!frequencies.contains_key("a"));
        assert!(!frequencies.contains_key("i"));
    }

    #[test]
    fn tokenizer_splits_on_punctuation_and_unicode_gaps() {
        let frequencies = tokenize("hello-world hello_world");
        assert_eq!(frequencies["hello"], 2);
        assert_eq!(frequencies["world"], 2);
    }

    #[tokio::test]
    async fn commit_makes_units_findable_by_term() {
        let store = Arc::new(InMemoryKeywordStore::new());
        indexer(Arc::clone(&store))
            .commit_units(&[
                unit("u1", "Document indexing pipeline"),
                unit("u2", "pipeline stages"),
            ])
            .await
            .expect("commit");

        let mut units = store.units_for_term("pipeline").await;
        units.sort();
        assert_eq!(units, vec!["u1".to_string(), "u2".to_string()]);
        assert_eq!(store.units_for_term("indexing").await, vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn retire_removes_the_units_postings() {
        let store = Arc::new(InMemoryKeywordStore::new());
        let indexer = indexer(Arc::clone(&store));
        indexer
            .commit_units(&[unit("u1", "rust index"), unit("u2", "rust only")])
            .await
            .expect("commit");

        indexer
            .retire_units(&["u1".to_string()])
            .await
            .expect("retire");
        assert_eq!(store.units_for_term("rust").await, vec!["u2".to_string()]);
        assert!(store.units_for_term("index").await.is_empty());
    }
}
