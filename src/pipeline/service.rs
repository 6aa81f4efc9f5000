//! Document lifecycle: validation, the stage chain, atomic commit, and
//! retirement of superseded batches.
//!
//! One [`IndexService`] owns the committed-entry registry and the backend
//! collaborators. Runs against the same document id are serialized through a
//! per-document lock; runs against different documents proceed concurrently.
//! The registry swap is the single commit point: a run that fails or is
//! cancelled anywhere before it leaves the previously committed entry fully
//! retrievable, because staged backend writes are unreferenced until the
//! swap makes them visible.

use crate::backend::RetryPolicy;
use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::indexer::{EmbeddingIndexer, Indexer, KeywordIndexer};
use crate::keywordstore::KeywordStore;
use crate::metrics::{IngestMetrics, MetricsSnapshot};
use crate::pipeline::request::{DocForm, IndexRequest, ProcessMode};
use crate::pipeline::router::{IndexBackend, route};
use crate::pipeline::rules;
use crate::pipeline::segmenter::{Segmenter, SegmenterConfig};
use crate::pipeline::tokens::{TokenCounter, counter_for_model};
use crate::pipeline::transform::{FormTransformer, UnitContext};
use crate::pipeline::types::{
    IndexEntry, IndexReceipt, IndexUnit, IndexingStatus, ParentRecord, PipelineError,
};
use crate::qa::QaGenerator;
use crate::vectorstore::VectorStore;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

/// Orchestrates pipeline runs and owns the committed index state.
pub struct IndexService {
    config: Config,
    retry: RetryPolicy,
    token_counter: TokenCounter,
    transformer: FormTransformer,
    embedding_indexer: Arc<dyn Indexer>,
    keyword_indexer: Arc<dyn Indexer>,
    registry: RwLock<HashMap<String, IndexEntry>>,
    statuses: Arc<StdMutex<HashMap<String, IndexingStatus>>>,
    document_locks: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    metrics: Arc<IngestMetrics>,
}

impl IndexService {
    /// Build a service from configuration and backend collaborators.
    pub fn new(
        config: Config,
        embedding_client: Arc<dyn EmbeddingClient>,
        qa_generator: Arc<dyn QaGenerator + Send + Sync>,
        vector_store: Arc<dyn VectorStore>,
        keyword_store: Arc<dyn KeywordStore>,
    ) -> Self {
        let retry = config.retry_policy();
        let token_counter = counter_for_model(&config.embedding_model);
        let transformer = FormTransformer::new(
            Arc::clone(&qa_generator),
            retry,
            config.pipeline_concurrency,
        );
        let embedding_indexer: Arc<dyn Indexer> = Arc::new(EmbeddingIndexer::new(
            embedding_client,
            vector_store,
            retry,
            config.embedding_dimension,
            config.embedding_batch_size,
            config.pipeline_concurrency,
        ));
        let keyword_indexer: Arc<dyn Indexer> =
            Arc::new(KeywordIndexer::new(keyword_store, retry));

        Self {
            config,
            retry,
            token_counter,
            transformer,
            embedding_indexer,
            keyword_indexer,
            registry: RwLock::new(HashMap::new()),
            statuses: Arc::new(StdMutex::new(HashMap::new())),
            document_locks: AsyncMutex::new(HashMap::new()),
            metrics: Arc::new(IngestMetrics::new()),
        }
    }

    /// Run the full pipeline for one document.
    ///
    /// A request carrying `original_document_id` re-indexes that document:
    /// the new entry replaces the old one in a single registry swap, after
    /// which the superseded batch's backend units are retired. Without it, a
    /// fresh document identity is created.
    pub async fn index_document(
        &self,
        request: &IndexRequest,
        raw_text: &str,
    ) -> Result<IndexReceipt, PipelineError> {
        request.validate()?;

        let document_id = request
            .original_document_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let batch = Uuid::new_v4().to_string();

        let run_guard = self.acquire_document_lock(&document_id).await;
        set_status(&self.statuses, &document_id, IndexingStatus::Pending);

        tracing::info!(
            document_id = %document_id,
            batch = %batch,
            technique = ?request.indexing_technique,
            form = ?request.doc_form,
            reindex = request.original_document_id.is_some(),
            "Pipeline run started"
        );

        let mut status_guard = StatusGuard::arm(Arc::clone(&self.statuses), &document_id);
        set_status(&self.statuses, &document_id, IndexingStatus::Processing);

        let result = self
            .run_stages(request, raw_text, &document_id, &batch)
            .await;

        let outcome = match result {
            Ok(receipt) => {
                set_status(&self.statuses, &document_id, IndexingStatus::Committed);
                status_guard.disarm();
                tracing::info!(
                    document_id = %document_id,
                    batch = %batch,
                    units = receipt.unit_count,
                    words = receipt.word_count,
                    "Pipeline run committed"
                );
                Ok(receipt)
            }
            Err(error) => {
                status_guard.disarm();
                if self.entry(&document_id).is_some() {
                    // A prior committed entry survives; keep the failed
                    // status visible alongside it.
                    set_status(&self.statuses, &document_id, IndexingStatus::Failed);
                } else {
                    // Failed first-time index leaves no trace.
                    remove_status(&self.statuses, &document_id);
                }
                tracing::error!(
                    document_id = %document_id,
                    batch = %batch,
                    error = %error,
                    "Pipeline run failed"
                );
                Err(error)
            }
        };

        drop(run_guard);
        self.prune_document_lock(&document_id).await;
        outcome
    }

    async fn run_stages(
        &self,
        request: &IndexRequest,
        raw_text: &str,
        document_id: &str,
        batch: &str,
    ) -> Result<IndexReceipt, PipelineError> {
        let cleaned = rules::apply(raw_text, &request.process_rule);
        let word_count = cleaned.split_whitespace().count();

        let segmenter_config = self.segmenter_config(request)?;
        let segmenter = Segmenter::new(self.token_counter.clone(), segmenter_config);
        let context = UnitContext::new(document_id, batch, request.name.as_deref());

        let (units, parents) = self
            .build_units(request, &segmenter, &cleaned, &context)
            .await?;

        let backend = route(request.indexing_technique);
        let indexer = self.indexer_for(backend);
        indexer.commit_units(&units).await?;

        let superseded = self.commit_entry(IndexEntry {
            document_id: document_id.to_string(),
            batch: batch.to_string(),
            technique: request.indexing_technique,
            form: request.doc_form,
            units: units.clone(),
            parents,
        });

        if let Some(old) = superseded {
            self.retire_entry(&old).await;
        }

        self.metrics.record_document(units.len() as u64);
        Ok(IndexReceipt {
            document_id: document_id.to_string(),
            batch: batch.to_string(),
            unit_count: units.len(),
            word_count,
        })
    }

    async fn build_units(
        &self,
        request: &IndexRequest,
        segmenter: &Segmenter,
        cleaned: &str,
        context: &UnitContext,
    ) -> Result<(Vec<IndexUnit>, Vec<ParentRecord>), PipelineError> {
        match request.doc_form {
            DocForm::TextModel => {
                let chunks = segmenter.segment(cleaned)?;
                Ok((self.transformer.text_units(&chunks, context), Vec::new()))
            }
            DocForm::HierarchicalModel => {
                let (parents, children) = segmenter.segment_hierarchical(cleaned)?;
                Ok((
                    self.transformer.hierarchical_units(&children, context),
                    parents,
                ))
            }
            DocForm::QaModel => {
                let chunks = segmenter.segment(cleaned)?;
                let language = request.doc_language.as_deref().unwrap_or_default();
                let units = self
                    .transformer
                    .qa_units(&chunks, language, context, &self.metrics)
                    .await?;
                Ok((units, Vec::new()))
            }
        }
    }

    fn segmenter_config(&self, request: &IndexRequest) -> Result<SegmenterConfig, PipelineError> {
        let spec = match (request.process_rule.mode, &request.process_rule.rules) {
            (ProcessMode::Custom, Some(custom)) => custom.segmentation.as_ref(),
            _ => None,
        };
        match spec {
            Some(spec) => Ok(SegmenterConfig::from_spec(spec)?),
            None => Ok(SegmenterConfig::automatic()),
        }
    }

    fn indexer_for(&self, backend: IndexBackend) -> &Arc<dyn Indexer> {
        match backend {
            IndexBackend::Embedding => &self.embedding_indexer,
            IndexBackend::Keyword => &self.keyword_indexer,
        }
    }

    /// Swap the new entry in, returning the superseded one if any.
    fn commit_entry(&self, entry: IndexEntry) -> Option<IndexEntry> {
        let mut registry = self
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        registry.insert(entry.document_id.clone(), entry)
    }

    /// Retire a superseded batch's backend units.
    ///
    /// The new entry is already committed and visible, so a retire failure
    /// only orphans unreferenced units; it is logged and swallowed rather
    /// than failing the run.
    async fn retire_entry(&self, old: &IndexEntry) {
        let unit_ids: Vec<String> = old
            .units
            .iter()
            .map(|unit| unit.unit_id.clone())
            .collect();
        let indexer = self.indexer_for(route(old.technique));
        if let Err(error) = indexer.retire_units(&unit_ids).await {
            tracing::warn!(
                document_id = %old.document_id,
                batch = %old.batch,
                units = unit_ids.len(),
                error = %error,
                "Failed to retire superseded batch; orphaned units remain unreferenced"
            );
        } else {
            tracing::debug!(
                document_id = %old.document_id,
                batch = %old.batch,
                units = unit_ids.len(),
                "Superseded batch retired"
            );
        }
    }

    async fn acquire_document_lock(&self, document_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.document_locks.lock().await;
            Arc::clone(
                locks
                    .entry(document_id.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        lock.lock_owned().await
    }

    /// Drop a document's lock entry once no run holds or awaits it.
    ///
    /// Waiters hold an `Arc` clone taken under the map lock, so a strong
    /// count of one means only the map references the mutex.
    async fn prune_document_lock(&self, document_id: &str) {
        let mut locks = self.document_locks.lock().await;
        if let Some(lock) = locks.get(document_id)
            && Arc::strong_count(lock) == 1
        {
            locks.remove(document_id);
        }
    }

    /// Committed entry for a document, if any.
    pub fn entry(&self, document_id: &str) -> Option<IndexEntry> {
        self.registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .cloned()
    }

    /// Lifecycle status of a document's most recent run.
    pub fn status(&self, document_id: &str) -> Option<IndexingStatus> {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(document_id)
            .copied()
    }

    /// Snapshot of ingestion counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The retry policy applied to backend calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// The configuration the service was built with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Parents recorded for a hierarchical document, in document order.
    pub fn parents(&self, document_id: &str) -> Vec<ParentRecord> {
        self.entry(document_id)
            .map(|entry| entry.parents)
            .unwrap_or_default()
    }

    /// Committed chunks reconstructed from a document's units.
    pub fn committed_units(&self, document_id: &str) -> Vec<IndexUnit> {
        self.entry(document_id)
            .map(|entry| entry.units)
            .unwrap_or_default()
    }
}

fn set_status(
    statuses: &StdMutex<HashMap<String, IndexingStatus>>,
    document_id: &str,
    status: IndexingStatus,
) {
    statuses
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(document_id.to_string(), status);
}

fn remove_status(statuses: &StdMutex<HashMap<String, IndexingStatus>>, document_id: &str) {
    statuses
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(document_id);
}

/// Marks a run failed unless disarmed. Error returns disarm and handle the
/// status themselves, so this fires only when the run's future is dropped
/// mid-flight.
struct StatusGuard {
    statuses: Arc<StdMutex<HashMap<String, IndexingStatus>>>,
    document_id: String,
    armed: bool,
}

impl StatusGuard {
    fn arm(
        statuses: Arc<StdMutex<HashMap<String, IndexingStatus>>>,
        document_id: &str,
    ) -> Self {
        Self {
            statuses,
            document_id: document_id.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StatusGuard {
    fn drop(&mut self) {
        if self.armed {
            set_status(&self.statuses, &self.document_id, IndexingStatus::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::embedding::HashEmbedder;
    use crate::keywordstore::InMemoryKeywordStore;
    use crate::pipeline::request::{
        CustomRules, IndexingTechnique, PreprocessingRule, ProcessRule, SegmentationSpec,
    };
    use crate::pipeline::types::{QaPair, ValidationError};
    use crate::vectorstore::InMemoryVectorStore;
    use async_trait::async_trait;

    struct StubGenerator {
        fail: bool,
    }

    #[async_trait]
    impl QaGenerator for StubGenerator {
        async fn generate(&self, text: &str, language: &str) -> Result<Vec<QaPair>, BackendError> {
            if self.fail {
                return Err(BackendError::Fatal("generator offline".into()));
            }
            Ok(vec![QaPair {
                question: format!("[{language}] What does this say: {text}?"),
                answer: text.to_string(),
            }])
        }
    }

    struct Harness {
        service: IndexService,
        vector_store: Arc<InMemoryVectorStore>,
        keyword_store: Arc<InMemoryKeywordStore>,
    }

    fn harness(qa_fails: bool) -> Harness {
        let config = Config {
            embedding_dimension: 8,
            embedding_batch_size: 2,
            pipeline_concurrency: 2,
            retry_max_attempts: 1,
            retry_base_delay_ms: 1,
            ..Config::default()
        };
        let vector_store = Arc::new(InMemoryVectorStore::new());
        let keyword_store = Arc::new(InMemoryKeywordStore::new());
        let service = IndexService::new(
            config,
            Arc::new(HashEmbedder::new(8)),
            Arc::new(StubGenerator { fail: qa_fails }),
            Arc::clone(&vector_store) as Arc<dyn VectorStore>,
            Arc::clone(&keyword_store) as Arc<dyn KeywordStore>,
        );
        Harness {
            service,
            vector_store,
            keyword_store,
        }
    }

    fn text_request() -> IndexRequest {
        IndexRequest {
            original_document_id: None,
            name: Some("Guide".into()),
            indexing_technique: IndexingTechnique::HighQuality,
            doc_form: DocForm::TextModel,
            doc_language: None,
            process_rule: ProcessRule::automatic(),
        }
    }

    #[tokio::test]
    async fn first_index_commits_and_reports() {
        let harness = harness(false);
        let receipt = harness
            .service
            .index_document(&text_request(), "A short document about Rust indexing.")
            .await
            .expect("commit");

        assert_eq!(receipt.unit_count, 1);
        assert_eq!(receipt.word_count, 6);
        assert_eq!(
            harness.service.status(&receipt.document_id),
            Some(IndexingStatus::Committed)
        );
        assert_eq!(harness.vector_store.len().await, 1);
        assert_eq!(harness.service.metrics().documents_indexed, 1);

        let entry = harness
            .service
            .entry(&receipt.document_id)
            .expect("entry exists");
        assert_eq!(entry.batch, receipt.batch);
        assert_eq!(entry.units.len(), 1);
        assert_eq!(
            entry.units[0].payload["text"],
            "A short document about Rust indexing."
        );
    }

    #[tokio::test]
    async fn empty_document_fails_validation() {
        let harness = harness(false);
        let mut request = text_request();
        request.original_document_id = Some("doc-empty".into());

        let error = harness
            .service
            .index_document(&request, "   \n\n   ")
            .await
            .expect_err("empty fails");
        assert!(matches!(
            error,
            PipelineError::Validation(ValidationError::EmptyDocument)
        ));
        // A failed first-time index leaves no trace, not even a status.
        assert!(harness.service.status("doc-empty").is_none());
        assert!(harness.service.entry("doc-empty").is_none());
    }

    #[tokio::test]
    async fn economy_writes_only_the_keyword_backend() {
        let harness = harness(false);
        let mut request = text_request();
        request.indexing_technique = IndexingTechnique::Economy;

        let receipt = harness
            .service
            .index_document(&request, "Keyword indexing avoids embedding calls entirely.")
            .await
            .expect("commit");

        assert!(harness.vector_store.is_empty().await);
        assert!(harness.keyword_store.term_count().await > 0);
        let units = harness
            .keyword_store
            .units_for_term("keyword")
            .await;
        assert_eq!(units.len(), 1);
        assert_eq!(receipt.unit_count, 1);
    }

    #[tokio::test]
    async fn reindex_swaps_the_entry_and_retires_old_units() {
        let harness = harness(false);
        let first = harness
            .service
            .index_document(&text_request(), "Original content version one.")
            .await
            .expect("first commit");
        let old_unit_id = harness.service.entry(&first.document_id).expect("entry").units[0]
            .unit_id
            .clone();

        let mut reindex = text_request();
        reindex.original_document_id = Some(first.document_id.clone());
        let second = harness
            .service
            .index_document(&reindex, "Replacement content version two.")
            .await
            .expect("reindex commit");

        assert_eq!(second.document_id, first.document_id);
        assert_ne!(second.batch, first.batch);

        let entry = harness.service.entry(&first.document_id).expect("entry");
        assert_eq!(entry.batch, second.batch);
        assert_eq!(
            entry.units[0].payload["text"],
            "Replacement content version two."
        );

        // Old unit is gone from the backend; only the new one remains.
        assert!(harness.vector_store.get(&old_unit_id).await.is_none());
        assert_eq!(harness.vector_store.len().await, 1);
    }

    #[tokio::test]
    async fn failed_reindex_leaves_the_old_entry_intact() {
        let harness = harness(false);
        let first = harness
            .service
            .index_document(&text_request(), "Durable original content.")
            .await
            .expect("first commit");

        let mut bad = text_request();
        bad.original_document_id = Some(first.document_id.clone());
        bad.process_rule = ProcessRule {
            mode: ProcessMode::Custom,
            rules: Some(CustomRules {
                pre_processing_rules: vec![],
                segmentation: Some(SegmentationSpec {
                    max_tokens: 5,
                    chunk_overlap: 0,
                    separator: None,
                }),
            }),
        };

        let error = harness
            .service
            .index_document(&bad, "New content that will never commit.")
            .await
            .expect_err("segmentation config rejected");
        assert!(matches!(
            error,
            PipelineError::Validation(ValidationError::InvalidSegmentation(_))
        ));

        // Rejected before any processing: the prior run's state is untouched.
        let entry = harness.service.entry(&first.document_id).expect("entry");
        assert_eq!(entry.batch, first.batch);
        assert_eq!(
            harness.service.status(&first.document_id),
            Some(IndexingStatus::Committed)
        );
        assert_eq!(harness.vector_store.len().await, 1);
    }

    #[tokio::test]
    async fn failed_rerun_keeps_the_entry_and_a_failed_status() {
        let harness = harness(true);
        let first = harness
            .service
            .index_document(&text_request(), "Durable original content.")
            .await
            .expect("first commit");

        let mut rerun = text_request();
        rerun.original_document_id = Some(first.document_id.clone());
        rerun.doc_form = DocForm::QaModel;
        rerun.doc_language = Some("English".into());

        let error = harness
            .service
            .index_document(&rerun, "Content the generator will reject.")
            .await
            .expect_err("qa rerun fails");
        assert!(matches!(error, PipelineError::QaEnrichmentFailed { .. }));

        // The committed entry survives, with the failure visible beside it.
        let entry = harness.service.entry(&first.document_id).expect("entry");
        assert_eq!(entry.batch, first.batch);
        assert_eq!(
            harness.service.status(&first.document_id),
            Some(IndexingStatus::Failed)
        );
    }

    #[tokio::test]
    async fn bookkeeping_maps_are_pruned_after_runs() {
        let harness = harness(false);

        let receipt = harness
            .service
            .index_document(&text_request(), "Committed document body.")
            .await
            .expect("commit");

        let mut failing = text_request();
        failing.original_document_id = Some("doc-gone".into());
        let _ = harness
            .service
            .index_document(&failing, "   ")
            .await
            .expect_err("empty fails");

        // Lock entries are dropped once uncontended; only committed
        // documents keep a status.
        assert!(harness.service.document_locks.lock().await.is_empty());
        assert!(harness.service.status("doc-gone").is_none());
        assert_eq!(
            harness.service.status(&receipt.document_id),
            Some(IndexingStatus::Committed)
        );
    }

    #[tokio::test]
    async fn hierarchical_run_stores_parents_with_the_entry() {
        let harness = harness(false);
        let mut request = text_request();
        request.doc_form = DocForm::HierarchicalModel;

        let receipt = harness
            .service
            .index_document(
                &request,
                "First paragraph with several words in it.\n\nSecond paragraph, also with words.",
            )
            .await
            .expect("commit");

        let entry = harness.service.entry(&receipt.document_id).expect("entry");
        assert!(!entry.parents.is_empty());
        for unit in &entry.units {
            let parent_id = unit.payload["parent_id"].as_str().expect("parent ref");
            assert!(entry.parents.iter().any(|parent| parent.id == parent_id));
        }
    }

    #[tokio::test]
    async fn qa_run_indexes_questions() {
        let harness = harness(false);
        let mut request = text_request();
        request.doc_form = DocForm::QaModel;
        request.doc_language = Some("English".into());

        let receipt = harness
            .service
            .index_document(&request, "Rust ownership prevents data races.")
            .await
            .expect("commit");

        let entry = harness.service.entry(&receipt.document_id).expect("entry");
        assert_eq!(entry.units.len(), 1);
        assert!(entry.units[0].text.starts_with("[English]"));
        assert_eq!(
            entry.units[0].payload["answer"],
            "Rust ownership prevents data races."
        );
        assert_eq!(harness.service.metrics().qa_pairs_generated, 1);
    }

    #[tokio::test]
    async fn qa_total_failure_aborts_without_commit() {
        let harness = harness(true);
        let mut request = text_request();
        request.original_document_id = Some("doc-qa".into());
        request.doc_form = DocForm::QaModel;
        request.doc_language = Some("English".into());

        let error = harness
            .service
            .index_document(&request, "Content the generator will reject.")
            .await
            .expect_err("qa fails");
        assert!(matches!(error, PipelineError::QaEnrichmentFailed { .. }));
        assert!(harness.service.entry("doc-qa").is_none());
        assert!(harness.vector_store.is_empty().await);
        assert!(harness.service.status("doc-qa").is_none());
    }

    #[tokio::test]
    async fn custom_rules_clean_before_segmentation() {
        let harness = harness(false);
        let mut request = text_request();
        request.indexing_technique = IndexingTechnique::Economy;
        request.process_rule = ProcessRule {
            mode: ProcessMode::Custom,
            rules: Some(CustomRules {
                pre_processing_rules: vec![
                    PreprocessingRule {
                        id: "remove_urls_emails".into(),
                        enabled: true,
                    },
                    PreprocessingRule {
                        id: "remove_extra_spaces".into(),
                        enabled: true,
                    },
                ],
                segmentation: None,
            }),
        };

        let receipt = harness
            .service
            .index_document(&request, "Visit  http://example.com   for details")
            .await
            .expect("commit");

        let entry = harness.service.entry(&receipt.document_id).expect("entry");
        assert_eq!(entry.units[0].text, "Visit for details");
        // The stripped URL never reaches the keyword index.
        assert!(harness.keyword_store.units_for_term("example").await.is_empty());
    }
}
