//! Conversion of segmented chunks into index units for the requested
//! document form.
//!
//! Text form is an identity mapping, hierarchical form turns each child chunk
//! into a unit whose payload back-references its parent, and QA form fans out
//! to the external generator with a bounded worker pool. QA results are
//! collected in submission order, so the committed unit order matches
//! document order regardless of which generation call finishes first.

use crate::backend::RetryPolicy;
use crate::metrics::IngestMetrics;
use crate::pipeline::types::{Chunk, IndexUnit, PipelineError, chunk_hash};
use crate::qa::QaGenerator;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

/// Document-level fields stamped on every unit payload.
#[derive(Debug, Clone)]
pub struct UnitContext {
    /// Document the units belong to.
    pub document_id: String,
    /// Batch identifier of the current pipeline run.
    pub batch: String,
    /// Optional display name from the request.
    pub document_name: Option<String>,
    /// RFC3339 creation timestamp shared by the whole run.
    pub created_at: String,
}

impl UnitContext {
    /// Build a context for a fresh run, stamping the current time.
    pub fn new(document_id: &str, batch: &str, document_name: Option<&str>) -> Self {
        Self {
            document_id: document_id.to_string(),
            batch: batch.to_string(),
            document_name: document_name.map(str::to_string),
            created_at: current_timestamp_rfc3339(),
        }
    }
}

/// Outcome counters for one QA synthesis pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct QaOutcome {
    /// Pairs successfully synthesized across all chunks.
    pub pairs_generated: usize,
    /// Chunks whose synthesis failed and was isolated.
    pub chunks_failed: usize,
}

/// Transforms chunk sequences into index units.
pub struct FormTransformer {
    qa_generator: Arc<dyn QaGenerator + Send + Sync>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl FormTransformer {
    /// Build a transformer around the QA generator collaborator.
    pub fn new(
        qa_generator: Arc<dyn QaGenerator + Send + Sync>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            qa_generator,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    /// Identity transform: each chunk becomes one unit carrying the chunk
    /// text as its indexable payload.
    pub fn text_units(&self, chunks: &[Chunk], context: &UnitContext) -> Vec<IndexUnit> {
        chunks
            .iter()
            .map(|chunk| IndexUnit {
                unit_id: chunk.id.clone(),
                text: chunk.text.clone(),
                payload: base_payload(context, &chunk.text, chunk.position),
            })
            .collect()
    }

    /// Hierarchical transform: each child chunk becomes a retrievable unit
    /// whose payload references its parent for retrieval-time expansion.
    pub fn hierarchical_units(&self, children: &[Chunk], context: &UnitContext) -> Vec<IndexUnit> {
        children
            .iter()
            .map(|chunk| {
                let mut payload = base_payload(context, &chunk.text, chunk.position);
                if let Some(parent_id) = &chunk.parent_id {
                    payload.insert("parent_id".into(), Value::String(parent_id.clone()));
                }
                IndexUnit {
                    unit_id: chunk.id.clone(),
                    text: chunk.text.clone(),
                    payload,
                }
            })
            .collect()
    }

    /// QA transform: synthesize question/answer pairs per chunk through a
    /// bounded worker pool, indexing the questions and carrying the answers
    /// as payload.
    ///
    /// A failing chunk is isolated: it contributes zero pairs and is counted
    /// in the outcome. When every chunk fails or yields nothing, the whole
    /// document fails with [`PipelineError::QaEnrichmentFailed`].
    pub async fn qa_units(
        &self,
        chunks: &[Chunk],
        language: &str,
        context: &UnitContext,
        metrics: &IngestMetrics,
    ) -> Result<Vec<IndexUnit>, PipelineError> {
        let results: Vec<_> = futures_util::stream::iter(chunks.iter().map(|chunk| {
            let generator = Arc::clone(&self.qa_generator);
            let retry = self.retry;
            async move {
                let generated = retry
                    .run("qa_generate", || generator.generate(&chunk.text, language))
                    .await;
                (chunk, generated)
            }
        }))
        .buffered(self.concurrency)
        .collect()
        .await;

        let mut units = Vec::new();
        let mut outcome = QaOutcome::default();

        for (chunk, generated) in results {
            let pairs = match generated {
                Ok(pairs) => pairs,
                Err(error) => {
                    tracing::warn!(
                        chunk_id = %chunk.id,
                        position = chunk.position,
                        error = %error,
                        "QA synthesis failed for chunk; continuing without it"
                    );
                    outcome.chunks_failed += 1;
                    continue;
                }
            };

            outcome.pairs_generated += pairs.len();
            for pair in pairs {
                let mut payload = base_payload(context, &pair.question, chunk.position);
                payload.insert("chunk_id".into(), Value::String(chunk.id.clone()));
                payload.insert("answer".into(), Value::String(pair.answer));
                payload.insert("language".into(), Value::String(language.to_string()));
                units.push(IndexUnit {
                    unit_id: Uuid::new_v4().to_string(),
                    text: pair.question,
                    payload,
                });
            }
        }

        metrics.record_qa(outcome.pairs_generated as u64, outcome.chunks_failed as u64);

        if units.is_empty() {
            tracing::error!(
                document_id = %context.document_id,
                chunk_count = chunks.len(),
                chunks_failed = outcome.chunks_failed,
                "QA synthesis yielded no pairs for the whole document"
            );
            return Err(PipelineError::QaEnrichmentFailed {
                chunk_count: chunks.len(),
            });
        }

        tracing::debug!(
            document_id = %context.document_id,
            pairs = outcome.pairs_generated,
            chunks_failed = outcome.chunks_failed,
            "QA synthesis complete"
        );
        Ok(units)
    }
}

fn base_payload(context: &UnitContext, text: &str, position: usize) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert(
        "document_id".into(),
        Value::String(context.document_id.clone()),
    );
    payload.insert("batch".into(), Value::String(context.batch.clone()));
    payload.insert("text".into(), Value::String(text.to_string()));
    payload.insert("chunk_hash".into(), Value::String(chunk_hash(text)));
    payload.insert("position".into(), Value::Number(position.into()));
    payload.insert(
        "created_at".into(),
        Value::String(context.created_at.clone()),
    );
    if let Some(name) = context
        .document_name
        .as_ref()
        .filter(|name| !name.trim().is_empty())
    {
        payload.insert("document_name".into(), Value::String(name.clone()));
    }
    payload
}

/// Current timestamp formatted for payload storage.
fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
