//! Dense indexer: embeds unit text and writes vectors to the vector store.

use crate::backend::RetryPolicy;
use crate::embedding::EmbeddingClient;
use crate::indexer::Indexer;
use crate::pipeline::types::{IndexUnit, PipelineError, Stage};
use crate::vectorstore::{VectorRecord, VectorStore};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::sync::Arc;

/// Embeds units in bounded batches and commits them to the vector store.
pub struct EmbeddingIndexer {
    client: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    retry: RetryPolicy,
    dimension: usize,
    batch_size: usize,
    concurrency: usize,
}

impl EmbeddingIndexer {
    /// Build an indexer over the given embedding client and vector store.
    pub fn new(
        client: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        retry: RetryPolicy,
        dimension: usize,
        batch_size: usize,
        concurrency: usize,
    ) -> Self {
        Self {
            client,
            store,
            retry,
            dimension,
            batch_size: batch_size.max(1),
            concurrency: concurrency.max(1),
        }
    }

    /// Embed every unit, preserving unit order across batches.
    async fn stage_records(&self, units: &[IndexUnit]) -> Result<Vec<VectorRecord>, PipelineError> {
        let batches: Vec<&[IndexUnit]> = units.chunks(self.batch_size).collect();
        let mut batch_futures = Vec::with_capacity(batches.len());
        for batch in &batches {
            let client = Arc::clone(&self.client);
            let retry = self.retry;
            let texts: Vec<String> = batch.iter().map(|unit| unit.text.clone()).collect();
            batch_futures
                .push(async move { retry.run("embed_batch", || client.embed(&texts)).await });
        }
        let embedded: Vec<Result<Vec<Vec<f32>>, _>> = futures_util::stream::iter(batch_futures)
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut records = Vec::with_capacity(units.len());
        for (batch, vectors) in batches.iter().zip(embedded) {
            let vectors = vectors.map_err(|error| PipelineError::at(Stage::Embedding, error))?;
            for (unit, vector) in batch.iter().zip(vectors) {
                if vector.len() != self.dimension {
                    return Err(PipelineError::at(
                        Stage::Embedding,
                        crate::backend::BackendError::Fatal(format!(
                            "embedding dimension mismatch for unit {}: expected {}, got {}",
                            unit.unit_id,
                            self.dimension,
                            vector.len()
                        )),
                    ));
                }
                records.push(VectorRecord {
                    unit_id: unit.unit_id.clone(),
                    vector,
                    payload: unit.payload.clone(),
                });
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Indexer for EmbeddingIndexer {
    async fn commit_units(&self, units: &[IndexUnit]) -> Result<(), PipelineError> {
        if units.is_empty() {
            return Ok(());
        }

        self.retry
            .run("ensure_collection", || {
                self.store.ensure_collection(self.dimension)
            })
            .await
            .map_err(|error| PipelineError::at(Stage::VectorWrite, error))?;

        // Stage everything before the first write so an embedding failure
        // never leaves a partial batch in the store.
        let records = self.stage_records(units).await?;

        let mut written: Vec<String> = Vec::new();
        for batch in records.chunks(self.batch_size) {
            let write = self
                .retry
                .run("vector_upsert", || self.store.upsert(batch))
                .await;
            if let Err(error) = write {
                if !written.is_empty() {
                    tracing::warn!(
                        written = written.len(),
                        "Vector write failed mid-batch; rolling back written units"
                    );
                    if let Err(rollback) = self.store.delete(&written).await {
                        tracing::error!(
                            error = %rollback,
                            "Rollback delete failed; orphaned units remain unreferenced"
                        );
                    }
                }
                return Err(PipelineError::at(Stage::VectorWrite, error));
            }
            written.extend(batch.iter().map(|record| record.unit_id.clone()));
        }

        tracing::debug!(units = units.len(), "Embedding commit complete");
        Ok(())
    }

    async fn retire_units(&self, unit_ids: &[String]) -> Result<(), PipelineError> {
        self.retry
            .run("vector_delete", || self.store.delete(unit_ids))
            .await
            .map_err(|error| PipelineError::at(Stage::Retire, error))
    }
}
