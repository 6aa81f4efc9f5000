//! Index backends: the embedding (dense) and keyword (sparse) writers.
//!
//! Both implement [`Indexer`], which is the only surface the lifecycle layer
//! touches: commit a batch of staged units, or retire the units of a
//! superseded batch. Errors carry stage attribution so a failed run names
//! the backend interaction that broke.

use crate::pipeline::types::{IndexUnit, PipelineError};
use async_trait::async_trait;

pub mod embedding;
pub mod keyword;

pub use embedding::EmbeddingIndexer;
pub use keyword::KeywordIndexer;

/// A backend that can persist and retire index units.
#[async_trait]
pub trait Indexer: Send + Sync {
    /// Persist `units` so they become retrievable.
    ///
    /// Implementations stage everything before writing; a failure mid-write
    /// rolls back already-written units best-effort so no partial batch
    /// remains visible.
    async fn commit_units(&self, units: &[IndexUnit]) -> Result<(), PipelineError>;

    /// Remove previously committed units, typically a superseded batch.
    async fn retire_units(&self, unit_ids: &[String]) -> Result<(), PipelineError>;
}
