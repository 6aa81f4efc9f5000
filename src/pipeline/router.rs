//! Routing of prepared units to an index backend.
//!
//! The mapping is total and pure: `high_quality` always goes to the dense
//! embedding backend, `economy` always goes to the sparse keyword backend.
//! Exactly one backend receives writes per run; the other is never touched.

use crate::pipeline::request::IndexingTechnique;

/// The backend a run's units are written into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBackend {
    /// Dense vector index fed by the embedding service.
    Embedding,
    /// Sparse inverted keyword index.
    Keyword,
}

/// Select the backend for the requested indexing technique.
pub fn route(technique: IndexingTechnique) -> IndexBackend {
    match technique {
        IndexingTechnique::HighQuality => IndexBackend::Embedding,
        IndexingTechnique::Economy => IndexBackend::Keyword,
    }
}
