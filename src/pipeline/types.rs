//! Core data types and error definitions for the indexing pipeline.

use crate::backend::BackendError;
use crate::pipeline::request::{DocForm, IndexingTechnique};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A contiguous retrievable span of cleaned document text.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    /// Stable identifier assigned at segmentation time.
    pub id: String,
    /// Chunk text content.
    pub text: String,
    /// Zero-based document-order position among siblings.
    pub position: usize,
    /// Identifier of the parent chunk in hierarchical form; `None` for flat
    /// chunks and for parents themselves.
    pub parent_id: Option<String>,
}

/// Coarse parent chunk stored for retrieval-time context expansion.
///
/// Parents are persisted on the [`IndexEntry`] but never embedded or
/// tokenized; only their children are retrievable by similarity.
#[derive(Debug, Clone, Serialize)]
pub struct ParentRecord {
    /// Identifier referenced by child unit payloads.
    pub id: String,
    /// Full parent text.
    pub text: String,
    /// Zero-based document-order position.
    pub position: usize,
}

/// A synthesized question/answer pair derived from one chunk.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, Serialize)]
pub struct QaPair {
    /// Question text; this is what gets embedded or tokenized.
    pub question: String,
    /// Answer carried as payload alongside the indexed question.
    pub answer: String,
}

/// The atomic thing actually embedded or tokenized, plus its stored payload.
#[derive(Debug, Clone, Serialize)]
pub struct IndexUnit {
    /// Identifier under which the unit is written to the backend.
    pub unit_id: String,
    /// Text submitted to the embedding service or keyword tokenizer.
    pub text: String,
    /// Payload persisted alongside the unit (document id, batch, hashes,
    /// form-specific fields such as `parent_id` or `answer`).
    pub payload: Map<String, Value>,
}

/// Committed index state for one document.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    /// Document this entry indexes.
    pub document_id: String,
    /// Batch identifier stamped on every unit written during the run.
    pub batch: String,
    /// Backend the units were routed into.
    pub technique: IndexingTechnique,
    /// Content shape the units were derived through.
    pub form: DocForm,
    /// Retrievable units in deterministic document order.
    pub units: Vec<IndexUnit>,
    /// Parent records for hierarchical form; empty otherwise.
    pub parents: Vec<ParentRecord>,
}

/// Response returned to the caller after a pipeline run commits.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReceipt {
    /// Identifier of the created or re-indexed document.
    pub document_id: String,
    /// Batch identifier of the committed run.
    pub batch: String,
    /// Number of retrievable units committed.
    pub unit_count: usize,
    /// Whitespace word count of the cleaned document text.
    pub word_count: usize,
}

/// Lifecycle states of a document's pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingStatus {
    /// Request validated and document identity resolved.
    Pending,
    /// The stage chain is running.
    Processing,
    /// The entry is durably visible.
    Committed,
    /// The run aborted; any prior committed entry is untouched.
    Failed,
}

/// Pipeline stages named in fatal-error attribution.
///
/// Cleaning and segmentation faults are configuration problems and surface
/// as [`ValidationError`]s, so only the backend-facing stages appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Question/answer synthesis.
    QaGeneration,
    /// Embedding vector generation.
    Embedding,
    /// Vector store writes.
    VectorWrite,
    /// Keyword store writes.
    KeywordWrite,
    /// Retiring a superseded batch after commit.
    Retire,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::QaGeneration => "qa_generation",
            Self::Embedding => "embedding",
            Self::VectorWrite => "vector_write",
            Self::KeywordWrite => "keyword_write",
            Self::Retire => "retire",
        };
        f.write_str(name)
    }
}

/// Configuration problems rejected before any processing starts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A custom rule referenced an id absent from the rule registry.
    #[error("unknown pre-processing rule id: {0}")]
    UnknownRule(String),
    /// `process_rule.rules` was supplied together with `mode = automatic`.
    #[error("process_rule.rules must be absent when mode is automatic")]
    RulesWithAutomaticMode,
    /// `mode = custom` without an accompanying rule set.
    #[error("process_rule.rules is required when mode is custom")]
    MissingCustomRules,
    /// `doc_form = qa_model` without a document language.
    #[error("doc_language is required when doc_form is qa_model")]
    MissingLanguage,
    /// `economy` indexing cannot carry the `qa_model` enrichment.
    #[error("indexing_technique economy cannot be combined with doc_form qa_model")]
    EconomyQaConflict,
    /// Segmentation parameters outside the accepted ranges.
    #[error("invalid segmentation parameters: {0}")]
    InvalidSegmentation(String),
    /// Cleaning produced no indexable text.
    #[error("document is empty after cleaning")]
    EmptyDocument,
}

/// Errors surfaced by a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The request was rejected before any processing started.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// A backend call failed beyond its retry budget; the named stage is the
    /// last one attempted.
    #[error("pipeline failed at {stage}: {source}")]
    Backend {
        /// Stage during which the failure occurred.
        stage: Stage,
        /// Underlying backend failure.
        #[source]
        source: BackendError,
    },
    /// Every chunk's QA synthesis failed or yielded zero pairs.
    #[error("qa synthesis produced no pairs across {chunk_count} chunks")]
    QaEnrichmentFailed {
        /// Number of chunks for which synthesis was attempted.
        chunk_count: usize,
    },
}

impl PipelineError {
    /// Attach stage attribution to a backend failure.
    pub fn at(stage: Stage, source: BackendError) -> Self {
        Self::Backend { stage, source }
    }
}

/// Deterministic SHA-256 digest of chunk or unit text.
pub fn chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}
