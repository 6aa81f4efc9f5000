use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters describing indexing activity.
#[derive(Default)]
pub struct IngestMetrics {
    documents_indexed: AtomicU64,
    units_committed: AtomicU64,
    qa_pairs_generated: AtomicU64,
    qa_chunks_failed: AtomicU64,
}

impl IngestMetrics {
    /// Create an empty metrics accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a committed document and the number of index units it produced.
    pub fn record_document(&self, unit_count: u64) {
        self.documents_indexed.fetch_add(1, Ordering::Relaxed);
        self.units_committed.fetch_add(unit_count, Ordering::Relaxed);
    }

    /// Record the outcome of QA synthesis for one document.
    pub fn record_qa(&self, pairs_generated: u64, chunks_failed: u64) {
        self.qa_pairs_generated
            .fetch_add(pairs_generated, Ordering::Relaxed);
        self.qa_chunks_failed
            .fetch_add(chunks_failed, Ordering::Relaxed);
    }

    /// Return a snapshot of the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_indexed: self.documents_indexed.load(Ordering::Relaxed),
            units_committed: self.units_committed.load(Ordering::Relaxed),
            qa_pairs_generated: self.qa_pairs_generated.load(Ordering::Relaxed),
            qa_chunks_failed: self.qa_chunks_failed.load(Ordering::Relaxed),
        }
    }
}

/// Immutable view of ingestion counters used for reporting.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Number of documents committed since startup.
    pub documents_indexed: u64,
    /// Total index units committed across all documents.
    pub units_committed: u64,
    /// QA pairs synthesized across all `qa_model` documents.
    pub qa_pairs_generated: u64,
    /// Chunks whose QA synthesis failed and was isolated.
    pub qa_chunks_failed: u64,
}
