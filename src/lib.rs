#![deny(missing_docs)]

//! Core library for the docpipe document indexing pipeline.

/// Backend error classification and retry policy.
pub mod backend;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Dense and sparse index backends.
pub mod indexer;
/// Inverted keyword index backing the economy path.
pub mod keywordstore;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion metrics helpers.
pub mod metrics;
/// Document processing pipeline: cleaning, segmentation, transformation,
/// routing, and the commit lifecycle.
pub mod pipeline;
/// Question/answer synthesis abstraction and adapters.
pub mod qa;
/// Vector store abstraction and adapters.
pub mod vectorstore;
