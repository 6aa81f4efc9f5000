//! Embedding providers for the high-quality indexing path.
//!
//! The trait seam lets the indexer be tested with scripted vectors; the
//! Ollama-backed client calls the runtime's `/api/embed` endpoint, and a
//! deterministic hash embedder serves as an offline fallback for environments
//! without a model runtime.

use crate::backend::BackendError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one embedding vector per supplied text, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError>;
}

/// Embedding client backed by an Ollama-compatible `/api/embed` endpoint.
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaEmbeddingClient {
    /// Build a client targeting `base_url` with the given embedding model.
    ///
    /// Every request carries `timeout`; a stalled runtime surfaces as a
    /// transient failure instead of hanging the pipeline.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("docpipe/embed")
            .timeout(timeout)
            .build()
            .expect("Failed to construct reqwest::Client for embeddings");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let payload = json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                BackendError::Transient(format!(
                    "failed to reach model runtime at {}: {error}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::Fatal(format!(
                "model runtime endpoint {} returned 404",
                self.endpoint()
            )));
        }
        if status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Transient(format!(
                "model runtime returned {status}: {body}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Fatal(format!(
                "model runtime rejected embedding request with {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            BackendError::Fatal(format!("failed to decode embedding response: {error}"))
        })?;

        if body.embeddings.len() != texts.len() {
            return Err(BackendError::Fatal(format!(
                "embedding count mismatch: sent {} texts, received {} vectors",
                texts.len(),
                body.embeddings.len()
            )));
        }

        Ok(body.embeddings)
    }
}

/// Deterministic fallback embedder for offline use.
///
/// Hashes text bytes into vector slots and L2-normalizes the result, so
/// identical text always yields the identical vector.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    /// Build a hash embedder producing vectors of `dimension`.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimension];
        if text.is_empty() {
            return embedding;
        }

        for (idx, byte) in text.bytes().enumerate() {
            let position = idx % self.dimension;
            embedding[position] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if self.dimension == 0 {
            return Err(BackendError::Fatal(
                "embedding dimension must be greater than zero".into(),
            ));
        }
        Ok(texts.iter().map(|text| self.encode(text)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::POST, MockServer};

    #[tokio::test]
    async fn ollama_client_returns_vectors_in_input_order() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({
                    "embeddings": [[0.1, 0.2], [0.3, 0.4]]
                }));
            })
            .await;

        let client = OllamaEmbeddingClient::new(&server.base_url(), "nomic-embed-text", Duration::from_secs(5));
        let vectors = client
            .embed(&["alpha".to_string(), "beta".to_string()])
            .await
            .expect("vectors");

        mock.assert();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[tokio::test]
    async fn count_mismatch_is_fatal() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200).json_body(json!({ "embeddings": [[0.1]] }));
            })
            .await;

        let client = OllamaEmbeddingClient::new(&server.base_url(), "nomic-embed-text", Duration::from_secs(5));
        let error = client
            .embed(&["alpha".to_string(), "beta".to_string()])
            .await
            .expect_err("mismatch is fatal");
        assert!(matches!(error, BackendError::Fatal(_)));
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(500).body("boom");
            })
            .await;

        let client = OllamaEmbeddingClient::new(&server.base_url(), "nomic-embed-text", Duration::from_secs(5));
        let error = client
            .embed(&["alpha".to_string()])
            .await
            .expect_err("5xx maps to transient");
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn stalled_responses_time_out_as_transient() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/embed");
                then.status(200)
                    .delay(Duration::from_millis(500))
                    .json_body(json!({ "embeddings": [[0.1]] }));
            })
            .await;

        let client =
            OllamaEmbeddingClient::new(&server.base_url(), "nomic-embed-text", Duration::from_millis(50));
        let error = client
            .embed(&["alpha".to_string()])
            .await
            .expect_err("stalled call times out");
        assert!(error.is_transient());
    }

    #[tokio::test]
    async fn hash_embedder_is_deterministic_and_normalized() {
        let embedder = HashEmbedder::new(8);
        let first = embedder
            .embed(&["same text".to_string()])
            .await
            .expect("vectors");
        let second = embedder
            .embed(&["same text".to_string()])
            .await
            .expect("vectors");
        assert_eq!(first, second);

        let norm = first[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
