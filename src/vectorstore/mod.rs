//! Vector store collaborators for the high-quality indexing path.
//!
//! The trait covers exactly what the pipeline needs: upserting staged
//! records, deleting retired unit ids, and ensuring the target collection
//! exists. The HTTP implementation speaks the Qdrant REST dialect; the
//! in-memory implementation backs tests and offline runs.

use crate::backend::BackendError;
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// One staged unit ready for a vector store write.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    /// Unit id used as the point id.
    pub unit_id: String,
    /// Embedding vector.
    pub vector: Vec<f32>,
    /// Payload stored alongside the vector.
    pub payload: Map<String, Value>,
}

/// Interface implemented by vector store backends.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Ensure the target collection exists with the given vector size.
    async fn ensure_collection(&self, dimension: usize) -> Result<(), BackendError>;

    /// Write records, replacing any existing points with the same ids.
    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), BackendError>;

    /// Delete the points with the given unit ids. Missing ids are ignored.
    async fn delete(&self, unit_ids: &[String]) -> Result<(), BackendError>;
}

/// Vector store backed by a Qdrant-compatible REST endpoint.
pub struct HttpVectorStore {
    client: Client,
    base_url: String,
    collection: String,
    api_key: Option<String>,
}

impl HttpVectorStore {
    /// Build a store targeting `base_url` and `collection`.
    ///
    /// Every request carries `timeout`; a stalled store surfaces as a
    /// transient failure instead of hanging the pipeline.
    pub fn new(
        base_url: &str,
        collection: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .user_agent("docpipe/vector")
            .timeout(timeout)
            .build()
            .map_err(|error| {
                BackendError::Fatal(format!("failed to construct HTTP client: {error}"))
            })?;
        let base_url = normalize_base_url(base_url)?;
        tracing::debug!(
            url = %base_url,
            collection,
            has_api_key = api_key.as_deref().map(|key| !key.is_empty()).unwrap_or(false),
            "Initialized vector store HTTP client"
        );
        Ok(Self {
            client,
            base_url,
            collection: collection.to_string(),
            api_key,
        })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let base = self.base_url.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let mut request = self.client.request(method, format!("{base}/{path}"));
        if let Some(api_key) = &self.api_key
            && !api_key.is_empty()
        {
            request = request.header("api-key", api_key);
        }
        request
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        label: &str,
    ) -> Result<reqwest::Response, BackendError> {
        let response = request.send().await.map_err(|error| {
            BackendError::Transient(format!(
                "failed to reach vector store at {}: {error}",
                self.base_url
            ))
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        tracing::error!(label, %status, body, "Vector store request failed");
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            Err(BackendError::Transient(format!(
                "vector store returned {status} for {label}: {body}"
            )))
        } else {
            Err(BackendError::Fatal(format!(
                "vector store rejected {label} with {status}: {body}"
            )))
        }
    }
}

#[async_trait]
impl VectorStore for HttpVectorStore {
    async fn ensure_collection(&self, dimension: usize) -> Result<(), BackendError> {
        let lookup = self
            .request(Method::GET, &format!("collections/{}", self.collection))
            .send()
            .await
            .map_err(|error| {
                BackendError::Transient(format!(
                    "failed to reach vector store at {}: {error}",
                    self.base_url
                ))
            })?;

        match lookup.status() {
            StatusCode::OK => return Ok(()),
            StatusCode::NOT_FOUND => {}
            status => {
                let body = lookup.text().await.unwrap_or_default();
                return Err(BackendError::Transient(format!(
                    "collection existence check returned {status}: {body}"
                )));
            }
        }

        tracing::debug!(collection = %self.collection, dimension, "Creating collection");
        let body = json!({
            "vectors": {
                "size": dimension,
                "distance": "Cosine"
            }
        });
        self.send(
            self.request(Method::PUT, &format!("collections/{}", self.collection))
                .json(&body),
            "create_collection",
        )
        .await?;
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), BackendError> {
        if records.is_empty() {
            return Ok(());
        }

        let points: Vec<_> = records
            .iter()
            .map(|record| {
                json!({
                    "id": record.unit_id,
                    "vector": record.vector,
                    "payload": record.payload,
                })
            })
            .collect();

        self.send(
            self.request(
                Method::PUT,
                &format!("collections/{}/points", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": points })),
            "upsert",
        )
        .await?;

        tracing::debug!(
            collection = %self.collection,
            points = records.len(),
            "Points upserted"
        );
        Ok(())
    }

    async fn delete(&self, unit_ids: &[String]) -> Result<(), BackendError> {
        if unit_ids.is_empty() {
            return Ok(());
        }

        self.send(
            self.request(
                Method::POST,
                &format!("collections/{}/points/delete", self.collection),
            )
            .query(&[("wait", true)])
            .json(&json!({ "points": unit_ids })),
            "delete",
        )
        .await?;

        tracing::debug!(
            collection = %self.collection,
            points = unit_ids.len(),
            "Points deleted"
        );
        Ok(())
    }
}

/// In-memory vector store used by tests and offline runs.
#[derive(Default)]
pub struct InMemoryVectorStore {
    points: RwLock<HashMap<String, VectorRecord>>,
}

impl InMemoryVectorStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored points.
    pub async fn len(&self) -> usize {
        self.points.read().await.len()
    }

    /// Whether the store holds no points.
    pub async fn is_empty(&self) -> bool {
        self.points.read().await.is_empty()
    }

    /// Fetch a stored record by unit id.
    pub async fn get(&self, unit_id: &str) -> Option<VectorRecord> {
        self.points.read().await.get(unit_id).cloned()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn ensure_collection(&self, _dimension: usize) -> Result<(), BackendError> {
        Ok(())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), BackendError> {
        let mut points = self.points.write().await;
        for record in records {
            points.insert(record.unit_id.clone(), record.clone());
        }
        Ok(())
    }

    async fn delete(&self, unit_ids: &[String]) -> Result<(), BackendError> {
        let mut points = self.points.write().await;
        for unit_id in unit_ids {
            points.remove(unit_id);
        }
        Ok(())
    }
}

fn normalize_base_url(url: &str) -> Result<String, BackendError> {
    let mut parsed = reqwest::Url::parse(url)
        .map_err(|error| BackendError::Fatal(format!("invalid vector store url '{url}': {error}")))?;
    let path = parsed.path().trim_end_matches('/').to_string();
    parsed.set_path(&path);
    Ok(parsed.to_string())
}
