//! Question/answer synthesis for the `qa_model` document form.
//!
//! The generator is a trait seam so pipeline tests can script outcomes; the
//! Ollama-backed implementation issues HTTP requests directly to the model
//! runtime and parses the JSON array of pairs out of the completion.

use crate::backend::BackendError;
use crate::pipeline::types::QaPair;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// Interface implemented by QA synthesis providers.
#[async_trait]
pub trait QaGenerator: Send + Sync {
    /// Synthesize question/answer pairs from one chunk of text, with
    /// questions and answers written in `language`.
    async fn generate(&self, text: &str, language: &str) -> Result<Vec<QaPair>, BackendError>;
}

/// QA generator backed by an Ollama-compatible `/api/generate` endpoint.
pub struct OllamaQaGenerator {
    http: Client,
    base_url: String,
    model: String,
}

impl OllamaQaGenerator {
    /// Build a generator targeting `base_url` with the given model.
    ///
    /// Every request carries `timeout`; a stalled runtime surfaces as a
    /// transient failure instead of hanging the pipeline.
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> Self {
        let http = Client::builder()
            .user_agent("docpipe/qa")
            .timeout(timeout)
            .build()
            .expect("Failed to construct reqwest::Client for QA generation");
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    fn prompt(text: &str, language: &str) -> String {
        format!(
            "You generate study questions from documents. Given the passage \
             below, produce question/answer pairs that the passage fully \
             answers. Write both questions and answers in {language}. Respond \
             with ONLY a JSON array of objects with \"question\" and \
             \"answer\" string fields, no prose.\n\nPassage:\n{text}"
        )
    }
}

#[derive(Debug, Deserialize)]
struct OllamaGenerateResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl QaGenerator for OllamaQaGenerator {
    async fn generate(&self, text: &str, language: &str) -> Result<Vec<QaPair>, BackendError> {
        let payload = json!({
            "model": self.model,
            "prompt": Self::prompt(text, language),
            "stream": false,
            "format": "json",
            "options": {
                // Lower temperature keeps pair extraction close to the text.
                "temperature": 0.2,
            }
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
                "model runtime rejected QA request with {status}: {body}"
            )));
        }

        let body: OllamaGenerateResponse = response.json().await.map_err(|error| {
            BackendError::Fatal(format!("failed to decode model runtime response: {error}"))
        })?;
        if !body.done {
            return Err(BackendError::Fatal(
                "model runtime response incomplete (streaming not supported)".into(),
            ));
        }

        parse_pairs(&body.response)
    }
}

/// Parse the completion text into QA pairs.
///
/// Accepts either a bare JSON array or an object wrapping one (some models
/// emit `{"pairs": [...]}` despite instructions). Pairs with an empty
/// question or answer are dropped.
fn parse_pairs(completion: &str) -> Result<Vec<QaPair>, BackendError> {
    let trimmed = completion.trim();
    let value: serde_json::Value = serde_json::from_str(trimmed).map_err(|error| {
        BackendError::Fatal(format!("QA completion is not valid JSON: {error}"))
    })?;

    let array = match &value {
        serde_json::Value::Array(items) => items.clone(),
        serde_json::Value::Object(map) => map
            .values()
            .find_map(|entry| entry.as_array().cloned())
            .ok_or_else(|| {
                BackendError::Fatal("QA completion object contains no pair array".into())
            })?,
        _ => {
            return Err(BackendError::Fatal(
                "QA completion is neither an array nor an object".into(),
            ));
        }
    };

    let pairs = array
        .into_iter()
        .filter_map(|entry| serde_json::from_value::<QaPair>(entry).ok())
        .filter(|pair| !pair.question.trim().is_empty() && !pair.answer.trim().is_empty())
        .collect();
    Ok(pairs)
}
