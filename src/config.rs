use crate::backend::RetryPolicy;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the indexing pipeline.
///
/// The configuration is passed explicitly into [`crate::pipeline::IndexService`]
/// rather than cached globally, so two services with different settings can
/// coexist in one process.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the vector store that receives embeddings.
    pub vector_store_url: String,
    /// Collection that holds the committed index units.
    pub vector_collection: String,
    /// Optional API key required by the vector store.
    pub vector_api_key: Option<String>,
    /// Base URL of the model runtime used for embeddings and QA synthesis.
    pub model_runtime_url: String,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Model used to synthesize question/answer pairs in `qa_model` form.
    pub qa_model: String,
    /// Maximum number of index units embedded per provider request.
    pub embedding_batch_size: usize,
    /// Bound on concurrent external calls (QA generation, embedding batches).
    pub pipeline_concurrency: usize,
    /// Retry budget applied to transient backend failures.
    pub retry_max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent attempt.
    pub retry_base_delay_ms: u64,
    /// Per-request timeout applied to every external HTTP call.
    pub request_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vector_store_url: "http://127.0.0.1:6333".to_string(),
            vector_collection: "docpipe".to_string(),
            vector_api_key: None,
            model_runtime_url: "http://127.0.0.1:11434".to_string(),
            embedding_model: "nomic-embed-text".to_string(),
            embedding_dimension: 768,
            qa_model: "llama3.1".to_string(),
            embedding_batch_size: 16,
            pipeline_concurrency: 4,
            retry_max_attempts: 3,
            retry_base_delay_ms: 200,
            request_timeout_ms: 30_000,
        }
    }
}

impl Config {
    /// Load configuration from environment variables, performing validation
    /// along the way. `.env` files are honored via `dotenvy`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let defaults = Self::default();

        let config = Self {
            vector_store_url: load_env("VECTOR_STORE_URL")?,
            vector_collection: load_env("VECTOR_COLLECTION")?,
            vector_api_key: load_env_optional("VECTOR_API_KEY"),
            model_runtime_url: load_env_optional("MODEL_RUNTIME_URL")
                .unwrap_or(defaults.model_runtime_url),
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: parse_env("EMBEDDING_DIMENSION", load_env("EMBEDDING_DIMENSION")?)?,
            qa_model: load_env_optional("QA_MODEL").unwrap_or(defaults.qa_model),
            embedding_batch_size: parse_env_or("EMBEDDING_BATCH_SIZE", defaults.embedding_batch_size)?,
            pipeline_concurrency: parse_env_or(
                "PIPELINE_CONCURRENCY",
                defaults.pipeline_concurrency,
            )?,
            retry_max_attempts: parse_env_or("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?,
            retry_base_delay_ms: parse_env_or("RETRY_BASE_DELAY_MS", defaults.retry_base_delay_ms)?,
            request_timeout_ms: parse_env_or("REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
        };

        if config.embedding_dimension == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_DIMENSION".into()));
        }
        if config.embedding_batch_size == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_BATCH_SIZE".into()));
        }
        if config.pipeline_concurrency == 0 {
            return Err(ConfigError::InvalidValue("PIPELINE_CONCURRENCY".into()));
        }
        if config.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue("REQUEST_TIMEOUT_MS".into()));
        }

        tracing::debug!(
            vector_store_url = %config.vector_store_url,
            collection = %config.vector_collection,
            embedding_model = %config.embedding_model,
            embedding_dimension = config.embedding_dimension,
            batch_size = config.embedding_batch_size,
            concurrency = config.pipeline_concurrency,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Retry policy derived from the configured budget.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    /// Timeout applied to each external HTTP request.
    ///
    /// A stalled backend call fails with a timeout, which the adapters map
    /// to a transient error so the retry policy engages.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, ConfigError> {
    raw.parse()
        .map_err(|_| ConfigError::InvalidValue(key.to_string()))
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(raw) => parse_env(key, raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert!(config.embedding_batch_size > 0);
        assert!(config.pipeline_concurrency > 0);
        assert!(config.retry_max_attempts >= 1);
    }

    #[test]
    fn retry_policy_reflects_configured_budget() {
        let config = Config {
            retry_max_attempts: 5,
            retry_base_delay_ms: 50,
            ..Config::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(50));
    }

    #[test]
    fn request_timeout_reflects_configured_budget() {
        let config = Config {
            request_timeout_ms: 1_500,
            ..Config::default()
        };
        assert_eq!(config.request_timeout(), Duration::from_millis(1_500));
    }
}
