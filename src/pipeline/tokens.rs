//! Token counting for segmentation budgets.
//!
//! Chunk budgets are expressed in tokens. Counting prefers the `tiktoken`
//! encoding registered for the configured embedding model and falls back to a
//! whitespace counter when no encoding is available (common for locally
//! aliased models). The fallback is logged at `warn` level once per call site
//! to aid diagnosis while keeping ingestion flowing.

use anyhow::Error as TokenizerError;
use std::sync::Arc;
use tiktoken_rs::{
    CoreBPE, cl100k_base, get_bpe_from_model, o200k_base, p50k_base, p50k_edit, r50k_base,
};

/// Shared closure mapping a text span to its token count.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Build a token counter for the given embedding model.
///
/// Falls back to whitespace counting when neither the model nor an encoding
/// name resolves to a known `tiktoken` encoding.
pub fn counter_for_model(model: &str) -> TokenCounter {
    match resolve_encoding(model) {
        Ok(encoding) => {
            let encoding = Arc::new(encoding);
            Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
        }
        Err(error) => {
            tracing::warn!(
                model,
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            whitespace_counter()
        }
    }
}

/// Token counter that treats whitespace-delimited words as tokens.
///
/// Non-empty text always counts as at least one token.
pub fn whitespace_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

fn resolve_encoding(model: &str) -> Result<CoreBPE, TokenizerError> {
    let normalized = model.trim();
    if normalized.is_empty() {
        return cl100k_base();
    }

    match get_bpe_from_model(normalized) {
        Ok(encoding) => Ok(encoding),
        Err(model_err) => {
            tracing::debug!(
                model = normalized,
                error = %model_err,
                "Tokenizer model lookup failed; trying encoding name"
            );
            encoding_from_name(normalized).unwrap_or_else(|| {
                Err(TokenizerError::msg(format!(
                    "no encoding registered for '{normalized}'"
                )))
            })
        }
    }
}

fn encoding_from_name(name: &str) -> Option<Result<CoreBPE, TokenizerError>> {
    match name {
        "cl100k_base" => Some(cl100k_base()),
        "o200k_base" => Some(o200k_base()),
        "p50k_base" => Some(p50k_base()),
        "p50k_edit" => Some(p50k_edit()),
        "r50k_base" | "gpt2" => Some(r50k_base()),
        _ => None,
    }
}
