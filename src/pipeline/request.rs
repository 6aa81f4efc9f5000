//! Per-request configuration: the wire shape accepted by the pipeline and
//! its fail-fast validation.

use crate::pipeline::rules;
use crate::pipeline::segmenter::SegmenterConfig;
use crate::pipeline::types::ValidationError;
use serde::Deserialize;

/// Index backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingTechnique {
    /// Dense vector embedding index.
    HighQuality,
    /// Sparse inverted keyword index.
    Economy,
}

/// Content shape the document is transformed into before indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DocForm {
    /// Flat text chunks; each chunk is one retrievable unit.
    TextModel,
    /// Parent/child chunk tree; children are retrievable, parents stored for
    /// context expansion.
    HierarchicalModel,
    /// Question/answer pairs synthesized per chunk; questions are indexed.
    QaModel,
}

/// Pre-processing mode selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessMode {
    /// Implied rule set and default segmentation policy.
    Automatic,
    /// Caller-supplied rules and segmentation parameters.
    Custom,
}

/// One pre-processing rule toggle as supplied on the request.
#[derive(Debug, Clone, Deserialize)]
pub struct PreprocessingRule {
    /// Registry id of the rule, e.g. `remove_extra_spaces`.
    pub id: String,
    /// Whether the rule should run for this document.
    pub enabled: bool,
}

/// Explicit segmentation parameters accepted in custom mode.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentationSpec {
    /// Token budget per chunk.
    pub max_tokens: usize,
    /// Sliding token overlap between adjacent chunks.
    #[serde(default)]
    pub chunk_overlap: usize,
    /// Separator split before budget-based merging; defaults to `"\n\n"`.
    #[serde(default)]
    pub separator: Option<String>,
}

/// Rule and segmentation overrides carried in custom mode.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomRules {
    /// Ordered rule toggles; application order is canonical regardless of
    /// declaration order.
    #[serde(default)]
    pub pre_processing_rules: Vec<PreprocessingRule>,
    /// Optional segmentation overrides.
    #[serde(default)]
    pub segmentation: Option<SegmentationSpec>,
}

/// Pre-processing configuration for one request.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessRule {
    /// Automatic or custom mode.
    pub mode: ProcessMode,
    /// Custom rule set; must be present iff `mode` is custom.
    #[serde(default)]
    pub rules: Option<CustomRules>,
}

impl ProcessRule {
    /// An automatic-mode rule with no overrides.
    pub fn automatic() -> Self {
        Self {
            mode: ProcessMode::Automatic,
            rules: None,
        }
    }
}

/// A document indexing request.
///
/// Mirrors the backend-agnostic request shape: when `original_document_id` is
/// supplied the run re-indexes that document, superseding its committed
/// entry; otherwise a new document identity is created.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexRequest {
    /// Existing document to supersede; absent for first-time indexing.
    #[serde(default)]
    pub original_document_id: Option<String>,
    /// Optional display name carried into unit payloads.
    #[serde(default)]
    pub name: Option<String>,
    /// Backend selector.
    pub indexing_technique: IndexingTechnique,
    /// Content shape selector.
    pub doc_form: DocForm,
    /// Output language for QA synthesis; required iff `doc_form` is
    /// `qa_model`.
    #[serde(default)]
    pub doc_language: Option<String>,
    /// Pre-processing configuration.
    pub process_rule: ProcessRule,
}

impl IndexRequest {
    /// Reject malformed configuration before any processing starts.
    ///
    /// Checks, in order: mode/rules consistency, rule-id registry membership,
    /// segmentation parameter ranges, the economy/QA exclusion, and QA
    /// language presence. The first failure is returned; nothing is
    /// partially applied.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match (self.process_rule.mode, &self.process_rule.rules) {
            (ProcessMode::Automatic, Some(_)) => {
                return Err(ValidationError::RulesWithAutomaticMode);
            }
            (ProcessMode::Custom, None) => return Err(ValidationError::MissingCustomRules),
            (ProcessMode::Custom, Some(custom)) => {
                for rule in &custom.pre_processing_rules {
                    if !rules::is_known_rule(&rule.id) {
                        return Err(ValidationError::UnknownRule(rule.id.clone()));
                    }
                }
                if let Some(segmentation) = &custom.segmentation {
                    SegmenterConfig::from_spec(segmentation)?;
                }
            }
            (ProcessMode::Automatic, None) => {}
        }

        if self.doc_form == DocForm::QaModel {
            if self.indexing_technique == IndexingTechnique::Economy {
                return Err(ValidationError::EconomyQaConflict);
            }
            let has_language = self
                .doc_language
                .as_deref()
                .is_some_and(|language| !language.trim().is_empty());
            if !has_language {
                return Err(ValidationError::MissingLanguage);
            }
        }

        Ok(())
    }
}
