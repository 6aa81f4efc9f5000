//! Deterministic segmentation of cleaned text into retrievable chunks.
//!
//! Flat mode splits on a separator, merges small sections up to a token
//! budget, semantically splits oversized sections, and finally applies an
//! optional sliding token overlap. Hierarchical mode segments twice: a coarse
//! parent pass, then an exact partition of each parent into children, so
//! children never cross parent boundaries and concatenating the children of a
//! parent reproduces the parent text byte-for-byte. Boundaries depend only on
//! the input text and configuration, never on timing or iteration order.

use crate::pipeline::request::SegmentationSpec;
use crate::pipeline::tokens::TokenCounter;
use crate::pipeline::types::{Chunk, ParentRecord, ValidationError};
use semchunk_rs::Chunker;
use uuid::Uuid;

const DEFAULT_MAX_TOKENS: usize = 500;
const DEFAULT_OVERLAP: usize = 50;
const DEFAULT_SEPARATOR: &str = "\n\n";

/// Smallest accepted chunk budget. Budgets below this produce fragments too
/// small to retrieve against.
pub const MIN_CHUNK_TOKENS: usize = 50;
/// Largest accepted chunk budget.
pub const MAX_CHUNK_TOKENS: usize = 4000;

/// Multiplier applied to the chunk budget for the hierarchical parent pass.
const PARENT_BUDGET_FACTOR: usize = 4;

/// Validated segmentation parameters.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    /// Token budget per chunk.
    pub max_tokens: usize,
    /// Sliding token overlap between adjacent flat chunks.
    pub overlap: usize,
    /// Separator used for the initial section split.
    pub separator: String,
}

impl SegmenterConfig {
    /// The fixed automatic-mode policy.
    pub fn automatic() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            overlap: DEFAULT_OVERLAP,
            separator: DEFAULT_SEPARATOR.to_string(),
        }
    }

    /// Validate explicit custom-mode parameters.
    pub fn from_spec(spec: &SegmentationSpec) -> Result<Self, ValidationError> {
        if spec.max_tokens < MIN_CHUNK_TOKENS || spec.max_tokens > MAX_CHUNK_TOKENS {
            return Err(ValidationError::InvalidSegmentation(format!(
                "max_tokens must be within [{MIN_CHUNK_TOKENS}, {MAX_CHUNK_TOKENS}], got {}",
                spec.max_tokens
            )));
        }
        if spec.chunk_overlap >= spec.max_tokens {
            return Err(ValidationError::InvalidSegmentation(format!(
                "chunk_overlap ({}) must be smaller than max_tokens ({})",
                spec.chunk_overlap, spec.max_tokens
            )));
        }
        let separator = spec
            .separator
            .clone()
            .filter(|separator| !separator.is_empty())
            .unwrap_or_else(|| DEFAULT_SEPARATOR.to_string());

        Ok(Self {
            max_tokens: spec.max_tokens,
            overlap: spec.chunk_overlap,
            separator,
        })
    }

    fn parent(&self) -> Self {
        Self {
            max_tokens: (self.max_tokens * PARENT_BUDGET_FACTOR).min(MAX_CHUNK_TOKENS),
            overlap: 0,
            separator: self.separator.clone(),
        }
    }
}

/// Splits cleaned text into ordered chunks or parent/child trees.
pub struct Segmenter {
    counter: TokenCounter,
    config: SegmenterConfig,
}

impl Segmenter {
    /// Build a segmenter from a token counter and validated configuration.
    pub fn new(counter: TokenCounter, config: SegmenterConfig) -> Self {
        Self { counter, config }
    }

    /// Segment into a flat ordered chunk sequence.
    ///
    /// Returns [`ValidationError::EmptyDocument`] when the cleaned text
    /// yields no chunks.
    pub fn segment(&self, cleaned_text: &str) -> Result<Vec<Chunk>, ValidationError> {
        let pieces = self.flat_pieces(cleaned_text, &self.config);
        if pieces.is_empty() {
            return Err(ValidationError::EmptyDocument);
        }

        let pieces = apply_overlap(
            pieces,
            self.config.max_tokens,
            self.config.overlap,
            &self.counter,
        );

        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(position, text)| Chunk {
                id: Uuid::new_v4().to_string(),
                text,
                position,
                parent_id: None,
            })
            .collect())
    }

    /// Segment into a parent/child tree.
    ///
    /// Parents come from a coarse pass (no overlap); each parent is then
    /// partitioned exactly into children. Every child carries its parent's
    /// id, children never span two parents, and no overlap is applied so the
    /// tree flattens back to the parent texts.
    pub fn segment_hierarchical(
        &self,
        cleaned_text: &str,
    ) -> Result<(Vec<ParentRecord>, Vec<Chunk>), ValidationError> {
        let parent_config = self.config.parent();
        let parent_texts = self.flat_pieces(cleaned_text, &parent_config);
        if parent_texts.is_empty() {
            return Err(ValidationError::EmptyDocument);
        }

        let mut parents = Vec::with_capacity(parent_texts.len());
        let mut children = Vec::new();

        for (parent_position, parent_text) in parent_texts.into_iter().enumerate() {
            let parent_id = Uuid::new_v4().to_string();

            for piece in split_exact(&parent_text, self.config.max_tokens, &self.counter) {
                children.push(Chunk {
                    id: Uuid::new_v4().to_string(),
                    text: piece.to_string(),
                    position: children.len(),
                    parent_id: Some(parent_id.clone()),
                });
            }

            parents.push(ParentRecord {
                id: parent_id,
                text: parent_text,
                position: parent_position,
            });
        }

        if children.is_empty() {
            return Err(ValidationError::EmptyDocument);
        }

        Ok((parents, children))
    }

    /// Separator split, greedy merge up to the budget, semantic split of
    /// oversized sections. No overlap; callers layer that on when wanted.
    fn flat_pieces(&self, text: &str, config: &SegmenterConfig) -> Vec<String> {
        let sections: Vec<&str> = text
            .split(config.separator.as_str())
            .map(str::trim)
            .filter(|section| !section.is_empty())
            .collect();

        let mut merged: Vec<String> = Vec::new();
        for section in sections {
            match merged.last_mut() {
                Some(last)
                    if self.counter.as_ref()(last) + self.counter.as_ref()(section) <= config.max_tokens =>
                {
                    last.push_str(&config.separator);
                    last.push_str(section);
                }
                _ => merged.push(section.to_string()),
            }
        }

        let mut pieces = Vec::new();
        for section in merged {
            if self.counter.as_ref()(&section) <= config.max_tokens {
                pieces.push(section);
                continue;
            }
            let counter = self.counter.clone();
            let chunker = Chunker::new(
                config.max_tokens,
                Box::new(move |segment: &str| counter.as_ref()(segment)),
            );
            pieces.extend(
                chunker
                    .chunk(&section)
                    .into_iter()
                    .filter(|piece| !piece.trim().is_empty()),
            );
        }
        pieces
    }
}

/// Partition `text` into contiguous substrings, cutting at whitespace
/// boundaries so no piece exceeds the token budget. Concatenating the pieces
/// reproduces `text` exactly.
fn split_exact<'a>(text: &'a str, budget: usize, counter: &TokenCounter) -> Vec<&'a str> {
    if text.is_empty() {
        return Vec::new();
    }
    if counter.as_ref()(text) <= budget {
        return vec![text];
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    let mut last_cut = None;

    for (offset, ch) in text.char_indices() {
        if !ch.is_whitespace() {
            continue;
        }
        if counter.as_ref()(&text[start..offset]) > budget {
            // Cut at the previous boundary; fall back to this one when a
            // single word exceeds the budget.
            let cut = last_cut.filter(|cut| *cut > start).unwrap_or(offset);
            pieces.push(&text[start..cut]);
            start = cut;
            last_cut = Some(offset);
        } else {
            last_cut = Some(offset);
        }
    }

    if start < text.len() {
        if counter.as_ref()(&text[start..]) > budget {
            if let Some(cut) = last_cut.filter(|cut| *cut > start) {
                pieces.push(&text[start..cut]);
                start = cut;
            }
        }
        pieces.push(&text[start..]);
    }

    pieces
}

/// Prefix each chunk after the first with the token-limited tail of its
/// predecessor, trimming from the front as needed to stay within the budget.
fn apply_overlap(
    pieces: Vec<String>,
    budget: usize,
    overlap: usize,
    counter: &TokenCounter,
) -> Vec<String> {
    let effective_overlap = overlap.min(budget.saturating_sub(1));
    if effective_overlap == 0 || pieces.len() < 2 {
        return pieces;
    }

    let mut overlapped = Vec::with_capacity(pieces.len());
    let mut iter = pieces.into_iter();
    let mut previous = iter.next().expect("len checked above");
    overlapped.push(previous.clone());

    for current in iter {
        let tail = token_tail(&previous, effective_overlap, counter);
        let combined = if tail.is_empty() {
            current.clone()
        } else {
            trim_to_budget(&format!("{tail} {current}"), budget, counter)
        };
        overlapped.push(combined);
        previous = current;
    }

    overlapped
}

/// The longest word-aligned suffix of `text` within `limit` tokens.
fn token_tail<'a>(text: &'a str, limit: usize, counter: &TokenCounter) -> &'a str {
    if counter.as_ref()(text) <= limit {
        return text.trim_start();
    }

    let mut boundaries: Vec<usize> = text
        .char_indices()
        .filter(|(_, ch)| ch.is_whitespace())
        .map(|(offset, _)| offset)
        .collect();
    boundaries.reverse();

    for boundary in boundaries {
        let candidate = text[boundary..].trim_start();
        if !candidate.is_empty() && counter.as_ref()(candidate) <= limit {
            return candidate;
        }
    }
    ""
}

/// Drop leading words until `text` fits the token budget.
fn trim_to_budget(text: &str, budget: usize, counter: &TokenCounter) -> String {
    if counter.as_ref()(text) <= budget {
        return text.to_string();
    }

    let mut start = 0;
    while start < text.len() {
        let next = text[start..]
            .char_indices()
            .find(|(offset, ch)| *offset > 0 && ch.is_whitespace())
            .map(|(offset, _)| start + offset)
            .unwrap_or(text.len());
        start = next;
        let candidate = text[start..].trim_start();
        if counter.as_ref()(candidate) <= budget {
            return candidate.to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tokens::whitespace_counter;

    fn segmenter(max_tokens: usize, overlap: usize) -> Segmenter {
        Segmenter::new(
            whitespace_counter(),
            SegmenterConfig {
                max_tokens,
                overlap,
                separator: DEFAULT_SEPARATOR.to_string(),
            },
        )
    }

    #[test]
    fn automatic_policy_has_expected_defaults() {
        let config = SegmenterConfig::automatic();
        assert_eq!(config.max_tokens, 500);
        assert_eq!(config.overlap, 50);
        assert_eq!(config.separator, "\n\n");
    }

    #[test]
    fn custom_config_rejects_out_of_range_budgets() {
        let too_small = SegmentationSpec {
            max_tokens: 10,
            chunk_overlap: 0,
            separator: None,
        };
        assert!(matches!(
            SegmenterConfig::from_spec(&too_small),
            Err(ValidationError::InvalidSegmentation(_))
        ));

        let overlap_too_large = SegmentationSpec {
            max_tokens: 100,
            chunk_overlap: 100,
            separator: None,
        };
        assert!(matches!(
            SegmenterConfig::from_spec(&overlap_too_large),
            Err(ValidationError::InvalidSegmentation(_))
        ));
    }

    #[test]
    fn short_document_yields_exactly_one_chunk() {
        let chunks = segmenter(500, 50).segment("A short document.").unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "A short document.");
        assert_eq!(chunks[0].position, 0);
        assert!(chunks[0].parent_id.is_none());
    }

    #[test]
    fn whitespace_only_document_is_rejected() {
        let error = segmenter(500, 50).segment("  \n\n  ").unwrap_err();
        assert_eq!(error, ValidationError::EmptyDocument);
    }

    #[test]
    fn segmentation_is_deterministic() {
        let text = "alpha beta gamma delta\n\nepsilon zeta eta theta\n\niota kappa";
        let segmenter = segmenter(4, 1);
        let first: Vec<String> = segmenter
            .segment(text)
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.text)
            .collect();
        let second: Vec<String> = segmenter
            .segment(text)
            .unwrap()
            .into_iter()
            .map(|chunk| chunk.text)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn small_sections_merge_up_to_the_budget() {
        let chunks = segmenter(500, 0)
            .segment("one two\n\nthree four\n\nfive six")
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "one two\n\nthree four\n\nfive six");
    }

    #[test]
    fn overlap_repeats_the_previous_tail() {
        let counter = whitespace_counter();
        let pieces = apply_overlap(
            vec!["one two three".into(), "four five six".into()],
            3,
            1,
            &counter,
        );
        assert_eq!(pieces[0], "one two three");
        assert!(pieces[1].starts_with("three"));
        assert!(counter.as_ref()(&pieces[1]) <= 3);
    }

    #[test]
    fn split_exact_partitions_without_loss() {
        let counter = whitespace_counter();
        let text = "one two three four five six seven";
        let pieces = split_exact(text, 3, &counter);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(counter.as_ref()(piece.trim()) <= 3);
        }
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn hierarchical_children_partition_their_parents() {
        let text =
            "alpha beta gamma delta epsilon zeta\n\neta theta iota kappa lambda mu nu xi omicron";
        let segmenter = Segmenter::new(
            whitespace_counter(),
            SegmenterConfig {
                max_tokens: 3,
                overlap: 0,
                separator: DEFAULT_SEPARATOR.to_string(),
            },
        );
        let (parents, children) = segmenter.segment_hierarchical(text).unwrap();
        assert!(parents.len() >= 2);

        for parent in &parents {
            let rebuilt: String = children
                .iter()
                .filter(|child| child.parent_id.as_deref() == Some(parent.id.as_str()))
                .map(|child| child.text.as_str())
                .collect();
            assert_eq!(rebuilt, parent.text);
        }

        // Every child references exactly one existing parent.
        for child in &children {
            let parent_id = child.parent_id.as_deref().expect("child has parent");
            assert!(parents.iter().any(|parent| parent.id == parent_id));
        }
    }

    #[test]
    fn hierarchical_positions_follow_document_order() {
        let text = "a b c d e f\n\ng h i j k l";
        let segmenter = Segmenter::new(
            whitespace_counter(),
            SegmenterConfig {
                max_tokens: 2,
                overlap: 0,
                separator: DEFAULT_SEPARATOR.to_string(),
            },
        );
        let (_, children) = segmenter.segment_hierarchical(text).unwrap();
        for (expected, child) in children.iter().enumerate() {
            assert_eq!(child.position, expected);
        }
    }
}
