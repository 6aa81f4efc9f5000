//! Pre-processing rule engine.
//!
//! Rules are pure text-to-text transforms kept in a static registry keyed by
//! id. The registry order is the canonical application order: URL/email
//! stripping always runs before whitespace collapsing so the space left
//! behind by a removed URL gets collapsed too. Requests toggle rules on and
//! off but never reorder them.

use crate::pipeline::request::{ProcessMode, ProcessRule};
use regex::Regex;
use std::sync::OnceLock;

type RuleFn = fn(&str) -> String;

/// Registry entries in canonical application order.
const REGISTRY: &[(&str, RuleFn)] = &[
    ("remove_urls_emails", remove_urls_emails),
    ("remove_extra_spaces", remove_extra_spaces),
];

/// Rule ids enabled when the request selects automatic mode.
const AUTOMATIC_ENABLED: &[&str] = &["remove_extra_spaces"];

/// Whether `id` names a registered pre-processing rule.
pub fn is_known_rule(id: &str) -> bool {
    REGISTRY.iter().any(|(known, _)| *known == id)
}

/// Apply the enabled pre-processing rules to `text` in canonical order.
///
/// The caller is expected to have validated the rule set already
/// ([`crate::pipeline::request::IndexRequest::validate`]); unknown ids are
/// skipped here rather than re-checked.
pub fn apply(text: &str, process_rule: &ProcessRule) -> String {
    let mut cleaned = text.to_string();
    for (id, rule) in REGISTRY {
        if rule_enabled(id, process_rule) {
            cleaned = rule(&cleaned);
        }
    }
    cleaned
}

fn rule_enabled(id: &str, process_rule: &ProcessRule) -> bool {
    match process_rule.mode {
        ProcessMode::Automatic => AUTOMATIC_ENABLED.contains(&id),
        ProcessMode::Custom => process_rule
            .rules
            .as_ref()
            .map(|custom| {
                custom
                    .pre_processing_rules
                    .iter()
                    .any(|rule| rule.id == id && rule.enabled)
            })
            .unwrap_or(false),
    }
}

/// Strip URLs and email addresses.
fn remove_urls_emails(text: &str) -> String {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    static EMAIL_RE: OnceLock<Regex> = OnceLock::new();

    let url_re = URL_RE.get_or_init(|| {
        Regex::new(r"(?:https?://|www\.)\S+").expect("url pattern compiles")
    });
    let email_re = EMAIL_RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
            .expect("email pattern compiles")
    });

    let without_urls = url_re.replace_all(text, "");
    email_re.replace_all(&without_urls, "").into_owned()
}

/// Collapse redundant whitespace while preserving paragraph breaks.
///
/// Runs of three or more newlines become a single blank line; inside each
/// paragraph, any whitespace run (including lone newlines) collapses to one
/// space.
fn remove_extra_spaces(text: &str) -> String {
    static PARA_RE: OnceLock<Regex> = OnceLock::new();
    let para_re = PARA_RE.get_or_init(|| Regex::new(r"\n{3,}").expect("newline pattern compiles"));

    let normalized = text.replace("\r\n", "\n");
    let collapsed = para_re.replace_all(&normalized, "\n\n");

    collapsed
        .split("\n\n")
        .map(|paragraph| paragraph.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}
