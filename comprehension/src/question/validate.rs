//! Validation gate — every question passes four checks before it may be
//! queried.
//!
//! 1. Leakage: the question must not reveal its own answer.
//! 2. Answerability: every answer token must be traceable to the source
//!    section text.
//! 3. Grammar: well-formed single-concept interrogative.
//! 4. Uniqueness: not a near-duplicate of an already-accepted question.
//!
//! Failures carry the specific reason; rejected questions are kept in the
//! artifact for auditing, never queried.

use std::collections::HashSet;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Why a question was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Question/answer token overlap at or above the leakage threshold.
    Leakage,
    /// An answer token has no anchor in the source section.
    NotAnswerable,
    /// Not a well-formed single-concept interrogative.
    Malformed,
    /// Too similar to an already-accepted question.
    Duplicate,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Leakage => write!(f, "leakage"),
            Self::NotAnswerable => write!(f, "not_answerable"),
            Self::Malformed => write!(f, "malformed"),
            Self::Duplicate => write!(f, "duplicate"),
        }
    }
}

/// Carriers of no information, dropped during normalization.
static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "is", "are",
        "be", "as", "with", "by", "this", "that", "it", "its", "was", "were", "do", "does",
        "what", "when", "where", "which", "how", "why", "who",
    ]
    .into_iter()
    .collect()
});

/// Attribute-naming words shared between a question and its answer by
/// construction ("maximum", "batch", "size"). Excluded from the leakage
/// token sets so naming the attribute does not count as revealing the
/// answer.
static STRUCTURAL_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "maximum", "minimum", "max", "min", "limit", "default", "defaults", "value", "step",
        "size", "batch", "format", "number", "count", "section", "required", "happens", "fails",
        "set", "involve",
    ]
    .into_iter()
    .collect()
});

const INTERROGATIVE_OPENERS: &[&str] = &[
    "what", "where", "when", "why", "how", "which", "who", "is", "are", "does", "do", "can",
    "should", "according",
];

const MIN_QUESTION_LEN: usize = 20;
const MAX_QUESTION_LEN: usize = 500;

/// Lowercased alphanumeric tokens, stop words removed.
pub fn normalize_tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

fn leakage_tokens(text: &str) -> HashSet<String> {
    normalize_tokens(text)
        .into_iter()
        .filter(|t| !STRUCTURAL_WORDS.contains(t.as_str()))
        .collect()
}

/// Fraction of answer tokens already present in the question.
pub fn leakage_ratio(question: &str, answer: &str) -> f64 {
    let answer_tokens = leakage_tokens(answer);
    if answer_tokens.is_empty() {
        return 0.0;
    }
    let question_tokens = leakage_tokens(question);
    let shared = answer_tokens.intersection(&question_tokens).count();
    shared as f64 / answer_tokens.len() as f64
}

/// Token-set Jaccard similarity between two questions.
fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Stateful validator for one document's question set.
///
/// Accepted questions feed the uniqueness check, so validation order is
/// part of the contract: first-accepted wins, later near-duplicates are
/// rejected.
pub struct QuestionValidator {
    leakage_threshold: f64,
    uniqueness_threshold: f64,
    accepted: Vec<HashSet<String>>,
}

impl QuestionValidator {
    pub fn new(leakage_threshold: f64, uniqueness_threshold: f64) -> Self {
        Self {
            leakage_threshold,
            uniqueness_threshold,
            accepted: Vec::new(),
        }
    }

    /// Run all four checks. On pass, the question is recorded for future
    /// uniqueness comparisons.
    pub fn validate(
        &mut self,
        question: &str,
        expected_answer: &str,
        source_text: &str,
    ) -> Result<(), RejectReason> {
        if !is_interrogative(question) {
            return Err(RejectReason::Malformed);
        }

        let ratio = leakage_ratio(question, expected_answer);
        if ratio >= self.leakage_threshold {
            debug!(ratio, question, "Question rejected for leakage");
            return Err(RejectReason::Leakage);
        }

        if !is_answerable(expected_answer, source_text) {
            return Err(RejectReason::NotAnswerable);
        }

        let tokens = normalize_tokens(question);
        if self
            .accepted
            .iter()
            .any(|prev| jaccard(prev, &tokens) >= self.uniqueness_threshold)
        {
            return Err(RejectReason::Duplicate);
        }

        self.accepted.push(tokens);
        Ok(())
    }
}

/// Every normalized answer token must appear in the source section text.
fn is_answerable(answer: &str, source_text: &str) -> bool {
    let answer_tokens = normalize_tokens(answer);
    if answer_tokens.is_empty() {
        return true;
    }
    let source_tokens = normalize_tokens(source_text);
    answer_tokens.is_subset(&source_tokens)
}

/// Well-formed single-concept interrogative: known opener, one `?` at the
/// end, bounded length, no second clause chained onto the question.
fn is_interrogative(question: &str) -> bool {
    let trimmed = question.trim();
    if !trimmed.ends_with('?') || trimmed.matches('?').count() > 1 {
        return false;
    }
    if trimmed.len() < MIN_QUESTION_LEN || trimmed.len() > MAX_QUESTION_LEN {
        return false;
    }

    let first = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_lowercase();
    if !INTERROGATIVE_OPENERS.contains(&first.as_str()) {
        return false;
    }

    // "and what/where/..." chains a second question into the first.
    let lower = trimmed.to_lowercase();
    !["what", "where", "when", "why", "how", "which"]
        .iter()
        .any(|w| lower.contains(&format!("and {w} ")) || lower.ends_with(&format!("and {w}?")))
}
