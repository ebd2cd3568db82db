//! Question model — generated questions, validation status, statistics.
//!
//! Submodules: assertion inference ([`infer`]), template rendering
//! ([`templates`]), the validation gate ([`validate`]) and the generator
//! that drives them ([`generator`]).

pub mod generator;
pub mod infer;
pub mod templates;
pub mod validate;

use serde::{Deserialize, Serialize};

pub use generator::{GeneratedQuestions, QuestionGenerator};
pub use validate::{QuestionValidator, RejectReason};

/// Whether a question tests one section or relationships across sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionScope {
    Section,
    Document,
}

/// How the question text was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionOrigin {
    /// Rendered from a fixed per-assertion-kind rule.
    Template,
    /// Produced by the auxiliary model for assertions no template parsed.
    ModelAssisted,
}

/// Confidence in an extracted expected answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerConfidence {
    High,
    Medium,
    Low,
}

/// The answer a correct reader should produce, with its provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpectedAnswer {
    pub text: String,
    /// Start and end line in the source document.
    pub source_lines: (usize, usize),
    pub confidence: AnswerConfidence,
}

/// Outcome of the validation gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Passed,
    Rejected { reason: RejectReason },
}

impl ValidationStatus {
    /// Only passed questions are eligible for answer collection.
    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed)
    }
}

/// One generated question, accepted or rejected.
///
/// Rejected questions stay in the artifact for auditing; they are never
/// queried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    /// Sequential id, `q_001` format.
    pub id: String,
    pub text: String,
    pub scope: QuestionScope,
    pub origin: QuestionOrigin,
    /// The assertion this question tests; absent for document-level ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_assertion_id: Option<String>,
    /// Sections the question targets. One for section scope, two or more
    /// for document scope.
    pub section_ids: Vec<String>,
    pub expected_answer: ExpectedAnswer,
    pub validation: ValidationStatus,
}

impl Question {
    /// Format a sequential question id.
    pub fn format_id(n: usize) -> String {
        format!("q_{n:03}")
    }
}

/// Counts and coverage computed over one generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionStatistics {
    pub total: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub section_level: usize,
    pub document_level: usize,
    pub sections_covered: usize,
    pub total_sections: usize,
    pub section_coverage_pct: f64,
    pub assertions_covered: usize,
    pub total_assertions: usize,
    pub assertion_coverage_pct: f64,
}

impl QuestionStatistics {
    /// Compute statistics from a finished question set.
    ///
    /// Coverage counts only accepted questions; rejected ones test nothing.
    pub fn compute(questions: &[Question], total_sections: usize, total_assertions: usize) -> Self {
        let accepted: Vec<&Question> = questions
            .iter()
            .filter(|q| q.validation.is_passed())
            .collect();

        let sections_covered = accepted
            .iter()
            .flat_map(|q| q.section_ids.iter())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let assertions_covered = accepted
            .iter()
            .filter_map(|q| q.source_assertion_id.as_ref())
            .collect::<std::collections::HashSet<_>>()
            .len();

        let pct = |covered: usize, total: usize| {
            if total == 0 {
                0.0
            } else {
                (covered as f64 / total as f64 * 1000.0).round() / 10.0
            }
        };

        Self {
            total: questions.len(),
            accepted: accepted.len(),
            rejected: questions.len() - accepted.len(),
            section_level: accepted
                .iter()
                .filter(|q| q.scope == QuestionScope::Section)
                .count(),
            document_level: accepted
                .iter()
                .filter(|q| q.scope == QuestionScope::Document)
                .count(),
            sections_covered,
            total_sections,
            section_coverage_pct: pct(sections_covered, total_sections),
            assertions_covered,
            total_assertions,
            assertion_coverage_pct: pct(assertions_covered, total_assertions),
        }
    }
}
