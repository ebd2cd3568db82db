//! Probe configuration — every tunable surface of the engine.

use serde::{Deserialize, Serialize};

/// Generation coverage targets, in percent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoverageTargets {
    /// Share of sections that should receive at least one question.
    pub section_pct: f64,
    /// Share of assertions that should be tested by a question.
    pub element_pct: f64,
}

impl Default for CoverageTargets {
    fn default() -> Self {
        Self {
            section_pct: 70.0,
            element_pct: 60.0,
        }
    }
}

/// Engine configuration. The binary loads this from a YAML profile; the
/// library treats it as plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub coverage: CoverageTargets,
    /// Hard cap on accepted questions, bounding downstream query cost.
    pub max_questions: usize,
    /// Model that scores answers. Judge failure aborts the run.
    pub judge_model: String,
    /// Model for assisted question generation; the judge model when unset.
    pub assist_model: Option<String>,
    pub include_document_level: bool,
    /// Questions at or above this question/answer token overlap are
    /// rejected as leaking. Explicit by design; there is no hidden default
    /// elsewhere.
    pub leakage_threshold: f64,
    /// Questions at or above this Jaccard similarity to an accepted
    /// question are rejected as duplicates.
    pub uniqueness_threshold: f64,
    /// Worker pool width for collection and evaluation waves.
    pub max_concurrency: usize,
    /// Backoff before the single retry after a query timeout.
    pub retry_backoff_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            coverage: CoverageTargets::default(),
            max_questions: 50,
            judge_model: "claude".to_string(),
            assist_model: None,
            include_document_level: true,
            leakage_threshold: 0.30,
            uniqueness_threshold: 0.80,
            max_concurrency: 4,
            retry_backoff_ms: 2000,
        }
    }
}

impl ProbeConfig {
    /// The model used for assisted generation.
    pub fn assist_model(&self) -> &str {
        self.assist_model.as_deref().unwrap_or(&self.judge_model)
    }
}
