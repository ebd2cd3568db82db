//! Consensus calculation — deterministic aggregation of judge verdicts
//! into one class per question, and the issues that fall out of it.
//!
//! Classification is a pure function of a question's evaluation set:
//! same evaluations, same class, regardless of arrival order. Zero
//! evaluations refuse to classify rather than defaulting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::collect::PairKey;
use crate::evaluate::{Evaluation, Score};
use crate::question::Question;
use crate::section::Priority;

/// Weight a `partially_correct` verdict contributes to the correct
/// tally. `correct` contributes 1.0. Fixed discount policy.
pub const PARTIAL_CREDIT: f64 = 0.5;

/// Aggregate agreement category for one question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusClass {
    /// Every evaluated model landed in the correct partition.
    Agreement,
    /// Majority correct, at least one incorrect.
    PartialAgreement,
    /// No majority either way.
    Disagreement,
    /// Every evaluated model incorrect — a documentation gap signal,
    /// not a model deficiency.
    WidespreadFailure,
}

impl std::fmt::Display for ConsensusClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agreement => write!(f, "agreement"),
            Self::PartialAgreement => write!(f, "partial_agreement"),
            Self::Disagreement => write!(f, "disagreement"),
            Self::WidespreadFailure => write!(f, "widespread_failure"),
        }
    }
}

/// Consensus outcome for one question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub question_id: String,
    pub class: ConsensusClass,
    /// Models scored correct or partially correct, sorted.
    pub correct_models: Vec<String>,
    /// Models scored incorrect, sorted.
    pub incorrect_models: Vec<String>,
    /// Models whose verdict was unanswerable, sorted; excluded from the
    /// majority arithmetic.
    pub unanswerable_models: Vec<String>,
}

/// Classification refusals.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsensusError {
    /// No evaluations at all: every model timed out. Absence of evidence
    /// must block classification, not default it.
    #[error("no evaluations recorded for question {0}")]
    NoEvaluations(String),
}

/// Kind of comprehension issue surfaced to the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Models split on the answer.
    ComprehensionDivergence,
    /// Every model failed; the documentation likely lacks the answer.
    DocumentationGap,
    /// A minority misread a high-stakes assertion.
    MinorityMisreading,
}

/// Issue severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Terminal artifact of the engine, consumed by reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub question_id: String,
    pub section_ids: Vec<String>,
    pub evidence: String,
    pub recommendation: String,
}

pub struct ConsensusCalculator;

impl ConsensusCalculator {
    /// Classify one question from its full evaluation set.
    ///
    /// Callers must pass every evaluation recorded for the question;
    /// partial sets from slow models would leak into a wrong class.
    pub fn classify(
        question_id: &str,
        evaluations: &[&Evaluation],
    ) -> Result<ConsensusResult, ConsensusError> {
        if evaluations.is_empty() {
            return Err(ConsensusError::NoEvaluations(question_id.to_string()));
        }

        let mut correct_models = Vec::new();
        let mut incorrect_models = Vec::new();
        let mut unanswerable_models = Vec::new();
        let mut correct_weight = 0.0f64;

        for eval in evaluations {
            match eval.score {
                Score::Correct => {
                    correct_weight += 1.0;
                    correct_models.push(eval.model_id.clone());
                }
                Score::PartiallyCorrect => {
                    correct_weight += PARTIAL_CREDIT;
                    correct_models.push(eval.model_id.clone());
                }
                Score::Incorrect => incorrect_models.push(eval.model_id.clone()),
                Score::Unanswerable => unanswerable_models.push(eval.model_id.clone()),
            }
        }
        correct_models.sort();
        incorrect_models.sort();
        unanswerable_models.sort();

        let evaluated = correct_models.len() + incorrect_models.len();

        let class = if evaluated == 0 {
            // Only unanswerable verdicts: the judge confirmed no model
            // could answer from the document.
            ConsensusClass::WidespreadFailure
        } else if incorrect_models.is_empty() {
            ConsensusClass::Agreement
        } else if correct_models.is_empty() {
            ConsensusClass::WidespreadFailure
        } else if correct_weight > evaluated as f64 / 2.0 {
            ConsensusClass::PartialAgreement
        } else {
            ConsensusClass::Disagreement
        };

        debug!(question_id, class = %class, "Consensus classified");
        Ok(ConsensusResult {
            question_id: question_id.to_string(),
            class,
            correct_models,
            incorrect_models,
            unanswerable_models,
        })
    }

    /// Classify every question that has evaluations; questions whose
    /// models all timed out are refused individually.
    pub fn classify_all(
        questions: &[Question],
        evaluations: &HashMap<PairKey, Evaluation>,
    ) -> HashMap<String, Result<ConsensusResult, ConsensusError>> {
        questions
            .iter()
            .filter(|q| q.validation.is_passed())
            .map(|q| {
                let evals: Vec<&Evaluation> = evaluations
                    .values()
                    .filter(|e| e.question_id == q.id)
                    .collect();
                (q.id.clone(), Self::classify(&q.id, &evals))
            })
            .collect()
    }

    /// Derive the issue a consensus result warrants, if any.
    ///
    /// `disagreement` and `widespread_failure` always produce one;
    /// `partial_agreement` only when the misread assertion is critical or
    /// high priority; `agreement` never.
    pub fn issue_for(
        result: &ConsensusResult,
        question: &Question,
        assertion_priority: Option<Priority>,
    ) -> Option<Issue> {
        let evidence = format!(
            "correct: [{}]; incorrect: [{}]; unanswerable: [{}]",
            result.correct_models.join(", "),
            result.incorrect_models.join(", "),
            result.unanswerable_models.join(", "),
        );

        match result.class {
            ConsensusClass::Agreement => None,
            ConsensusClass::Disagreement => Some(Issue {
                kind: IssueKind::ComprehensionDivergence,
                severity: Severity::Medium,
                question_id: question.id.clone(),
                section_ids: question.section_ids.clone(),
                evidence,
                recommendation: format!(
                    "Models disagree ({} correct, {} incorrect). Clarify the \
                     passage this question targets.",
                    result.correct_models.len(),
                    result.incorrect_models.len(),
                ),
            }),
            ConsensusClass::WidespreadFailure => Some(Issue {
                kind: IssueKind::DocumentationGap,
                severity: Severity::High,
                question_id: question.id.clone(),
                section_ids: question.section_ids.clone(),
                evidence,
                recommendation:
                    "Every model failed; the documentation likely does not state \
                     this answer clearly enough to be found."
                        .to_string(),
            }),
            ConsensusClass::PartialAgreement => {
                let priority = assertion_priority?;
                if !priority.is_issue_worthy() {
                    return None;
                }
                Some(Issue {
                    kind: IssueKind::MinorityMisreading,
                    severity: Severity::Low,
                    question_id: question.id.clone(),
                    section_ids: question.section_ids.clone(),
                    evidence,
                    recommendation: format!(
                        "A minority of models misread a {priority} priority \
                         assertion. Consider tightening the wording.",
                    ),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{
        AnswerConfidence, ExpectedAnswer, QuestionOrigin, QuestionScope, ValidationStatus,
    };

    fn eval(model: &str, score: Score) -> Evaluation {
        Evaluation {
            question_id: "q_001".to_string(),
            model_id: model.to_string(),
            score,
            reasoning: String::new(),
            evidence: String::new(),
        }
    }

    fn classify(scores: &[(&str, Score)]) -> ConsensusResult {
        let evals: Vec<Evaluation> = scores.iter().map(|(m, s)| eval(m, *s)).collect();
        let refs: Vec<&Evaluation> = evals.iter().collect();
        ConsensusCalculator::classify("q_001", &refs).unwrap()
    }

    fn question() -> Question {
        Question {
            id: "q_001".to_string(),
            text: "What is the maximum batch size?".to_string(),
            scope: QuestionScope::Section,
            origin: QuestionOrigin::Template,
            source_assertion_id: Some("limits-a1".to_string()),
            section_ids: vec!["limits".to_string()],
            expected_answer: ExpectedAnswer {
                text: "20 items".to_string(),
                source_lines: (1, 1),
                confidence: AnswerConfidence::High,
            },
            validation: ValidationStatus::Passed,
        }
    }

    #[test]
    fn test_all_correct_is_agreement() {
        let result = classify(&[
            ("a", Score::Correct),
            ("b", Score::Correct),
            ("c", Score::PartiallyCorrect),
        ]);
        assert_eq!(result.class, ConsensusClass::Agreement);
        assert_eq!(result.correct_models, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_majority_correct_is_partial_agreement() {
        // Two of three correct, one dissenting.
        let result = classify(&[
            ("a", Score::Correct),
            ("b", Score::Correct),
            ("c", Score::Incorrect),
        ]);
        assert_eq!(result.class, ConsensusClass::PartialAgreement);
        assert_eq!(result.incorrect_models, vec!["c"]);
    }

    #[test]
    fn test_all_incorrect_is_widespread_failure() {
        let result = classify(&[
            ("a", Score::Incorrect),
            ("b", Score::Incorrect),
            ("c", Score::Incorrect),
        ]);
        assert_eq!(result.class, ConsensusClass::WidespreadFailure);
    }

    #[test]
    fn test_split_with_partial_credit_is_disagreement() {
        // Two partials (weight 1.0) against one incorrect over three
        // evaluated: 1.0 is not a majority of 3.
        let result = classify(&[
            ("a", Score::PartiallyCorrect),
            ("b", Score::PartiallyCorrect),
            ("c", Score::Incorrect),
        ]);
        assert_eq!(result.class, ConsensusClass::Disagreement);
    }

    #[test]
    fn test_even_split_is_disagreement() {
        let result = classify(&[
            ("a", Score::Correct),
            ("b", Score::Incorrect),
        ]);
        assert_eq!(result.class, ConsensusClass::Disagreement);
    }

    #[test]
    fn test_all_unanswerable_is_widespread_failure() {
        let result = classify(&[
            ("a", Score::Unanswerable),
            ("b", Score::Unanswerable),
        ]);
        assert_eq!(result.class, ConsensusClass::WidespreadFailure);
        assert_eq!(result.unanswerable_models, vec!["a", "b"]);
    }

    #[test]
    fn test_unanswerable_excluded_from_majority_arithmetic() {
        let result = classify(&[
            ("a", Score::Correct),
            ("b", Score::Correct),
            ("c", Score::Incorrect),
            ("d", Score::Unanswerable),
        ]);
        assert_eq!(result.class, ConsensusClass::PartialAgreement);
    }

    #[test]
    fn test_no_evaluations_refuses_to_classify() {
        let err = ConsensusCalculator::classify("q_001", &[]).unwrap_err();
        assert_eq!(err, ConsensusError::NoEvaluations("q_001".to_string()));
    }

    #[test]
    fn test_classification_is_order_independent() {
        let forward = classify(&[
            ("a", Score::Correct),
            ("b", Score::Incorrect),
            ("c", Score::Correct),
        ]);
        let reverse = classify(&[
            ("c", Score::Correct),
            ("b", Score::Incorrect),
            ("a", Score::Correct),
        ]);
        assert_eq!(forward.class, reverse.class);
        assert_eq!(forward.correct_models, reverse.correct_models);
        assert_eq!(forward.incorrect_models, reverse.incorrect_models);
    }

    #[test]
    fn test_disagreement_always_issues_medium() {
        let result = classify(&[("a", Score::Correct), ("b", Score::Incorrect)]);
        let issue = ConsensusCalculator::issue_for(&result, &question(), Some(Priority::Low))
            .expect("disagreement always produces an issue");
        assert_eq!(issue.severity, Severity::Medium);
        assert_eq!(issue.kind, IssueKind::ComprehensionDivergence);
    }

    #[test]
    fn test_widespread_failure_issues_high() {
        // Every model wrong.
        let result = classify(&[
            ("a", Score::Incorrect),
            ("b", Score::Incorrect),
            ("c", Score::Incorrect),
        ]);
        let issue = ConsensusCalculator::issue_for(&result, &question(), None).unwrap();
        assert_eq!(issue.severity, Severity::High);
        assert_eq!(issue.kind, IssueKind::DocumentationGap);
    }

    #[test]
    fn test_partial_agreement_issue_gated_on_priority() {
        let result = classify(&[
            ("a", Score::Correct),
            ("b", Score::Correct),
            ("c", Score::Incorrect),
        ]);
        assert!(
            ConsensusCalculator::issue_for(&result, &question(), Some(Priority::Medium)).is_none()
        );
        let issue =
            ConsensusCalculator::issue_for(&result, &question(), Some(Priority::Critical))
                .unwrap();
        assert_eq!(issue.severity, Severity::Low);
        assert_eq!(issue.kind, IssueKind::MinorityMisreading);
    }

    #[test]
    fn test_partial_agreement_without_priority_suppressed() {
        // Document-level questions carry no assertion priority.
        let result = classify(&[
            ("a", Score::Correct),
            ("b", Score::Correct),
            ("c", Score::Incorrect),
        ]);
        assert!(ConsensusCalculator::issue_for(&result, &question(), None).is_none());
    }

    #[test]
    fn test_agreement_never_issues() {
        let result = classify(&[("a", Score::Correct)]);
        assert!(
            ConsensusCalculator::issue_for(&result, &question(), Some(Priority::Critical))
                .is_none()
        );
    }
}
