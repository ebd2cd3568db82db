//! Judge evaluation — every recorded answer scored against expected
//! evidence by one designated judge model.
//!
//! Fail-fast: a judge transport failure, timeout, or unparseable verdict
//! aborts the evaluation wave and the run. A broken judge scoring
//! answers as "incorrect" would manufacture false ambiguity signals,
//! which is strictly worse than no result.

use std::collections::HashMap;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::collect::{Answer, PairKey};
use crate::config::ProbeConfig;
use crate::question::Question;
use crate::section::Section;
use crate::session::{extract_json_payload, SessionRegistry};

/// Judge verdict for one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Score {
    /// Matches the expected answer in meaning.
    Correct,
    /// Incomplete or slightly off.
    PartiallyCorrect,
    /// Contradicts the expected answer.
    Incorrect,
    /// The question cannot be answered from the provided context.
    Unanswerable,
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Correct => write!(f, "correct"),
            Self::PartiallyCorrect => write!(f, "partially_correct"),
            Self::Incorrect => write!(f, "incorrect"),
            Self::Unanswerable => write!(f, "unanswerable"),
        }
    }
}

/// The judge's scoring of one (question, model) answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub question_id: String,
    pub model_id: String,
    pub score: Score,
    pub reasoning: String,
    /// Span the judge quoted from the documentation.
    pub evidence: String,
}

/// Fatal judge failure. Aborts the run; no partial issue list is emitted.
#[derive(Debug, Error)]
#[error("judge failed on question {question_id} (answer from {model_id}): {reason}")]
pub struct JudgeFailure {
    pub question_id: String,
    pub model_id: String,
    pub reason: String,
}

/// Reply shape required from the judge.
#[derive(Debug, Deserialize)]
struct JudgeReply {
    score: Score,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    evidence: String,
}

pub struct AnswerEvaluator<'a> {
    registry: &'a SessionRegistry,
    config: &'a ProbeConfig,
}

impl<'a> AnswerEvaluator<'a> {
    pub fn new(registry: &'a SessionRegistry, config: &'a ProbeConfig) -> Self {
        Self { registry, config }
    }

    /// Score every recorded answer. The wave is parallel; the first judge
    /// failure cancels the remaining in-flight evaluations and surfaces.
    pub async fn evaluate(
        &self,
        document_id: &str,
        sections: &[Section],
        questions: &[Question],
        answers: &HashMap<PairKey, Answer>,
    ) -> Result<HashMap<PairKey, Evaluation>, JudgeFailure> {
        let question_map: HashMap<&str, &Question> =
            questions.iter().map(|q| (q.id.as_str(), q)).collect();
        let section_map: HashMap<&str, &Section> =
            sections.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut pairs: Vec<&Answer> = answers.values().collect();
        // Stable work order; completion order stays nondeterministic.
        pairs.sort_by(|a, b| {
            (&a.question_id, &a.model_id).cmp(&(&b.question_id, &b.model_id))
        });

        info!(
            document_id,
            answers = pairs.len(),
            judge = %self.config.judge_model,
            "Evaluating answers"
        );

        let evaluations: Vec<Evaluation> = stream::iter(pairs)
            .map(|answer| {
                let question = question_map.get(answer.question_id.as_str()).copied();
                self.judge_pair(document_id, question, answer, &section_map)
            })
            .buffer_unordered(self.config.max_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(evaluations
            .into_iter()
            .map(|e| ((e.question_id.clone(), e.model_id.clone()), e))
            .collect())
    }

    async fn judge_pair(
        &self,
        document_id: &str,
        question: Option<&Question>,
        answer: &Answer,
        section_map: &HashMap<&str, &Section>,
    ) -> Result<Evaluation, JudgeFailure> {
        let Some(question) = question else {
            // An answer without its question is an artifact mismatch, not
            // a judge problem; skip-by-scoring would hide it, so fail.
            return Err(JudgeFailure {
                question_id: answer.question_id.clone(),
                model_id: answer.model_id.clone(),
                reason: "answer references an unknown question".to_string(),
            });
        };

        let context: String = question
            .section_ids
            .iter()
            .filter_map(|id| section_map.get(id.as_str()))
            .map(|s| format!("## {}\n{}", s.header, s.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let prompt = judge_prompt(&context, question, answer);
        let response = self
            .registry
            .query(document_id, &self.config.judge_model, &prompt)
            .await
            .map_err(|err| JudgeFailure {
                question_id: answer.question_id.clone(),
                model_id: answer.model_id.clone(),
                reason: err.to_string(),
            })?;

        let reply: JudgeReply = serde_json::from_str(extract_json_payload(&response.text))
            .map_err(|err| {
                warn!(
                    question = %answer.question_id,
                    model = %answer.model_id,
                    error = %err,
                    "Judge returned an unparseable verdict"
                );
                JudgeFailure {
                    question_id: answer.question_id.clone(),
                    model_id: answer.model_id.clone(),
                    reason: format!("unparseable judge verdict: {err}"),
                }
            })?;

        Ok(Evaluation {
            question_id: answer.question_id.clone(),
            model_id: answer.model_id.clone(),
            score: reply.score,
            reasoning: reply.reasoning,
            evidence: reply.evidence,
        })
    }
}

fn judge_prompt(context: &str, question: &Question, answer: &Answer) -> String {
    format!(
        "You are evaluating a model's answer to a documentation comprehension \
         question.\n\n\
         DOCUMENTATION CONTEXT:\n{context}\n\n\
         QUESTION:\n{question}\n\n\
         EXPECTED ANSWER:\n{expected}\n\n\
         MODEL'S ANSWER:\n{candidate}\n\n\
         Reply with JSON only:\n\
         {{\"score\": \"correct|partially_correct|incorrect|unanswerable\", \
         \"reasoning\": \"why\", \"evidence\": \"quote from the documentation\"}}\n\n\
         SCORING CRITERIA:\n\
         - correct: matches the expected answer in meaning\n\
         - partially_correct: incomplete or slightly off\n\
         - incorrect: contradicts the expected answer\n\
         - unanswerable: cannot be answered from the provided context",
        context = context,
        question = question.text,
        expected = question.expected_answer.text,
        candidate = answer.answer_text,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{
        AnswerConfidence, ExpectedAnswer, QuestionOrigin, QuestionScope, ValidationStatus,
    };
    use crate::section::SectionKind;
    use crate::session::{ModelAdapter, QueryError, QueryResponse, SessionHandle};
    use async_trait::async_trait;
    use std::sync::Arc;

    fn section(id: &str) -> Section {
        Section {
            id: id.to_string(),
            header: "Limits".to_string(),
            content: "Maximum batch size: 20 items.".to_string(),
            level: 2,
            start_line: 1,
            end_line: 1,
            kind: SectionKind::Instruction,
        }
    }

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
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

    fn answer(question_id: &str, model_id: &str) -> Answer {
        Answer {
            question_id: question_id.to_string(),
            model_id: model_id.to_string(),
            answer_text: "20 items".to_string(),
            confidence_stated: Some("high".to_string()),
            response_time_ms: 5,
            raw_response: String::new(),
        }
    }

    struct ScriptedJudge {
        reply: Result<String, QueryError>,
    }

    #[async_trait]
    impl ModelAdapter for ScriptedJudge {
        async fn ensure_session(
            &self,
            document_id: &str,
            model_id: &str,
            _context: &str,
        ) -> Result<SessionHandle, QueryError> {
            Ok(SessionHandle {
                document_id: document_id.to_string(),
                model_id: model_id.to_string(),
                session_id: "judge".to_string(),
            })
        }

        async fn query(
            &self,
            _handle: &SessionHandle,
            _prompt: &str,
        ) -> Result<QueryResponse, QueryError> {
            match &self.reply {
                Ok(text) => Ok(QueryResponse {
                    text: text.clone(),
                    latency_ms: 3,
                }),
                Err(err) => Err(err.clone()),
            }
        }
    }

    async fn judge_registry(reply: Result<String, QueryError>) -> SessionRegistry {
        let mut registry = SessionRegistry::new();
        registry.register("claude", Arc::new(ScriptedJudge { reply }));
        registry.ensure("doc", "claude", "ctx").await.unwrap();
        registry
    }

    fn answers_map(entries: Vec<Answer>) -> HashMap<PairKey, Answer> {
        entries
            .into_iter()
            .map(|a| ((a.question_id.clone(), a.model_id.clone()), a))
            .collect()
    }

    #[tokio::test]
    async fn test_evaluates_all_answers() {
        let registry = judge_registry(Ok(
            r#"{"score": "correct", "reasoning": "matches", "evidence": "20 items"}"#.to_string(),
        ))
        .await;
        let config = ProbeConfig::default();
        let evaluator = AnswerEvaluator::new(&registry, &config);

        let answers = answers_map(vec![answer("q_001", "model-a"), answer("q_001", "model-b")]);
        let evaluations = evaluator
            .evaluate("doc", &[section("limits")], &[question("q_001")], &answers)
            .await
            .unwrap();

        assert_eq!(evaluations.len(), 2);
        let eval = &evaluations[&("q_001".to_string(), "model-a".to_string())];
        assert_eq!(eval.score, Score::Correct);
        assert_eq!(eval.evidence, "20 items");
    }

    #[tokio::test]
    async fn test_judge_transport_failure_aborts() {
        let registry =
            judge_registry(Err(QueryError::Transport("connection refused".to_string()))).await;
        let config = ProbeConfig::default();
        let evaluator = AnswerEvaluator::new(&registry, &config);

        let answers = answers_map(vec![answer("q_001", "model-a")]);
        let err = evaluator
            .evaluate("doc", &[section("limits")], &[question("q_001")], &answers)
            .await
            .unwrap_err();
        assert_eq!(err.question_id, "q_001");
        assert!(err.reason.contains("connection refused"));
    }

    #[tokio::test]
    async fn test_unparseable_judge_verdict_aborts() {
        let registry = judge_registry(Ok("the answer seems fine to me".to_string())).await;
        let config = ProbeConfig::default();
        let evaluator = AnswerEvaluator::new(&registry, &config);

        let answers = answers_map(vec![answer("q_001", "model-a")]);
        let err = evaluator
            .evaluate("doc", &[section("limits")], &[question("q_001")], &answers)
            .await
            .unwrap_err();
        assert!(err.reason.contains("unparseable judge verdict"));
    }

    #[tokio::test]
    async fn test_invalid_score_value_aborts() {
        let registry = judge_registry(Ok(
            r#"{"score": "mostly_right", "reasoning": "?", "evidence": ""}"#.to_string(),
        ))
        .await;
        let config = ProbeConfig::default();
        let evaluator = AnswerEvaluator::new(&registry, &config);

        let answers = answers_map(vec![answer("q_001", "model-a")]);
        assert!(evaluator
            .evaluate("doc", &[section("limits")], &[question("q_001")], &answers)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_no_answers_is_empty_success() {
        let registry = judge_registry(Ok(String::new())).await;
        let config = ProbeConfig::default();
        let evaluator = AnswerEvaluator::new(&registry, &config);
        let evaluations = evaluator
            .evaluate("doc", &[section("limits")], &[question("q_001")], &HashMap::new())
            .await
            .unwrap();
        assert!(evaluations.is_empty());
    }

    #[test]
    fn test_score_serde() {
        assert_eq!(
            serde_json::to_string(&Score::PartiallyCorrect).unwrap(),
            "\"partially_correct\""
        );
        let parsed: Score = serde_json::from_str("\"unanswerable\"").unwrap();
        assert_eq!(parsed, Score::Unanswerable);
    }

    #[test]
    fn test_judge_prompt_contains_all_parts() {
        let prompt = judge_prompt("ctx text", &question("q_001"), &answer("q_001", "m"));
        assert!(prompt.contains("ctx text"));
        assert!(prompt.contains("What is the maximum batch size?"));
        assert!(prompt.contains("20 items"));
        assert!(prompt.contains("SCORING CRITERIA"));
    }
}
