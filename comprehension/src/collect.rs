//! Answer collection — every (passed question, model) pair queried
//! through its session.
//!
//! Pairs are dispatched through a `buffer_unordered` worker pool; the
//! per-session mutex in the registry is the only shared resource. A
//! timed-out or failed pair records no Answer and never blocks the rest
//! of the run.

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::question::Question;
use crate::session::{extract_json_payload, QueryError, QueryResponse, SessionError, SessionRegistry};

/// `(question_id, model_id)` — the key of every per-pair collection.
pub type PairKey = (String, String);

/// One model's recorded answer to one question. A missing entry means
/// the model timed out or failed for that pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub question_id: String,
    pub model_id: String,
    pub answer_text: String,
    /// Confidence the model stated about itself, verbatim.
    pub confidence_stated: Option<String>,
    pub response_time_ms: u64,
    pub raw_response: String,
}

/// Shape models are asked to reply in.
#[derive(Debug, Deserialize)]
struct AnswerReply {
    answer: String,
    #[serde(default)]
    confidence: Option<String>,
}

pub struct AnswerCollector<'a> {
    registry: &'a SessionRegistry,
    config: &'a ProbeConfig,
}

impl<'a> AnswerCollector<'a> {
    pub fn new(registry: &'a SessionRegistry, config: &'a ProbeConfig) -> Self {
        Self { registry, config }
    }

    /// Collect answers for every passed question from every model.
    pub async fn collect(
        &self,
        document_id: &str,
        questions: &[Question],
        models: &[String],
    ) -> HashMap<PairKey, Answer> {
        let pairs: Vec<(&Question, &String)> = questions
            .iter()
            .filter(|q| q.validation.is_passed())
            .flat_map(|q| models.iter().map(move |m| (q, m)))
            .collect();

        info!(
            document_id,
            pairs = pairs.len(),
            concurrency = self.config.max_concurrency,
            "Collecting answers"
        );

        let answers: Vec<Option<Answer>> = stream::iter(pairs)
            .map(|(question, model)| self.collect_pair(document_id, question, model))
            .buffer_unordered(self.config.max_concurrency.max(1))
            .collect()
            .await;

        answers
            .into_iter()
            .flatten()
            .map(|a| ((a.question_id.clone(), a.model_id.clone()), a))
            .collect()
    }

    async fn collect_pair(
        &self,
        document_id: &str,
        question: &Question,
        model: &str,
    ) -> Option<Answer> {
        let prompt = answer_prompt(question);
        let response = match self.query_with_retry(document_id, model, &prompt).await {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    question = %question.id,
                    model,
                    error = %err,
                    "No answer recorded for pair"
                );
                return None;
            }
        };

        match parse_answer(&response.text) {
            Some((answer_text, confidence_stated)) => Some(Answer {
                question_id: question.id.clone(),
                model_id: model.to_string(),
                answer_text,
                confidence_stated,
                response_time_ms: response.latency_ms,
                raw_response: response.text,
            }),
            None => {
                warn!(question = %question.id, model, "Unparseable answer; recording none");
                None
            }
        }
    }

    /// One retry after backoff on timeout or transport failure; a second
    /// failure yields no answer.
    async fn query_with_retry(
        &self,
        document_id: &str,
        model: &str,
        prompt: &str,
    ) -> Result<QueryResponse, SessionError> {
        match self.registry.query(document_id, model, prompt).await {
            Err(SessionError::Query(err @ (QueryError::Timeout | QueryError::Transport(_)))) => {
                debug!(model, error = %err, "Query failed, retrying once");
                tokio::time::sleep(Duration::from_millis(self.config.retry_backoff_ms)).await;
                self.registry.query(document_id, model, prompt).await
            }
            other => other,
        }
    }
}

/// The prompt sent for one question. The document itself is already in
/// the session context.
fn answer_prompt(question: &Question) -> String {
    format!(
        "You are being tested on your comprehension of the document loaded \
         in this session.\n\n\
         QUESTION:\n{}\n\n\
         Reply with JSON only:\n\
         {{\"answer\": \"your answer\", \"confidence\": \"high|medium|low\"}}",
        question.text
    )
}

/// Parse a model reply: strip fences, try JSON, fall back to the raw
/// text as a low-confidence answer. Returns `None` only when there is
/// nothing usable at all.
fn parse_answer(raw: &str) -> Option<(String, Option<String>)> {
    let payload = extract_json_payload(raw);
    if let Ok(reply) = serde_json::from_str::<AnswerReply>(payload) {
        if reply.answer.trim().is_empty() {
            return None;
        }
        return Some((reply.answer.trim().to_string(), reply.confidence));
    }

    let fallback = raw.trim();
    if fallback.is_empty() {
        None
    } else {
        Some((fallback.to_string(), Some("low".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::question::{
        AnswerConfidence, ExpectedAnswer, QuestionOrigin, QuestionScope, ValidationStatus,
    };
    use crate::question::RejectReason;
    use crate::session::{ModelAdapter, SessionHandle};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn question(id: &str, passed: bool) -> Question {
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
            validation: if passed {
                ValidationStatus::Passed
            } else {
                ValidationStatus::Rejected {
                    reason: RejectReason::Leakage,
                }
            },
        }
    }

    /// Adapter whose behavior is scripted per model id.
    struct ScriptedAdapter {
        reply: Result<String, QueryError>,
        calls: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn replying(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            })
        }

        fn timing_out() -> Arc<Self> {
            Arc::new(Self {
                reply: Err(QueryError::Timeout),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ModelAdapter for ScriptedAdapter {
        async fn ensure_session(
            &self,
            document_id: &str,
            model_id: &str,
            _context: &str,
        ) -> Result<SessionHandle, QueryError> {
            Ok(SessionHandle {
                document_id: document_id.to_string(),
                model_id: model_id.to_string(),
                session_id: "s".to_string(),
            })
        }

        async fn query(
            &self,
            _handle: &SessionHandle,
            _prompt: &str,
        ) -> Result<QueryResponse, QueryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.reply {
                Ok(text) => Ok(QueryResponse {
                    text: text.clone(),
                    latency_ms: 5,
                }),
                Err(err) => Err(err.clone()),
            }
        }
    }

    fn fast_config() -> ProbeConfig {
        ProbeConfig {
            retry_backoff_ms: 0,
            ..ProbeConfig::default()
        }
    }

    async fn registry_with(
        models: &[(&str, Arc<ScriptedAdapter>)],
    ) -> SessionRegistry {
        let mut registry = SessionRegistry::new();
        for (model, adapter) in models {
            registry.register(*model, adapter.clone());
            registry.ensure("doc", model, "ctx").await.unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn test_collects_from_all_models() {
        let a = ScriptedAdapter::replying(r#"{"answer": "20 items", "confidence": "high"}"#);
        let b = ScriptedAdapter::replying(r#"{"answer": "20 items", "confidence": "medium"}"#);
        let registry = registry_with(&[("model-a", a), ("model-b", b)]).await;
        let config = fast_config();
        let collector = AnswerCollector::new(&registry, &config);

        let questions = vec![question("q_001", true)];
        let models = vec!["model-a".to_string(), "model-b".to_string()];
        let answers = collector.collect("doc", &questions, &models).await;

        assert_eq!(answers.len(), 2);
        let answer = &answers[&("q_001".to_string(), "model-a".to_string())];
        assert_eq!(answer.answer_text, "20 items");
        assert_eq!(answer.confidence_stated.as_deref(), Some("high"));
    }

    #[tokio::test]
    async fn test_rejected_questions_not_queried() {
        let a = ScriptedAdapter::replying(r#"{"answer": "20 items"}"#);
        let registry = registry_with(&[("model-a", a.clone())]).await;
        let config = fast_config();
        let collector = AnswerCollector::new(&registry, &config);

        let questions = vec![question("q_001", false)];
        let answers = collector
            .collect("doc", &questions, &["model-a".to_string()])
            .await;

        assert!(answers.is_empty());
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_double_timeout_records_no_answer_and_continues() {
        let slow = ScriptedAdapter::timing_out();
        let ok = ScriptedAdapter::replying(r#"{"answer": "20 items"}"#);
        let registry = registry_with(&[("slow", slow.clone()), ("ok", ok)]).await;
        let config = fast_config();
        let collector = AnswerCollector::new(&registry, &config);

        let questions = vec![question("q_001", true)];
        let models = vec!["slow".to_string(), "ok".to_string()];
        let answers = collector.collect("doc", &questions, &models).await;

        // Initial attempt plus exactly one retry.
        assert_eq!(slow.calls.load(Ordering::SeqCst), 2);
        assert_eq!(answers.len(), 1);
        assert!(answers.contains_key(&("q_001".to_string(), "ok".to_string())));
    }

    #[tokio::test]
    async fn test_non_json_reply_falls_back_to_raw_text() {
        let a = ScriptedAdapter::replying("The maximum is 20 items.");
        let registry = registry_with(&[("model-a", a)]).await;
        let config = fast_config();
        let collector = AnswerCollector::new(&registry, &config);

        let answers = collector
            .collect("doc", &[question("q_001", true)], &["model-a".to_string()])
            .await;
        let answer = &answers[&("q_001".to_string(), "model-a".to_string())];
        assert_eq!(answer.answer_text, "The maximum is 20 items.");
        assert_eq!(answer.confidence_stated.as_deref(), Some("low"));
    }

    #[tokio::test]
    async fn test_empty_reply_records_no_answer() {
        let a = ScriptedAdapter::replying("   ");
        let registry = registry_with(&[("model-a", a)]).await;
        let config = fast_config();
        let collector = AnswerCollector::new(&registry, &config);

        let answers = collector
            .collect("doc", &[question("q_001", true)], &["model-a".to_string()])
            .await;
        assert!(answers.is_empty());
    }

    #[test]
    fn test_parse_answer_fenced_json() {
        let (text, confidence) =
            parse_answer("```json\n{\"answer\": \"42\", \"confidence\": \"high\"}\n```").unwrap();
        assert_eq!(text, "42");
        assert_eq!(confidence.as_deref(), Some("high"));
    }

    #[test]
    fn test_parse_answer_empty_answer_field() {
        assert!(parse_answer(r#"{"answer": ""}"#).is_none());
    }
}
