//! Question generation — template-first, model-assisted fallback, all
//! routed through the validation gate.
//!
//! Coverage policy: round one gives each section a chance at one
//! question; round two keeps drawing from the sections with the most
//! untested assertions until the assertion-coverage target is met, the
//! pool is exhausted, or the hard question cap is reached. Document-level
//! questions from dependency and conflict facts come last, under their
//! own cap.

use std::collections::{HashMap, VecDeque};

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::conflict::{Conflict, ConflictKind};
use crate::question::templates::{self, RenderedQuestion};
use crate::question::validate::QuestionValidator;
use crate::question::{
    AnswerConfidence, ExpectedAnswer, Question, QuestionOrigin, QuestionScope, QuestionStatistics,
    ValidationStatus,
};
use crate::section::{Assertion, Section};
use crate::session::{extract_json_payload, SessionRegistry};
use crate::xref::ReferenceAnalysis;

/// Upper bound on document-level questions per document.
const DOCUMENT_LEVEL_CAP: usize = 10;

/// Output of one generation run.
#[derive(Debug, Clone)]
pub struct GeneratedQuestions {
    /// Every validated candidate, accepted and rejected.
    pub questions: Vec<Question>,
    pub statistics: QuestionStatistics,
}

/// Expected shape of an assisted-generation reply.
#[derive(Debug, Deserialize)]
struct AssistReply {
    question: String,
    answer: String,
}

pub struct QuestionGenerator {
    config: ProbeConfig,
}

impl QuestionGenerator {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    /// Generate and validate questions for one document.
    ///
    /// `assist` enables model-assisted generation for assertions no
    /// template parses; without it those assertions are skipped.
    pub async fn generate(
        &self,
        document_id: &str,
        sections: &[Section],
        assertions: &[Assertion],
        analysis: &ReferenceAnalysis,
        conflicts: &[Conflict],
        assist: Option<&SessionRegistry>,
    ) -> GeneratedQuestions {
        let section_map: HashMap<&str, &Section> =
            sections.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut validator = QuestionValidator::new(
            self.config.leakage_threshold,
            self.config.uniqueness_threshold,
        );
        let mut questions: Vec<Question> = Vec::new();
        let mut accepted = 0usize;

        // Pool of untested assertions per section, in document order.
        let mut pool: Vec<(&str, VecDeque<&Assertion>)> = sections
            .iter()
            .map(|s| {
                let queue = assertions
                    .iter()
                    .filter(|a| a.section_id == s.id)
                    .collect::<VecDeque<_>>();
                (s.id.as_str(), queue)
            })
            .collect();

        let target_assertions = ((assertions.len() as f64
            * self.config.coverage.element_pct
            / 100.0)
            .ceil()) as usize;

        // Round 1: one accepted question per section.
        for (section_id, queue) in pool.iter_mut() {
            if accepted >= self.config.max_questions {
                break;
            }
            let Some(&section) = section_map.get(section_id) else {
                continue;
            };
            while let Some(assertion) = queue.pop_front() {
                let ok = self
                    .try_assertion(
                        document_id,
                        section,
                        assertion,
                        assist,
                        &mut validator,
                        &mut questions,
                    )
                    .await;
                if ok {
                    accepted += 1;
                    break;
                }
            }
        }

        // Round 2: fill toward the assertion-coverage target, drawing
        // from the sections with the most untested assertions.
        while accepted < target_assertions && accepted < self.config.max_questions {
            let Some((section_id, queue)) = pool
                .iter_mut()
                .filter(|(_, q)| !q.is_empty())
                .max_by_key(|(_, q)| q.len())
            else {
                break;
            };
            let Some(&section) = section_map.get(section_id) else {
                break;
            };
            let assertion = queue.pop_front().expect("non-empty queue");
            if self
                .try_assertion(
                    document_id,
                    section,
                    assertion,
                    assist,
                    &mut validator,
                    &mut questions,
                )
                .await
            {
                accepted += 1;
            }
        }

        if self.config.include_document_level {
            accepted += self.document_level_questions(
                &section_map,
                analysis,
                conflicts,
                accepted,
                &mut validator,
                &mut questions,
            );
        }

        let statistics = QuestionStatistics::compute(&questions, sections.len(), assertions.len());
        if statistics.section_coverage_pct < self.config.coverage.section_pct {
            // Sections without a single extractable, validatable
            // assertion stay uncovered; surfaced rather than padded.
            warn!(
                target_pct = self.config.coverage.section_pct,
                actual_pct = statistics.section_coverage_pct,
                "Section coverage target not met"
            );
        }
        info!(
            document_id,
            total = statistics.total,
            accepted = statistics.accepted,
            rejected = statistics.rejected,
            section_coverage_pct = statistics.section_coverage_pct,
            assertion_coverage_pct = statistics.assertion_coverage_pct,
            "Question generation complete"
        );

        GeneratedQuestions {
            questions,
            statistics,
        }
    }

    /// Produce, validate and record one candidate for an assertion.
    /// Returns whether it was accepted.
    async fn try_assertion(
        &self,
        document_id: &str,
        section: &Section,
        assertion: &Assertion,
        assist: Option<&SessionRegistry>,
        validator: &mut QuestionValidator,
        questions: &mut Vec<Question>,
    ) -> bool {
        let (rendered, origin, confidence) = match templates::render(assertion, section) {
            Some(rendered) => (rendered, QuestionOrigin::Template, AnswerConfidence::High),
            None => {
                let Some(registry) = assist else {
                    debug!(assertion = %assertion.id, "No template match and no assist model; skipping");
                    return false;
                };
                match self.assist_candidate(document_id, registry, assertion).await {
                    Some(rendered) => (
                        rendered,
                        QuestionOrigin::ModelAssisted,
                        AnswerConfidence::Medium,
                    ),
                    None => return false,
                }
            }
        };

        let validation = match validator.validate(
            &rendered.text,
            &rendered.expected_answer,
            &section.content,
        ) {
            Ok(()) => ValidationStatus::Passed,
            Err(reason) => ValidationStatus::Rejected { reason },
        };
        let passed = validation.is_passed();

        questions.push(Question {
            id: Question::format_id(questions.len() + 1),
            text: rendered.text,
            scope: QuestionScope::Section,
            origin,
            source_assertion_id: Some(assertion.id.clone()),
            section_ids: vec![assertion.section_id.clone()],
            expected_answer: ExpectedAnswer {
                text: rendered.expected_answer,
                source_lines: (assertion.start_line, assertion.end_line),
                confidence,
            },
            validation,
        });
        passed
    }

    /// Ask the assist model for a question the templates could not
    /// produce. Any failure skips the assertion; generation never aborts
    /// on the assist path.
    async fn assist_candidate(
        &self,
        document_id: &str,
        registry: &SessionRegistry,
        assertion: &Assertion,
    ) -> Option<RenderedQuestion> {
        let prompt = format!(
            "From the following documentation assertion, write one comprehension \
             question whose answer is stated by the assertion itself.\n\
             Do not reuse the assertion's exact wording in the question.\n\n\
             ASSERTION:\n{}\n\n\
             Respond with JSON only:\n{{\"question\": \"...\", \"answer\": \"...\"}}",
            assertion.text
        );

        let model = self.config.assist_model();
        let response = match registry.query(document_id, model, &prompt).await {
            Ok(response) => response,
            Err(err) => {
                warn!(assertion = %assertion.id, model, error = %err, "Assisted generation query failed");
                return None;
            }
        };

        match serde_json::from_str::<AssistReply>(extract_json_payload(&response.text)) {
            Ok(reply) if !reply.question.trim().is_empty() && !reply.answer.trim().is_empty() => {
                Some(RenderedQuestion {
                    text: reply.question.trim().to_string(),
                    expected_answer: reply.answer.trim().to_string(),
                })
            }
            Ok(_) => {
                warn!(assertion = %assertion.id, "Assist reply missing question or answer");
                None
            }
            Err(err) => {
                warn!(assertion = %assertion.id, error = %err, "Unparseable assist reply");
                None
            }
        }
    }

    /// Questions about cross-section facts: dependency edges and
    /// conflicts. Same validation gate, own cap. Returns accepted count.
    fn document_level_questions(
        &self,
        section_map: &HashMap<&str, &Section>,
        analysis: &ReferenceAnalysis,
        conflicts: &[Conflict],
        already_accepted: usize,
        validator: &mut QuestionValidator,
        questions: &mut Vec<Question>,
    ) -> usize {
        let mut accepted = 0usize;

        for edge in &analysis.edges {
            if accepted >= DOCUMENT_LEVEL_CAP
                || already_accepted + accepted >= self.config.max_questions
            {
                return accepted;
            }
            let (Some(&from), Some(&to)) = (
                section_map.get(edge.from.as_str()),
                section_map.get(edge.to.as_str()),
            ) else {
                continue;
            };
            let rendered = RenderedQuestion {
                text: format!(
                    "Which other section does the '{}' section depend on?",
                    from.header
                ),
                expected_answer: to.header.clone(),
            };
            if self.push_document_question(rendered, &[from, to], validator, questions) {
                accepted += 1;
            }
        }

        for conflict in conflicts {
            if accepted >= DOCUMENT_LEVEL_CAP
                || already_accepted + accepted >= self.config.max_questions
            {
                return accepted;
            }
            let involved: Vec<&Section> = conflict
                .sections
                .iter()
                .filter_map(|id| section_map.get(id.as_str()).copied())
                .collect();
            if involved.len() < 2 {
                continue;
            }
            let rendered = match conflict.kind {
                ConflictKind::ContradictoryRequirements => RenderedQuestion {
                    text: format!(
                        "Do the '{}' and '{}' sections impose compatible rules?",
                        involved[0].header, involved[1].header
                    ),
                    expected_answer: conflict
                        .evidence
                        .iter()
                        .map(|e| e.excerpt.as_str())
                        .collect::<Vec<_>>()
                        .join(" ; "),
                },
                ConflictKind::ValueConflict => {
                    let Some(term) = conflict.term.as_deref() else {
                        continue;
                    };
                    RenderedQuestion {
                        text: format!(
                            "Which setting do the '{}' and '{}' sections value differently?",
                            involved[0].header, involved[1].header
                        ),
                        expected_answer: term.to_string(),
                    }
                }
            };
            if self.push_document_question(rendered, &involved, validator, questions) {
                accepted += 1;
            }
        }

        accepted
    }

    fn push_document_question(
        &self,
        rendered: RenderedQuestion,
        involved: &[&Section],
        validator: &mut QuestionValidator,
        questions: &mut Vec<Question>,
    ) -> bool {
        // Document-level answers are traceable to any involved section,
        // including its header line.
        let combined: String = involved
            .iter()
            .map(|s| format!("{}\n{}", s.header, s.content))
            .collect::<Vec<_>>()
            .join("\n");

        let validation =
            match validator.validate(&rendered.text, &rendered.expected_answer, &combined) {
                Ok(()) => ValidationStatus::Passed,
                Err(reason) => ValidationStatus::Rejected { reason },
            };
        let passed = validation.is_passed();

        let start = involved.iter().map(|s| s.start_line).min().unwrap_or(0);
        let end = involved.iter().map(|s| s.end_line).max().unwrap_or(0);

        questions.push(Question {
            id: Question::format_id(questions.len() + 1),
            text: rendered.text,
            scope: QuestionScope::Document,
            origin: QuestionOrigin::Template,
            source_assertion_id: None,
            section_ids: involved.iter().map(|s| s.id.clone()).collect(),
            expected_answer: ExpectedAnswer {
                text: rendered.expected_answer,
                source_lines: (start, end),
                confidence: AnswerConfidence::Medium,
            },
            validation,
        });
        passed
    }
}
