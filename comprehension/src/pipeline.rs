//! Pipeline orchestration — strict stage barriers over the engine.
//!
//! Generation completes (and validates) before collection starts;
//! evaluation blocks on collection; consensus for a question requires
//! that question's full evaluation set. A failed run names the stage
//! that failed and why.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::{
    AnswersArtifact, ArtifactError, QuestionOutcome, QuestionsArtifact, ResultsArtifact,
};
use crate::collect::AnswerCollector;
use crate::config::ProbeConfig;
use crate::conflict::ConflictDetector;
use crate::consensus::{ConsensusCalculator, ConsensusError, Issue};
use crate::evaluate::{AnswerEvaluator, JudgeFailure};
use crate::question::infer::infer_assertions;
use crate::question::QuestionGenerator;
use crate::section::{Assertion, Priority, Section};
use crate::session::{SessionError, SessionRegistry};
use crate::xref::CrossReferenceAnalyzer;

/// Pipeline stages, named in errors and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Sessions,
    Generate,
    Collect,
    Evaluate,
    Consensus,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sessions => write!(f, "sessions"),
            Self::Generate => write!(f, "generate"),
            Self::Collect => write!(f, "collect"),
            Self::Evaluate => write!(f, "evaluate"),
            Self::Consensus => write!(f, "consensus"),
        }
    }
}

/// A failed run: which stage, and why.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{stage} stage failed: {source}")]
    Session {
        stage: Stage,
        #[source]
        source: SessionError,
    },

    /// Judge failure: fail-fast, no results artifact is written.
    #[error("evaluate stage failed: {source}")]
    Judge {
        #[from]
        source: JudgeFailure,
    },

    #[error("{stage} stage failed: {source}")]
    Artifact {
        stage: Stage,
        #[source]
        source: ArtifactError,
    },
}

/// Everything a completed run produced.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub questions: QuestionsArtifact,
    pub answers: AnswersArtifact,
    pub results: ResultsArtifact,
}

pub struct Pipeline {
    config: ProbeConfig,
    registry: SessionRegistry,
}

impl Pipeline {
    pub fn new(config: ProbeConfig, registry: SessionRegistry) -> Self {
        Self { config, registry }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// The context each session is loaded with: the full document.
    pub fn document_context(sections: &[Section]) -> String {
        sections
            .iter()
            .map(|s| format!("{} {}\n{}", "#".repeat(s.level.max(1) as usize), s.header, s.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Ensure sessions for every answering model plus the judge and
    /// assist models. Idempotent.
    pub async fn init_sessions(
        &self,
        document_id: &str,
        sections: &[Section],
        models: &[String],
    ) -> Result<(), PipelineError> {
        let mut wanted: Vec<&str> = models.iter().map(String::as_str).collect();
        wanted.push(self.config.judge_model.as_str());
        wanted.push(self.config.assist_model());
        self.ensure_models(document_id, sections, &wanted).await
    }

    /// Ensure sessions for exactly the given models. Idempotent.
    pub async fn ensure_models(
        &self,
        document_id: &str,
        sections: &[Section],
        models: &[&str],
    ) -> Result<(), PipelineError> {
        let context = Self::document_context(sections);
        let mut wanted = models.to_vec();
        wanted.sort_unstable();
        wanted.dedup();

        for model in wanted {
            self.registry
                .ensure(document_id, model, &context)
                .await
                .map_err(|source| PipelineError::Session {
                    stage: Stage::Sessions,
                    source,
                })?;
        }
        Ok(())
    }

    /// Stage 1: analysis and question generation.
    pub async fn generate_stage(
        &self,
        run_id: &str,
        document_id: &str,
        sections: &[Section],
        assertions: &[Assertion],
    ) -> QuestionsArtifact {
        info!(run_id, document_id, stage = %Stage::Generate, "Stage started");
        let analysis = CrossReferenceAnalyzer::analyze(sections);
        let conflicts = ConflictDetector::detect(sections);

        let generated = QuestionGenerator::new(self.config.clone())
            .generate(
                document_id,
                sections,
                assertions,
                &analysis,
                &conflicts,
                Some(&self.registry),
            )
            .await;

        QuestionsArtifact {
            run_id: run_id.to_string(),
            document_id: document_id.to_string(),
            generated_at: chrono::Utc::now(),
            statistics: generated.statistics,
            questions: generated.questions,
        }
    }

    /// Stage 2: answer collection across models. Starts only after
    /// generation has fully completed and validated.
    pub async fn collect_stage(
        &self,
        questions: &QuestionsArtifact,
        models: &[String],
    ) -> AnswersArtifact {
        info!(run_id = %questions.run_id, stage = %Stage::Collect, "Stage started");
        let collector = AnswerCollector::new(&self.registry, &self.config);
        let answers = collector
            .collect(&questions.document_id, &questions.questions, models)
            .await;
        AnswersArtifact::merge(
            &questions.run_id,
            &questions.document_id,
            models,
            questions.questions.clone(),
            &answers,
        )
    }

    /// Stages 3 and 4: judge evaluation, then consensus and issues.
    ///
    /// A judge failure aborts here; the results artifact is never
    /// produced from a partial evaluation set.
    pub async fn evaluate_stage(
        &self,
        sections: &[Section],
        assertions: &[Assertion],
        answers: &AnswersArtifact,
    ) -> Result<ResultsArtifact, PipelineError> {
        info!(run_id = %answers.run_id, stage = %Stage::Evaluate, "Stage started");
        let questions = answers.questions();
        let answer_map = answers.answer_map();

        let evaluator = AnswerEvaluator::new(&self.registry, &self.config);
        let evaluations = evaluator
            .evaluate(&answers.document_id, sections, &questions, &answer_map)
            .await?;

        info!(run_id = %answers.run_id, stage = %Stage::Consensus, "Stage started");
        let priorities: HashMap<&str, Priority> = assertions
            .iter()
            .map(|a| (a.id.as_str(), a.priority))
            .collect();

        let mut outcomes = Vec::new();
        let mut unclassified = Vec::new();
        let mut issues: Vec<Issue> = Vec::new();
        let mut histogram: BTreeMap<String, usize> = BTreeMap::new();

        let classified = ConsensusCalculator::classify_all(&questions, &evaluations);
        let mut question_ids: Vec<&String> = classified.keys().collect();
        question_ids.sort();

        for question_id in question_ids {
            let question = questions
                .iter()
                .find(|q| &q.id == question_id)
                .expect("classified question exists");
            match &classified[question_id] {
                Ok(result) => {
                    *histogram.entry(result.class.to_string()).or_insert(0) += 1;
                    let priority = question
                        .source_assertion_id
                        .as_deref()
                        .and_then(|id| priorities.get(id).copied());
                    if let Some(issue) =
                        ConsensusCalculator::issue_for(result, question, priority)
                    {
                        issues.push(issue);
                    }
                    let per_model = evaluations
                        .iter()
                        .filter(|((qid, _), _)| qid == question_id)
                        .map(|((_, model), eval)| (model.clone(), eval.clone()))
                        .collect();
                    outcomes.push(QuestionOutcome {
                        result: result.clone(),
                        evaluations: per_model,
                    });
                }
                Err(ConsensusError::NoEvaluations(_)) => {
                    warn!(question = %question_id, "No evaluations; question left unclassified");
                    unclassified.push(question_id.clone());
                }
            }
        }

        Ok(ResultsArtifact {
            run_id: answers.run_id.clone(),
            document_id: answers.document_id.clone(),
            generated_at: chrono::Utc::now(),
            statistics: crate::question::QuestionStatistics::compute(
                &questions,
                sections.len(),
                assertions.len(),
            ),
            consensus_histogram: histogram,
            outcomes,
            unclassified,
            issues,
        })
    }

    /// Full run: generate → collect → evaluate → consensus. With an
    /// output directory, each artifact is persisted as its stage
    /// completes, so a later failure leaves earlier artifacts usable.
    pub async fn run(
        &self,
        document_id: &str,
        sections: &[Section],
        supplied_assertions: Option<Vec<Assertion>>,
        models: &[String],
        out_dir: Option<&Path>,
    ) -> Result<RunArtifacts, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        info!(run_id, document_id, models = models.len(), "Run started");

        let assertions = supplied_assertions.unwrap_or_else(|| infer_assertions(sections));

        self.init_sessions(document_id, sections, models).await?;

        let questions = self
            .generate_stage(&run_id, document_id, sections, &assertions)
            .await;
        self.persist(out_dir, Stage::Generate, |dir| questions.save(dir))?;

        let answers = self.collect_stage(&questions, models).await;
        self.persist(out_dir, Stage::Collect, |dir| answers.save(dir))?;

        let results = match self.evaluate_stage(sections, &assertions, &answers).await {
            Ok(results) => results,
            Err(err) => {
                error!(run_id, error = %err, "Run aborted; results artifact not written");
                return Err(err);
            }
        };
        self.persist(out_dir, Stage::Consensus, |dir| results.save(dir))?;

        info!(
            run_id,
            issues = results.issues.len(),
            unclassified = results.unclassified.len(),
            "Run complete"
        );
        Ok(RunArtifacts {
            questions,
            answers,
            results,
        })
    }

    fn persist<F>(&self, out_dir: Option<&Path>, stage: Stage, save: F) -> Result<(), PipelineError>
    where
        F: FnOnce(&Path) -> Result<std::path::PathBuf, ArtifactError>,
    {
        if let Some(dir) = out_dir {
            save(dir).map_err(|source| PipelineError::Artifact { stage, source })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Generate.to_string(), "generate");
        assert_eq!(Stage::Evaluate.to_string(), "evaluate");
    }

    #[test]
    fn test_document_context_renders_headers() {
        use crate::section::SectionKind;
        let sections = vec![Section {
            id: "setup".to_string(),
            header: "Setup".to_string(),
            content: "Install the binary.".to_string(),
            level: 2,
            start_line: 1,
            end_line: 2,
            kind: SectionKind::Instruction,
        }];
        let context = Pipeline::document_context(&sections);
        assert_eq!(context, "## Setup\nInstall the binary.");
    }

    #[test]
    fn test_pipeline_error_names_stage() {
        let err = PipelineError::Session {
            stage: Stage::Sessions,
            source: SessionError::UnknownModel("m".to_string()),
        };
        assert!(err.to_string().contains("sessions stage failed"));

        let judge = PipelineError::Judge {
            source: JudgeFailure {
                question_id: "q_001".to_string(),
                model_id: "m".to_string(),
                reason: "transport error".to_string(),
            },
        };
        assert!(judge.to_string().contains("evaluate stage failed"));
        assert!(judge.to_string().contains("transport error"));
    }
}
