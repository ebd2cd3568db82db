//! Run artifacts — `questions.json`, `answers.json`,
//! `question_results.json`.
//!
//! Each artifact is independently re-loadable so a later stage can run
//! without re-running earlier ones. Files are pretty-printed JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::collect::{Answer, PairKey};
use crate::consensus::{ConsensusResult, Issue};
use crate::evaluate::Evaluation;
use crate::question::{Question, QuestionStatistics};

pub const QUESTIONS_FILE: &str = "questions.json";
pub const ANSWERS_FILE: &str = "answers.json";
pub const RESULTS_FILE: &str = "question_results.json";

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn write_json<T: Serialize>(dir: &Path, file: &str, value: &T) -> Result<PathBuf, ArtifactError> {
    fs::create_dir_all(dir).map_err(|source| ArtifactError::Write {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(file);
    let json = serde_json::to_string_pretty(value).map_err(|source| ArtifactError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, json).map_err(|source| ArtifactError::Write {
        path: path.clone(),
        source,
    })?;
    info!(path = %path.display(), "Artifact written");
    Ok(path)
}

fn read_json<T: for<'de> Deserialize<'de>>(dir: &Path, file: &str) -> Result<T, ArtifactError> {
    let path = dir.join(file);
    let raw = fs::read_to_string(&path).map_err(|source| ArtifactError::Read {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| ArtifactError::Json { path, source })
}

/// Every generated question for a document, rejected ones included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionsArtifact {
    pub run_id: String,
    pub document_id: String,
    pub generated_at: DateTime<Utc>,
    pub statistics: QuestionStatistics,
    pub questions: Vec<Question>,
}

impl QuestionsArtifact {
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ArtifactError> {
        write_json(dir, QUESTIONS_FILE, self)
    }

    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        read_json(dir, QUESTIONS_FILE)
    }
}

/// One question with its per-model answers. Models with no entry timed
/// out or failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnsweredQuestion {
    pub question: Question,
    pub answers: BTreeMap<String, Answer>,
}

/// Questions merged with every model's answers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswersArtifact {
    pub run_id: String,
    pub document_id: String,
    pub generated_at: DateTime<Utc>,
    pub models: Vec<String>,
    pub entries: Vec<AnsweredQuestion>,
}

impl AnswersArtifact {
    /// Merge the keyed answer map back onto the question list.
    pub fn merge(
        run_id: &str,
        document_id: &str,
        models: &[String],
        questions: Vec<Question>,
        answers: &std::collections::HashMap<PairKey, Answer>,
    ) -> Self {
        let entries = questions
            .into_iter()
            .map(|question| {
                let per_model = answers
                    .iter()
                    .filter(|((qid, _), _)| *qid == question.id)
                    .map(|((_, model), answer)| (model.clone(), answer.clone()))
                    .collect();
                AnsweredQuestion {
                    question,
                    answers: per_model,
                }
            })
            .collect();
        Self {
            run_id: run_id.to_string(),
            document_id: document_id.to_string(),
            generated_at: Utc::now(),
            models: models.to_vec(),
            entries,
        }
    }

    /// Flatten back into the keyed map the evaluator consumes.
    pub fn answer_map(&self) -> std::collections::HashMap<PairKey, Answer> {
        self.entries
            .iter()
            .flat_map(|entry| {
                entry.answers.iter().map(|(model, answer)| {
                    (
                        (entry.question.id.clone(), model.clone()),
                        answer.clone(),
                    )
                })
            })
            .collect()
    }

    pub fn questions(&self) -> Vec<Question> {
        self.entries.iter().map(|e| e.question.clone()).collect()
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf, ArtifactError> {
        write_json(dir, ANSWERS_FILE, self)
    }

    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        read_json(dir, ANSWERS_FILE)
    }
}

/// Final per-question outcome: consensus plus the evaluations behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOutcome {
    pub result: ConsensusResult,
    pub evaluations: BTreeMap<String, Evaluation>,
}

/// The run summary: histogram, coverage, outcomes, issues.
///
/// Never written when the run aborts on a judge failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsArtifact {
    pub run_id: String,
    pub document_id: String,
    pub generated_at: DateTime<Utc>,
    pub statistics: QuestionStatistics,
    /// Consensus class name → count of questions.
    pub consensus_histogram: BTreeMap<String, usize>,
    pub outcomes: Vec<QuestionOutcome>,
    /// Questions with no evaluations at all (every model timed out).
    pub unclassified: Vec<String>,
    pub issues: Vec<Issue>,
}

impl ResultsArtifact {
    pub fn save(&self, dir: &Path) -> Result<PathBuf, ArtifactError> {
        write_json(dir, RESULTS_FILE, self)
    }

    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        read_json(dir, RESULTS_FILE)
    }
}
