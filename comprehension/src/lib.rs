//! Multi-model documentation comprehension engine.
//!
//! Measures whether documentation is unambiguous enough for several
//! independent language models to extract the same facts. The pipeline:
//!
//! 1. Canonical section/assertion ingestion ([`section`])
//! 2. Cross-reference dependency graph ([`xref`]) and conflict
//!    candidates ([`conflict`])
//! 3. Question generation with a leakage/answerability/grammar/
//!    uniqueness validation gate ([`question`])
//! 4. Concurrent answer collection through per-(document, model)
//!    sessions ([`collect`], [`session`])
//! 5. Judge evaluation, fail-fast on judge breakage ([`evaluate`])
//! 6. Deterministic consensus classification and issue derivation
//!    ([`consensus`])
//!
//! Artifacts (`questions.json`, `answers.json`, `question_results.json`)
//! are each independently re-loadable ([`artifacts`]); [`pipeline`]
//! enforces the stage barriers. Model backends implement
//! [`session::ModelAdapter`], so the whole engine runs against
//! deterministic fake adapters in tests.

pub mod artifacts;
pub mod collect;
pub mod config;
pub mod conflict;
pub mod consensus;
pub mod evaluate;
pub mod pipeline;
pub mod question;
pub mod section;
pub mod session;
pub mod xref;

pub use artifacts::{AnswersArtifact, QuestionsArtifact, ResultsArtifact};
pub use collect::{Answer, AnswerCollector};
pub use config::ProbeConfig;
pub use conflict::{Conflict, ConflictDetector, ConflictKind};
pub use consensus::{
    ConsensusCalculator, ConsensusClass, ConsensusResult, Issue, IssueKind, Severity,
};
pub use evaluate::{AnswerEvaluator, Evaluation, JudgeFailure, Score};
pub use pipeline::{Pipeline, PipelineError, RunArtifacts, Stage};
pub use question::{Question, QuestionGenerator, QuestionValidator};
pub use section::{Assertion, AssertionKind, Priority, RawSection, Section, SectionKind};
pub use session::{ModelAdapter, QueryError, QueryResponse, SessionHandle, SessionRegistry};
pub use xref::{CrossReferenceAnalyzer, DependencyEdge, ReferenceAnalysis, ReferenceKind};
