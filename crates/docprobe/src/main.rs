mod adapters;
mod profile;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comprehension::artifacts::{AnswersArtifact, QuestionsArtifact};
use comprehension::question::infer::infer_assertions;
use comprehension::section::{ingest_all, RawSection, Section};
use comprehension::Pipeline;
use profile::Profile;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Parser)]
#[command(
    name = "docprobe",
    version,
    about = "Multi-model documentation comprehension probe"
)]
struct Cli {
    /// Profile path (falls back to DOCPROBE_PROFILE, then ./docprobe.yaml)
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze sections and generate validated questions
    Generate {
        /// sections.json from the extraction step
        sections: PathBuf,
        #[arg(long, default_value = "workspace")]
        out: PathBuf,
    },
    /// Collect per-model answers for previously generated questions
    Collect {
        sections: PathBuf,
        /// Models to query, comma separated
        #[arg(long, value_delimiter = ',', required = true)]
        models: Vec<String>,
        #[arg(long, default_value = "workspace")]
        out: PathBuf,
    },
    /// Judge collected answers and compute consensus
    Evaluate {
        sections: PathBuf,
        #[arg(long, default_value = "workspace")]
        out: PathBuf,
    },
    /// Full pipeline: generate, collect, evaluate
    Run {
        sections: PathBuf,
        #[arg(long, value_delimiter = ',', required = true)]
        models: Vec<String>,
        #[arg(long, default_value = "workspace")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DOCPROBE_LOG")
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let profile = Profile::load_or_default(cli.profile)?;
    let registry = profile.build_registry()?;
    let pipeline = Pipeline::new(profile.probe.clone(), registry);

    match cli.command {
        Command::Generate { sections, out } => generate(&pipeline, &sections, &out).await,
        Command::Collect {
            sections,
            models,
            out,
        } => collect(&pipeline, &sections, &models, &out).await,
        Command::Evaluate { sections, out } => evaluate(&pipeline, &sections, &out).await,
        Command::Run {
            sections,
            models,
            out,
        } => run(&pipeline, &sections, &models, &out).await,
    }
}

/// Load and canonicalize the extraction step's section records.
fn load_sections(path: &Path) -> Result<Vec<Section>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read sections file {}", path.display()))?;
    let records: Vec<RawSection> = serde_json::from_str(&raw)
        .with_context(|| format!("invalid sections file {}", path.display()))?;
    Ok(ingest_all(records))
}

fn document_id(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

async fn generate(pipeline: &Pipeline, sections_path: &Path, out: &Path) -> Result<()> {
    let sections = load_sections(sections_path)?;
    let document_id = document_id(sections_path);
    let assertions = infer_assertions(&sections);

    // Assisted generation is best-effort: without judge/assist sessions
    // the templates still run.
    if let Err(err) = pipeline.init_sessions(&document_id, &sections, &[]).await {
        warn!(error = %err, "Assist sessions unavailable; template-only generation");
    }

    let run_id = Uuid::new_v4().to_string();
    let artifact = pipeline
        .generate_stage(&run_id, &document_id, &sections, &assertions)
        .await;
    let path = artifact.save(out)?;
    info!(
        run_id,
        accepted = artifact.statistics.accepted,
        rejected = artifact.statistics.rejected,
        path = %path.display(),
        "Questions generated"
    );
    Ok(())
}

async fn collect(
    pipeline: &Pipeline,
    sections_path: &Path,
    models: &[String],
    out: &Path,
) -> Result<()> {
    let sections = load_sections(sections_path)?;
    let document_id = document_id(sections_path);
    let questions = QuestionsArtifact::load(out)?;

    let wanted: Vec<&str> = models.iter().map(String::as_str).collect();
    pipeline
        .ensure_models(&document_id, &sections, &wanted)
        .await?;

    let artifact = pipeline.collect_stage(&questions, models).await;
    let recorded: usize = artifact.entries.iter().map(|e| e.answers.len()).sum();
    let path = artifact.save(out)?;
    info!(
        run_id = %artifact.run_id,
        answers = recorded,
        path = %path.display(),
        "Answers collected"
    );
    Ok(())
}

async fn evaluate(pipeline: &Pipeline, sections_path: &Path, out: &Path) -> Result<()> {
    let sections = load_sections(sections_path)?;
    let document_id = document_id(sections_path);
    let answers = AnswersArtifact::load(out)?;
    let assertions = infer_assertions(&sections);

    pipeline
        .ensure_models(&document_id, &sections, &[pipeline.config().judge_model.as_str()])
        .await?;

    let results = pipeline
        .evaluate_stage(&sections, &assertions, &answers)
        .await?;
    let path = results.save(out)?;
    info!(
        run_id = %results.run_id,
        issues = results.issues.len(),
        unclassified = results.unclassified.len(),
        path = %path.display(),
        "Evaluation complete"
    );
    Ok(())
}

async fn run(
    pipeline: &Pipeline,
    sections_path: &Path,
    models: &[String],
    out: &Path,
) -> Result<()> {
    let sections = load_sections(sections_path)?;
    let document_id = document_id(sections_path);

    let artifacts = pipeline
        .run(&document_id, &sections, None, models, Some(out))
        .await?;

    info!(
        run_id = %artifacts.results.run_id,
        questions = artifacts.questions.statistics.accepted,
        issues = artifacts.results.issues.len(),
        out = %out.display(),
        "Run complete"
    );
    for issue in &artifacts.results.issues {
        info!(
            severity = ?issue.severity,
            question = %issue.question_id,
            sections = ?issue.section_ids,
            "{}",
            issue.recommendation
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_document_id_from_path() {
        assert_eq!(document_id(Path::new("/tmp/handbook.json")), "handbook");
        assert_eq!(document_id(Path::new("sections.json")), "sections");
    }

    #[test]
    fn test_load_sections_canonicalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sections.json");
        std::fs::write(
            &path,
            r#"[{"header": "Step 1: Setup", "content": "Install.", "level": 2}]"#,
        )
        .unwrap();
        let sections = load_sections(&path).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].id, "step-1-setup");
    }

    #[test]
    fn test_load_sections_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sections.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_sections(&path).is_err());
    }
}
