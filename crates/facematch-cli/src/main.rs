use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use facematch_core::{OnnxEngine, RecognitionModel};
use facematch_pipeline::{
    CandidateDocument, CandidateProfile, ImageReference, MatchError, MatchOrchestrator, MatchRequest, PipelineConfig,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod output;

use output::Output;

#[derive(Parser, Debug)]
#[command(name = "facematch", about = "Find the candidate whose profile photo matches a face")]
struct Cli {
    /// Query face image, base64-encoded (a data: URI prefix is accepted)
    image_base64: String,

    /// JSON file of candidates: {"attendees": [...]} or a bare array
    candidates: PathBuf,

    /// Number of matches to return (1 = best only, 0 = all)
    #[arg(long)]
    top_n: Option<usize>,

    /// Drop matches below this confidence
    #[arg(long)]
    min_confidence: Option<f32>,

    /// Compare candidates one at a time
    #[arg(long)]
    sequential: bool,

    /// Use one model instead of the ensemble (e.g. "ArcFace")
    #[arg(long, value_name = "MODEL")]
    single_model: Option<RecognitionModel>,

    /// Maximum concurrent candidate comparisons
    #[arg(long)]
    workers: Option<usize>,

    /// Directory holding the ONNX model files
    #[arg(long)]
    model_dir: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(top_n) = self.top_n {
            config.top_n = top_n;
        }
        if let Some(min_confidence) = self.min_confidence {
            config.min_confidence = min_confidence;
        }
        if self.sequential {
            config.parallel = false;
        }
        if let Some(model) = self.single_model {
            config.use_ensemble = false;
            config.model = model;
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers.max(1);
        }
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return ExitCode::SUCCESS;
        }
        Err(e) => {
            return finish(Output::failure(e.to_string().trim()), ExitCode::FAILURE);
        }
    };

    let (output, code) = run(cli).await;
    finish(output, code)
}

fn finish(output: Output, code: ExitCode) -> ExitCode {
    println!("{}", output.to_json());
    code
}

async fn run(cli: Cli) -> (Output, ExitCode) {
    let mut config = PipelineConfig::from_env();
    cli.apply(&mut config);

    if let Err(e) = facematch_pipeline::decode_inline(&cli.image_base64) {
        tracing::error!(error = %e, "query image rejected");
        return (Output::from_outcome(Err(MatchError::InvalidQuery(e))), ExitCode::FAILURE);
    }

    let candidates = match load_candidates(&cli.candidates) {
        Ok(candidates) => candidates,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "candidate file unusable");
            return (Output::failure(format!("{e:#}")), ExitCode::FAILURE);
        }
    };

    let orchestrator = match build_orchestrator(&config) {
        Ok(orchestrator) => orchestrator,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "pipeline initialisation failed");
            return (Output::failure(format!("{e:#}")), ExitCode::FAILURE);
        }
    };

    let request = MatchRequest::from_config(&config);
    let query = ImageReference::Inline(cli.image_base64);
    let outcome = orchestrator.find_matches(&query, candidates, &request).await;
    orchestrator.cleanup();

    match &outcome {
        Ok(report) => {
            if let Some(best) = report.ranked.best() {
                tracing::info!(
                    candidate = best.profile.display_name(),
                    headline = best.profile.headline().unwrap_or("N/A"),
                    confidence = best.confidence(),
                    distance = best.distance(),
                    verified = best.verified(),
                    "best match"
                );
            }
        }
        Err(e) => tracing::warn!(error = %e, "no match"),
    }

    let code = match &outcome {
        Err(MatchError::InvalidQuery(_)) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    };
    (Output::from_outcome(outcome), code)
}

fn load_candidates(path: &Path) -> Result<Vec<CandidateProfile>> {
    let candidates = CandidateDocument::from_path(path)
        .with_context(|| format!("Failed to load candidates from {}", path.display()))?;
    tracing::info!(count = candidates.len(), path = %path.display(), "candidates loaded");
    Ok(candidates)
}

fn build_orchestrator(config: &PipelineConfig) -> Result<MatchOrchestrator> {
    let mode = config.comparison_mode();
    let models: Vec<RecognitionModel> = mode.models().to_vec();
    tracing::info!(
        model_dir = %config.model_dir.display(),
        models = ?models.iter().map(RecognitionModel::as_str).collect::<Vec<_>>(),
        "loading models"
    );

    let engine = OnnxEngine::load(&config.model_dir, &models)
        .with_context(|| format!("Failed to load models from {}", config.model_dir.display()))?;
    MatchOrchestrator::new(Arc::new(engine), config).context("Failed to prepare work directory")
}
