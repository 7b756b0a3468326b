use crate::orchestrator::ScanStats;
use facematch_core::RecognitionModel;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to turn an image reference into a usable local file.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("image not found: {0}")]
    NotFound(PathBuf),
    #[error("invalid image {path}: {source}")]
    InvalidImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("image {path} is {color}, expected 8-bit RGB")]
    NotRgb { path: PathBuf, color: String },
    #[error("download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },
    #[error("http client: {0}")]
    Http(#[from] reqwest::Error),
    #[error("failed to decode inline image: {0}")]
    DecodeFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image worker failed: {0}")]
    Worker(String),
}

/// One ensemble member could not produce a result for an image pair.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("model {model} unavailable: {reason}")]
pub struct ModelUnavailable {
    pub model: RecognitionModel,
    pub reason: String,
}

/// Why a candidate contributed no match record.
#[derive(Error, Debug)]
pub enum SkipReason {
    #[error("candidate has no profile photo")]
    MissingPhoto,
    #[error("candidate photo unavailable: {0}")]
    ImageUnavailable(#[from] StoreError),
    #[error("no model could compare the faces")]
    ComparisonFailed,
}

/// Whole-request failures of a match run.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("query image invalid: {0}")]
    InvalidQuery(#[source] StoreError),
    #[error("no usable candidates ({} scanned)", .stats.scanned)]
    NoCandidates { stats: ScanStats },
    #[error("no match at or above {min_confidence:.2} confidence ({processed} compared)")]
    NoMatch { min_confidence: f32, processed: usize, stats: ScanStats },
}
