use crate::ensemble::ComparisonMode;
use facematch_core::{DistanceMetric, RecognitionModel};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Pipeline configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Base for the per-run scratch directory (default: the system temp dir). Never removed itself.
    pub work_dir: Option<PathBuf>,
    /// Model used when the ensemble is disabled.
    pub model: RecognitionModel,
    pub use_ensemble: bool,
    pub ensemble_models: Vec<RecognitionModel>,
    pub distance_metric: DistanceMetric,
    /// Fail a comparison when a face cannot be detected instead of embedding the whole image.
    pub enforce_detection: bool,
    pub detector_backend: String,
    pub extract_faces: bool,
    pub align_faces: bool,
    /// Growth factor applied to detected boxes before cropping unaligned faces.
    pub expand_face_region: f32,
    pub enhance_images: bool,
    /// Best detected face must reach this quality to be used.
    pub face_quality_floor: f32,
    pub cache_images: bool,
    /// Maximum number of entries per in-memory cache.
    pub cache_capacity: usize,
    pub parallel: bool,
    pub max_workers: usize,
    pub download_timeout: Duration,
    /// Upper bound on a single engine call; a timed-out call counts as the model being unavailable.
    pub engine_timeout: Duration,
    pub min_confidence: f32,
    pub top_n: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            work_dir: None,
            model: RecognitionModel::Facenet512,
            use_ensemble: true,
            ensemble_models: vec![
                RecognitionModel::Facenet512,
                RecognitionModel::ArcFace,
                RecognitionModel::VggFace,
            ],
            distance_metric: DistanceMetric::Cosine,
            enforce_detection: false,
            detector_backend: "scrfd".to_string(),
            extract_faces: true,
            align_faces: true,
            expand_face_region: 1.2,
            enhance_images: true,
            face_quality_floor: 0.3,
            cache_images: true,
            cache_capacity: 256,
            parallel: true,
            max_workers: 4,
            download_timeout: Duration::from_secs(15),
            engine_timeout: Duration::from_secs(60),
            min_confidence: 0.2,
            top_n: 1,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `FACEMATCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let ensemble_models = std::env::var("FACEMATCH_ENSEMBLE_MODELS")
            .ok()
            .map(|v| parse_model_list(&v))
            .filter(|models| !models.is_empty())
            .unwrap_or(defaults.ensemble_models);

        Self {
            model_dir: std::env::var("FACEMATCH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.model_dir),
            work_dir: std::env::var("FACEMATCH_WORK_DIR").ok().map(PathBuf::from),
            model: env_parse("FACEMATCH_MODEL", defaults.model),
            use_ensemble: env_bool("FACEMATCH_ENSEMBLE", defaults.use_ensemble),
            ensemble_models,
            distance_metric: env_parse("FACEMATCH_DISTANCE_METRIC", defaults.distance_metric),
            enforce_detection: env_bool("FACEMATCH_ENFORCE_DETECTION", defaults.enforce_detection),
            detector_backend: std::env::var("FACEMATCH_DETECTOR_BACKEND")
                .unwrap_or(defaults.detector_backend),
            extract_faces: env_bool("FACEMATCH_EXTRACT_FACES", defaults.extract_faces),
            align_faces: env_bool("FACEMATCH_ALIGN_FACES", defaults.align_faces),
            expand_face_region: env_parse("FACEMATCH_EXPAND_FACE_REGION", defaults.expand_face_region),
            enhance_images: env_bool("FACEMATCH_ENHANCE_IMAGES", defaults.enhance_images),
            face_quality_floor: env_parse("FACEMATCH_FACE_QUALITY_FLOOR", defaults.face_quality_floor),
            cache_images: env_bool("FACEMATCH_CACHE_IMAGES", defaults.cache_images),
            cache_capacity: env_parse("FACEMATCH_CACHE_CAPACITY", defaults.cache_capacity),
            parallel: env_bool("FACEMATCH_PARALLEL", defaults.parallel),
            max_workers: env_parse("FACEMATCH_MAX_WORKERS", defaults.max_workers).max(1),
            download_timeout: Duration::from_secs(env_parse(
                "FACEMATCH_DOWNLOAD_TIMEOUT_SECS",
                defaults.download_timeout.as_secs(),
            )),
            engine_timeout: Duration::from_secs(env_parse(
                "FACEMATCH_ENGINE_TIMEOUT_SECS",
                defaults.engine_timeout.as_secs(),
            )),
            min_confidence: env_parse("FACEMATCH_MIN_CONFIDENCE", defaults.min_confidence),
            top_n: env_parse("FACEMATCH_TOP_N", defaults.top_n),
        }
    }

    /// How image pairs are compared under this configuration.
    pub fn comparison_mode(&self) -> ComparisonMode {
        if self.use_ensemble && !self.ensemble_models.is_empty() {
            ComparisonMode::Ensemble(self.ensemble_models.clone())
        } else {
            ComparisonMode::Single(self.model)
        }
    }
}

/// Default model directory: `$XDG_DATA_HOME/facematch/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facematch/models")
}

/// Parse a comma-separated model list, dropping unknown names with a warning.
pub fn parse_model_list(value: &str) -> Vec<RecognitionModel> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(model) => Some(model),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring ensemble model");
                None
            }
        })
        .collect()
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
        .unwrap_or(default)
}
