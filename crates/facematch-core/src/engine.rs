//! Contract between the matching pipeline and a face recognition backend.

use crate::detector::DetectorError;
use crate::recognizer::RecognizerError;
use crate::types::{BoundingBox, DistanceMetric, RecognitionModel};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("unsupported detector backend: {0}")]
    UnsupportedBackend(String),
    #[error("no face detected in {0}")]
    NoFaceDetected(String),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("engine lock poisoned")]
    Poisoned,
}

/// Options for a pairwise verification.
#[derive(Debug, Clone)]
pub struct VerifyOptions {
    pub model: RecognitionModel,
    pub metric: DistanceMetric,
    /// Fail when either image has no detectable face instead of embedding the whole image.
    pub enforce_detection: bool,
    pub detector_backend: String,
}

/// Options for face extraction.
#[derive(Debug, Clone)]
pub struct DetectOptions {
    pub detector_backend: String,
    /// Warp crops to canonical landmark positions when landmarks are available.
    pub align: bool,
    /// Factor by which unaligned crops are grown around the detected box.
    pub expand_face_region: f32,
    /// Output crop size (width, height).
    pub target_size: (u32, u32),
}

/// Raw verdict of one model on one image pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub distance: f32,
    pub verified: bool,
    /// Decision threshold the engine applied, if it reports one.
    pub threshold: Option<f32>,
}

/// A face located by the detector, with its pixel crop.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    pub crop: RgbImage,
}

impl DetectedFace {
    pub fn confidence(&self) -> f32 {
        self.bbox.confidence
    }
}

/// A face recognition backend.
///
/// Calls are blocking and may be slow; callers run them off the async
/// executor. Implementations must be shareable across worker threads.
pub trait RecognitionEngine: Send + Sync {
    /// Compare the faces in two images with one model.
    fn verify(&self, a: &Path, b: &Path, options: &VerifyOptions) -> Result<Verification, EngineError>;

    /// Detect every face in an image and return crops, best first.
    fn extract_faces(&self, image: &Path, options: &DetectOptions) -> Result<Vec<DetectedFace>, EngineError>;
}
