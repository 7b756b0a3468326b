//! [`RecognitionEngine`] backed by ONNX Runtime.
//!
//! Detection uses SCRFD (`det_10g.onnx`); each recognition model is loaded
//! from `<model_dir>/<model id>.onnx`, e.g. `Facenet512.onnx`.

use crate::alignment;
use crate::detector::FaceDetector;
use crate::engine::{DetectOptions, DetectedFace, EngineError, RecognitionEngine, Verification, VerifyOptions};
use crate::recognizer::FaceRecognizer;
use crate::types::{BoundingBox, Embedding, RecognitionModel};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Detector backend name served by this engine.
pub const SCRFD_BACKEND: &str = "scrfd";
const DETECTOR_FILE: &str = "det_10g.onnx";

pub struct OnnxEngine {
    detector: Mutex<FaceDetector>,
    recognizers: HashMap<RecognitionModel, Mutex<FaceRecognizer>>,
}

impl OnnxEngine {
    /// Load the detector and one recognizer per requested model. Fails fast
    /// if any model file is missing.
    pub fn load(model_dir: &Path, models: &[RecognitionModel]) -> Result<Self, EngineError> {
        let detector = FaceDetector::load(&model_dir.join(DETECTOR_FILE))?;

        let mut recognizers = HashMap::new();
        for &model in models {
            if recognizers.contains_key(&model) {
                continue;
            }
            let recognizer = FaceRecognizer::load(&Self::model_path(model_dir, model), model)?;
            recognizers.insert(model, Mutex::new(recognizer));
        }

        tracing::info!(
            model_dir = %model_dir.display(),
            models = ?recognizers.keys().map(|m| m.as_str()).collect::<Vec<_>>(),
            "ONNX engine ready"
        );

        Ok(Self {
            detector: Mutex::new(detector),
            recognizers,
        })
    }

    pub fn model_path(model_dir: &Path, model: RecognitionModel) -> PathBuf {
        model_dir.join(format!("{}.onnx", model.as_str()))
    }

    fn check_backend(backend: &str) -> Result<(), EngineError> {
        if backend.eq_ignore_ascii_case(SCRFD_BACKEND) {
            Ok(())
        } else {
            Err(EngineError::UnsupportedBackend(backend.to_string()))
        }
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<BoundingBox>, EngineError> {
        let mut detector = self.detector.lock().map_err(|_| EngineError::Poisoned)?;
        Ok(detector.detect(image)?)
    }

    fn embed(&self, path: &Path, options: &VerifyOptions) -> Result<Embedding, EngineError> {
        let image = image::open(path)?.to_rgb8();
        let faces = self.detect(&image)?;

        let face = match faces.first() {
            Some(face) => Some(face),
            None if options.enforce_detection => {
                return Err(EngineError::NoFaceDetected(path.display().to_string()));
            }
            None => {
                tracing::debug!(path = %path.display(), "no face detected, embedding whole image");
                None
            }
        };

        let recognizer = self
            .recognizers
            .get(&options.model)
            .ok_or_else(|| EngineError::ModelNotFound(options.model.as_str().to_string()))?;
        let mut recognizer = recognizer.lock().map_err(|_| EngineError::Poisoned)?;
        Ok(recognizer.extract(&image, face)?)
    }
}

impl RecognitionEngine for OnnxEngine {
    fn verify(&self, a: &Path, b: &Path, options: &VerifyOptions) -> Result<Verification, EngineError> {
        Self::check_backend(&options.detector_backend)?;

        let emb_a = self.embed(a, options)?;
        let emb_b = self.embed(b, options)?;

        let distance = emb_a.distance(&emb_b, options.metric);
        let threshold = options.model.threshold_for(options.metric);

        Ok(Verification {
            distance,
            verified: distance <= threshold,
            threshold: Some(threshold),
        })
    }

    fn extract_faces(&self, path: &Path, options: &DetectOptions) -> Result<Vec<DetectedFace>, EngineError> {
        Self::check_backend(&options.detector_backend)?;

        let image = image::open(path)?.to_rgb8();
        let faces = self.detect(&image)?;
        let (out_w, out_h) = options.target_size;

        Ok(faces
            .into_iter()
            .filter_map(|bbox| {
                let crop = match (&bbox.landmarks, options.align) {
                    (Some(landmarks), true) => alignment::align_face(&image, landmarks, out_w, out_h),
                    _ => {
                        let (x, y, w, h) =
                            bbox.expanded(options.expand_face_region, image.width(), image.height());
                        if w == 0 || h == 0 {
                            return None;
                        }
                        let region = imageops::crop_imm(&image, x, y, w, h).to_image();
                        imageops::resize(&region, out_w, out_h, FilterType::Triangle)
                    }
                };
                Some(DetectedFace { bbox, crop })
            })
            .collect())
    }
}
