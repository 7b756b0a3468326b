//! Face Comparator: one model, one image pair, calibrated confidence.

use crate::config::PipelineConfig;
use crate::error::ModelUnavailable;
use facematch_core::{DistanceMetric, RecognitionEngine, RecognitionModel, VerifyOptions};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Verdict of one model on one image pair.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    pub model: RecognitionModel,
    pub distance: f32,
    pub verified: bool,
    pub threshold: f32,
    pub confidence: f32,
}

/// Map a distance onto [0, 1], with exactly 0.5 at the threshold.
///
/// Below the threshold the score falls linearly from 1.0 at distance 0;
/// above it, from 0.5 down to 0.0 at twice the threshold.
pub fn base_confidence(distance: f32, threshold: f32) -> f32 {
    let ratio = distance / threshold;
    if distance < threshold {
        1.0 - ratio * 0.5
    } else {
        (0.5 - (ratio - 1.0) * 0.5).max(0.0)
    }
}

/// Scale a base confidence by the mean quality of the two images.
pub fn scale_by_quality(base: f32, quality_a: f32, quality_b: f32) -> f32 {
    let quality = (quality_a + quality_b) / 2.0;
    (base * (0.7 + 0.3 * quality)).clamp(0.0, 1.0)
}

pub struct FaceComparator {
    engine: Arc<dyn RecognitionEngine>,
    metric: DistanceMetric,
    enforce_detection: bool,
    detector_backend: String,
    timeout: Duration,
}

impl FaceComparator {
    pub fn new(engine: Arc<dyn RecognitionEngine>, config: &PipelineConfig) -> Self {
        Self {
            engine,
            metric: config.distance_metric,
            enforce_detection: config.enforce_detection,
            detector_backend: config.detector_backend.clone(),
            timeout: config.engine_timeout,
        }
    }

    /// Compare two prepared images with `model`.
    ///
    /// Engine errors, timeouts, and nonsensical distances all mean the model
    /// has no opinion on this pair.
    pub async fn compare(
        &self,
        a: &Path,
        b: &Path,
        model: RecognitionModel,
        quality_a: f32,
        quality_b: f32,
    ) -> Result<ComparisonResult, ModelUnavailable> {
        let unavailable = |reason: String| {
            tracing::debug!(%model, %reason, "model unavailable for pair");
            ModelUnavailable { model, reason }
        };

        let engine = Arc::clone(&self.engine);
        let options = VerifyOptions {
            model,
            metric: self.metric,
            enforce_detection: self.enforce_detection,
            detector_backend: self.detector_backend.clone(),
        };
        let (a, b) = (a.to_path_buf(), b.to_path_buf());
        let task = tokio::task::spawn_blocking(move || engine.verify(&a, &b, &options));

        let verification = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(verification))) => verification,
            Ok(Ok(Err(e))) => return Err(unavailable(e.to_string())),
            Ok(Err(e)) => return Err(unavailable(format!("worker failed: {e}"))),
            Err(_) => {
                return Err(unavailable(format!(
                    "timed out after {:.1}s",
                    self.timeout.as_secs_f32()
                )))
            }
        };

        let distance = verification.distance;
        if !distance.is_finite() || distance < 0.0 {
            return Err(unavailable(format!("invalid distance {distance}")));
        }

        let threshold = verification
            .threshold
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or_else(|| model.threshold_for(self.metric));
        let confidence = scale_by_quality(base_confidence(distance, threshold), quality_a, quality_b);

        tracing::debug!(
            %model,
            distance,
            threshold,
            verified = verification.verified,
            confidence,
            "pair compared"
        );
        Ok(ComparisonResult {
            model,
            distance,
            verified: verification.verified,
            threshold,
            confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{verification, FakeEngine};
    use facematch_core::{EngineError, Verification};

    fn comparator(engine: FakeEngine, timeout: Duration) -> FaceComparator {
        let config = PipelineConfig {
            engine_timeout: timeout,
            ..PipelineConfig::default()
        };
        FaceComparator::new(Arc::new(engine), &config)
    }

    async fn run(engine: FakeEngine) -> Result<ComparisonResult, ModelUnavailable> {
        comparator(engine, Duration::from_secs(5))
            .compare(Path::new("a.jpg"), Path::new("b.jpg"), RecognitionModel::ArcFace, 1.0, 1.0)
            .await
    }

    #[test]
    fn test_confidence_is_half_at_threshold() {
        for threshold in [0.015, 0.3, 0.4, 0.68] {
            assert!((base_confidence(threshold, threshold) - 0.5).abs() < 1e-6);
        }
    }

    #[test]
    fn test_confidence_decreases_with_distance() {
        let threshold = 0.4;
        let mut previous = f32::INFINITY;
        for step in 0..=100 {
            let distance = step as f32 * 0.01;
            let confidence = base_confidence(distance, threshold);
            assert!((0.0..=1.0).contains(&confidence));
            assert!(confidence <= previous, "not monotonic at {distance}");
            previous = confidence;
        }
        assert_eq!(base_confidence(0.0, threshold), 1.0);
        assert_eq!(base_confidence(0.8, threshold), 0.0);
        assert_eq!(base_confidence(5.0, threshold), 0.0);
    }

    #[test]
    fn test_unit_quality_is_identity() {
        for base in [0.0, 0.25, 0.5, 0.875, 1.0] {
            assert!((scale_by_quality(base, 1.0, 1.0) - base).abs() < 1e-6);
        }
    }

    #[test]
    fn test_low_quality_discounts_confidence() {
        assert!((scale_by_quality(1.0, 0.0, 0.0) - 0.7).abs() < 1e-6);
        assert!((scale_by_quality(0.8, 0.5, 1.0) - 0.8 * 0.925).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_engine_threshold_is_used() {
        let result = run(FakeEngine::new()).await.unwrap();
        assert_eq!(result.model, RecognitionModel::ArcFace);
        assert_eq!(result.threshold, 0.4);
        assert!((result.confidence - 0.875).abs() < 1e-6);
        assert!(result.verified);
    }

    #[tokio::test]
    async fn test_table_threshold_when_engine_reports_none() {
        let engine = FakeEngine::new().with_verify(|_, _, _| {
            Ok(Verification {
                distance: 0.68,
                verified: true,
                threshold: None,
            })
        });
        let result = run(engine).await.unwrap();
        assert_eq!(result.threshold, RecognitionModel::ArcFace.threshold());
        assert!((result.confidence - 0.5).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_options_reach_engine() {
        let engine = FakeEngine::new().with_verify(|_, _, options| {
            assert_eq!(options.model, RecognitionModel::ArcFace);
            assert_eq!(options.metric, DistanceMetric::Cosine);
            assert!(!options.enforce_detection);
            assert_eq!(options.detector_backend, "scrfd");
            Ok(verification(0.2, 0.68))
        });
        assert!(run(engine).await.is_ok());
    }

    #[tokio::test]
    async fn test_failures_are_model_unavailable() {
        let failing = FakeEngine::new().with_verify(|a, _, _| Err(EngineError::NoFaceDetected(a.display().to_string())));
        let err = run(failing).await.unwrap_err();
        assert_eq!(err.model, RecognitionModel::ArcFace);

        let negative = FakeEngine::new().with_verify(|_, _, _| Ok(verification(-0.1, 0.4)));
        assert!(run(negative).await.is_err());

        let nan = FakeEngine::new().with_verify(|_, _, _| Ok(verification(f32::NAN, 0.4)));
        assert!(run(nan).await.is_err());
    }

    #[tokio::test]
    async fn test_timeout_is_model_unavailable() {
        let slow = FakeEngine::new().with_delay(Duration::from_millis(300));
        let err = comparator(slow, Duration::from_millis(20))
            .compare(Path::new("a.jpg"), Path::new("b.jpg"), RecognitionModel::Facenet512, 1.0, 1.0)
            .await
            .unwrap_err();
        assert!(err.reason.contains("timed out"));
    }
}
