//! Ensemble Aggregator: combine several models' verdicts on one pair.

use crate::compare::{ComparisonResult, FaceComparator};
use facematch_core::RecognitionModel;
use std::path::Path;

/// Which models judge a pair.
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonMode {
    Single(RecognitionModel),
    /// Models run in the listed order.
    Ensemble(Vec<RecognitionModel>),
}

impl ComparisonMode {
    /// Models that must be loaded to serve this mode.
    pub fn models(&self) -> &[RecognitionModel] {
        match self {
            Self::Single(model) => std::slice::from_ref(model),
            Self::Ensemble(models) => models.as_slice(),
        }
    }

    /// Judge a pair of prepared images. `None` when no model produced a result.
    pub async fn judge(
        &self,
        comparator: &FaceComparator,
        a: &Path,
        b: &Path,
        quality_a: f32,
        quality_b: f32,
    ) -> Option<Verdict> {
        match self {
            Self::Single(model) => comparator
                .compare(a, b, *model, quality_a, quality_b)
                .await
                .ok()
                .map(Verdict::Single),
            Self::Ensemble(models) => compare_ensemble(comparator, a, b, quality_a, quality_b, models)
                .await
                .map(Verdict::Ensemble),
        }
    }
}

/// Combined verdict of the models that could compare a pair.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleResult {
    /// Unweighted mean distance.
    pub distance: f32,
    /// Mean confidence weighted by model reliability.
    pub confidence: f32,
    /// Strict majority of members verified.
    pub verified: bool,
    /// Unweighted mean threshold.
    pub threshold: f32,
    pub members: Vec<ComparisonResult>,
}

/// Aggregate member results. `None` for an empty set.
pub fn aggregate(members: Vec<ComparisonResult>) -> Option<EnsembleResult> {
    if members.is_empty() {
        return None;
    }
    let count = members.len() as f32;

    let (weighted, total_weight) = members.iter().fold((0.0, 0.0), |(sum, weights), m| {
        let w = m.model.weight();
        (sum + m.confidence * w, weights + w)
    });
    let distance = members.iter().map(|m| m.distance).sum::<f32>() / count;
    let threshold = members.iter().map(|m| m.threshold).sum::<f32>() / count;
    let votes = members.iter().filter(|m| m.verified).count();

    Some(EnsembleResult {
        distance,
        confidence: (weighted / total_weight).clamp(0.0, 1.0),
        verified: votes * 2 > members.len(),
        threshold,
        members,
    })
}

/// Run every model on the pair, dropping the ones that fail.
pub async fn compare_ensemble(
    comparator: &FaceComparator,
    a: &Path,
    b: &Path,
    quality_a: f32,
    quality_b: f32,
    models: &[RecognitionModel],
) -> Option<EnsembleResult> {
    let mut members = Vec::with_capacity(models.len());
    for &model in models {
        if let Ok(result) = comparator.compare(a, b, model, quality_a, quality_b).await {
            members.push(result);
        }
    }

    let result = aggregate(members);
    match &result {
        Some(ensemble) => tracing::debug!(
            models = ensemble.members.len(),
            requested = models.len(),
            confidence = ensemble.confidence,
            verified = ensemble.verified,
            "ensemble verdict"
        ),
        None => tracing::debug!(requested = models.len(), "no ensemble member could compare the pair"),
    }
    result
}

/// Outcome of judging one pair, in either mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Single(ComparisonResult),
    Ensemble(EnsembleResult),
}

impl Verdict {
    pub fn distance(&self) -> f32 {
        match self {
            Self::Single(r) => r.distance,
            Self::Ensemble(r) => r.distance,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Self::Single(r) => r.confidence,
            Self::Ensemble(r) => r.confidence,
        }
    }

    pub fn verified(&self) -> bool {
        match self {
            Self::Single(r) => r.verified,
            Self::Ensemble(r) => r.verified,
        }
    }

    pub fn threshold(&self) -> f32 {
        match self {
            Self::Single(r) => r.threshold,
            Self::Ensemble(r) => r.threshold,
        }
    }

    /// Number of models behind the verdict.
    pub fn model_count(&self) -> usize {
        match self {
            Self::Single(_) => 1,
            Self::Ensemble(r) => r.members.len(),
        }
    }
}
