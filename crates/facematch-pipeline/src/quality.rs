//! Face quality scoring and best-face selection.

use facematch_core::{BoundingBox, DetectedFace};

/// Face area (in pixels) at which the size term saturates.
const FULL_SIZE_AREA: f32 = 10_000.0;

const SIZE_WEIGHT: f32 = 0.4;
const CONFIDENCE_WEIGHT: f32 = 0.4;
const ASPECT_WEIGHT: f32 = 0.2;

/// Score a detected face in [0, 1] from its size, detector confidence, and squareness.
pub fn face_quality(bbox: &BoundingBox) -> f32 {
    let size = (bbox.area() / FULL_SIZE_AREA).min(1.0);
    let confidence = bbox.confidence.clamp(0.0, 1.0);
    SIZE_WEIGHT * size + CONFIDENCE_WEIGHT * confidence + ASPECT_WEIGHT * aspect_score(bbox)
}

fn aspect_score(bbox: &BoundingBox) -> f32 {
    if bbox.width <= 0.0 || bbox.height <= 0.0 {
        return 0.5;
    }
    let ratio = bbox.width / bbox.height;
    (1.0 - (1.0 - ratio).abs() * 0.5).clamp(0.0, 1.0)
}

/// Pick the highest-quality face.
///
/// Returns `None` when no face scores above zero or the best one falls
/// below `floor`. Ties keep the earlier face.
pub fn best_face(faces: Vec<DetectedFace>, floor: f32) -> Option<(DetectedFace, f32)> {
    let mut best: Option<(DetectedFace, f32)> = None;
    for face in faces {
        let quality = face_quality(&face.bbox);
        let current = best.as_ref().map_or(0.0, |(_, q)| *q);
        if quality > current {
            best = Some((face, quality));
        }
    }

    match best {
        Some((_, quality)) if quality < floor => {
            tracing::debug!(quality, floor, "best face below quality floor");
            None
        }
        other => other,
    }
}
