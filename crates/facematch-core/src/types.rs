use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Bounding box for a detected face, with optional facial landmarks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Grow the box around its centre by `factor`, clipped to an image of `width` × `height`.
    pub fn expanded(&self, factor: f32, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let factor = factor.max(1.0);
        let cx = self.x + self.width / 2.0;
        let cy = self.y + self.height / 2.0;
        let half_w = self.width * factor / 2.0;
        let half_h = self.height * factor / 2.0;

        let x0 = (cx - half_w).floor().clamp(0.0, width as f32) as u32;
        let y0 = (cy - half_h).floor().clamp(0.0, height as f32) as u32;
        let x1 = (cx + half_w).ceil().clamp(0.0, width as f32) as u32;
        let y1 = (cy + half_h).ceil().clamp(0.0, height as f32) as u32;

        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

/// Face embedding vector produced by one recognition model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model that produced this embedding.
    pub model: Option<RecognitionModel>,
}

impl Embedding {
    /// Compute cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]. Higher = more similar.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Compute Euclidean distance between two embeddings.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Copy of this embedding scaled to unit length.
    pub fn l2_normalized(&self) -> Embedding {
        let norm: f32 = self.values.iter().map(|x| x * x).sum::<f32>().sqrt();
        let values = if norm > 0.0 {
            self.values.iter().map(|x| x / norm).collect()
        } else {
            self.values.clone()
        };
        Embedding { values, model: self.model }
    }

    /// Non-negative dissimilarity under `metric`. Lower = more similar.
    pub fn distance(&self, other: &Embedding, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Cosine => (1.0 - self.similarity(other)).max(0.0),
            DistanceMetric::Euclidean => self.euclidean_distance(other),
            DistanceMetric::EuclideanL2 => self
                .l2_normalized()
                .euclidean_distance(&other.l2_normalized()),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// How two embeddings are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DistanceMetric {
    #[default]
    #[serde(rename = "cosine")]
    Cosine,
    #[serde(rename = "euclidean")]
    Euclidean,
    #[serde(rename = "euclidean_l2")]
    EuclideanL2,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Euclidean => "euclidean",
            Self::EuclideanL2 => "euclidean_l2",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(Self::Cosine),
            "euclidean" => Ok(Self::Euclidean),
            "euclidean_l2" | "euclidean-l2" => Ok(Self::EuclideanL2),
            _ => Err(UnknownVariant { kind: "distance metric", value: s.to_string() }),
        }
    }
}

/// Face recognition networks known to the pipeline.
///
/// Each model carries a fixed cosine decision threshold and a fixed
/// ensemble reliability weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecognitionModel {
    #[serde(rename = "VGG-Face")]
    VggFace,
    Facenet,
    Facenet512,
    OpenFace,
    DeepFace,
    DeepID,
    ArcFace,
    Dlib,
    SFace,
}

impl RecognitionModel {
    pub const ALL: [RecognitionModel; 9] = [
        Self::VggFace,
        Self::Facenet,
        Self::Facenet512,
        Self::OpenFace,
        Self::DeepFace,
        Self::DeepID,
        Self::ArcFace,
        Self::Dlib,
        Self::SFace,
    ];

    /// Identifier as used in configuration and model file names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VggFace => "VGG-Face",
            Self::Facenet => "Facenet",
            Self::Facenet512 => "Facenet512",
            Self::OpenFace => "OpenFace",
            Self::DeepFace => "DeepFace",
            Self::DeepID => "DeepID",
            Self::ArcFace => "ArcFace",
            Self::Dlib => "Dlib",
            Self::SFace => "SFace",
        }
    }

    /// Cosine-distance decision threshold.
    pub fn threshold(&self) -> f32 {
        match self {
            Self::VggFace => 0.40,
            Self::Facenet => 0.40,
            Self::Facenet512 => 0.30,
            Self::OpenFace => 0.10,
            Self::DeepFace => 0.23,
            Self::DeepID => 0.015,
            Self::ArcFace => 0.68,
            Self::Dlib => 0.07,
            Self::SFace => 0.593,
        }
    }

    /// Decision threshold under `metric`.
    ///
    /// For unit-length embeddings `|a - b|² = 2 · (1 - cos)`, so the L2
    /// boundary is derived from the cosine one.
    pub fn threshold_for(&self, metric: DistanceMetric) -> f32 {
        match metric {
            DistanceMetric::Cosine => self.threshold(),
            DistanceMetric::Euclidean | DistanceMetric::EuclideanL2 => {
                (2.0 * self.threshold()).sqrt()
            }
        }
    }

    /// Reliability weight used when averaging ensemble confidences.
    pub fn weight(&self) -> f32 {
        match self {
            Self::Facenet512 | Self::ArcFace => 1.5,
            Self::OpenFace => 0.8,
            _ => 1.0,
        }
    }

    /// Network input size as (width, height).
    pub fn input_size(&self) -> (u32, u32) {
        match self {
            Self::VggFace => (224, 224),
            Self::Facenet | Self::Facenet512 => (160, 160),
            Self::OpenFace => (96, 96),
            Self::DeepFace => (152, 152),
            Self::DeepID => (47, 55),
            Self::ArcFace | Self::SFace => (112, 112),
            Self::Dlib => (150, 150),
        }
    }
}

impl fmt::Display for RecognitionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecognitionModel {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownVariant { kind: "recognition model", value: s.to_string() })
    }
}
