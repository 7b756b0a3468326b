//! facematch-core — Recognition engine contract and ONNX backend.
//!
//! Defines the [`RecognitionEngine`] trait the matching pipeline talks to,
//! plus an implementation that runs SCRFD detection and per-model embedding
//! networks through ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod engine;
pub mod onnx;
pub mod recognizer;
pub mod types;

pub use engine::{DetectOptions, DetectedFace, EngineError, RecognitionEngine, Verification, VerifyOptions};
pub use onnx::OnnxEngine;
pub use types::{BoundingBox, DistanceMetric, Embedding, RecognitionModel, UnknownVariant};
