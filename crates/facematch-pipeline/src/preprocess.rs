//! Preprocessor: enhance an image and cut out its best face.
//!
//! Preparation never fails. Enhancement errors fall back to the input file,
//! and extraction that finds nothing usable falls back to the (enhanced)
//! whole image with a neutral quality of 0.5.

use crate::cache::{self, CacheEntry, FileCache};
use crate::config::PipelineConfig;
use crate::enhance;
use crate::quality;
use crate::store::{self, ResolvedImage, WorkDir};
use facematch_core::{DetectOptions, RecognitionEngine};
use sha2::{Digest, Sha256};
use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Size of extracted face crops.
pub const FACE_TARGET_SIZE: (u32, u32) = (224, 224);

/// Quality reported when extraction is disabled.
const UNEXTRACTED_QUALITY: f32 = 1.0;
/// Quality reported when extraction ran but produced nothing usable.
const FALLBACK_QUALITY: f32 = 0.5;

/// How the prepared file was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceSource {
    /// Best detected face, cropped.
    Extracted,
    /// Extraction disabled; the whole image is used.
    WholeImage,
    /// Extraction found no usable face or failed; the whole image is used.
    Fallback,
}

/// Image ready for comparison, with its quality score.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    pub path: PathBuf,
    pub quality: f32,
    /// Resolved file this was prepared from.
    pub source_path: PathBuf,
    pub source: FaceSource,
}

impl PreparedImage {
    /// True when `path` is a derived file rather than the source itself.
    pub fn is_derived(&self) -> bool {
        self.path != self.source_path
    }
}

impl CacheEntry for PreparedImage {
    fn owned_file(&self) -> Option<&Path> {
        self.is_derived().then_some(self.path.as_path())
    }
}

#[derive(Debug, Clone)]
pub struct PreprocessOptions {
    pub enhance: bool,
    pub extract_faces: bool,
    pub detect: DetectOptions,
    pub quality_floor: f32,
    pub engine_timeout: Duration,
}

impl PreprocessOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            enhance: config.enhance_images,
            extract_faces: config.extract_faces,
            detect: DetectOptions {
                detector_backend: config.detector_backend.clone(),
                align: config.align_faces,
                expand_face_region: config.expand_face_region,
                target_size: FACE_TARGET_SIZE,
            },
            quality_floor: config.face_quality_floor,
            engine_timeout: config.engine_timeout,
        }
    }
}

pub struct Preprocessor {
    engine: Arc<dyn RecognitionEngine>,
    work_dir: Arc<WorkDir>,
    cache: FileCache<PreparedImage>,
    options: PreprocessOptions,
}

impl Preprocessor {
    pub fn new(engine: Arc<dyn RecognitionEngine>, work_dir: Arc<WorkDir>, config: &PipelineConfig) -> Self {
        Self {
            engine,
            work_dir,
            cache: FileCache::new("prepared", config.cache_capacity, config.cache_images),
            options: PreprocessOptions::from_config(config),
        }
    }

    /// Delete files of prepared images that fell out of the cache.
    pub fn purge_evicted(&self) {
        self.cache.purge_evicted();
    }

    /// Prepare `image`, reusing an earlier result for the same source file.
    pub async fn preprocess(&self, image: &ResolvedImage) -> PreparedImage {
        let key = cache_key(&image.path);
        let prepared: Result<PreparedImage, Infallible> = self
            .cache
            .get_or_try_insert_with(
                &key,
                |cached| store::validate_image(&cached.path).is_ok(),
                || async { Ok(self.prepare(image).await) },
            )
            .await;
        match prepared {
            Ok(prepared) => prepared,
            Err(never) => match never {},
        }
    }

    /// Prepare `image` without consulting the cache.
    pub async fn prepare(&self, image: &ResolvedImage) -> PreparedImage {
        let enhanced = if self.options.enhance {
            self.enhance(&image.path).await
        } else {
            image.path.clone()
        };

        let (path, quality, source) = if !self.options.extract_faces {
            (enhanced, UNEXTRACTED_QUALITY, FaceSource::WholeImage)
        } else {
            match self.extract_best_face(&enhanced).await {
                Some((crop, quality)) => {
                    if enhanced != image.path {
                        cache::remove_file_quietly(&enhanced);
                    }
                    (crop, quality, FaceSource::Extracted)
                }
                None => (enhanced, FALLBACK_QUALITY, FaceSource::Fallback),
            }
        };

        tracing::debug!(
            source_path = %image.path.display(),
            path = %path.display(),
            quality,
            ?source,
            "image prepared"
        );
        PreparedImage {
            path,
            quality,
            source_path: image.path.clone(),
            source,
        }
    }

    /// Enhanced copy of `source`, or `source` itself if enhancement fails.
    async fn enhance(&self, source: &Path) -> PathBuf {
        let target = self.work_dir.fresh_file("jpg");
        let (from, to) = (source.to_path_buf(), target.clone());
        match tokio::task::spawn_blocking(move || enhance::enhance_file(&from, &to)).await {
            Ok(Ok(())) => target,
            Ok(Err(e)) => {
                tracing::debug!(path = %source.display(), error = %e, "image enhancement failed");
                cache::remove_file_quietly(&target);
                source.to_path_buf()
            }
            Err(e) => {
                tracing::debug!(path = %source.display(), error = %e, "enhancement task failed");
                source.to_path_buf()
            }
        }
    }

    /// Detect faces in `path` and write the best acceptable one to a fresh file.
    async fn extract_best_face(&self, path: &Path) -> Option<(PathBuf, f32)> {
        let engine = Arc::clone(&self.engine);
        let options = self.options.detect.clone();
        let image = path.to_path_buf();
        let task = tokio::task::spawn_blocking(move || engine.extract_faces(&image, &options));

        let faces = match tokio::time::timeout(self.options.engine_timeout, task).await {
            Ok(Ok(Ok(faces))) => faces,
            Ok(Ok(Err(e))) => {
                tracing::debug!(path = %path.display(), error = %e, "face extraction failed");
                return None;
            }
            Ok(Err(e)) => {
                tracing::debug!(path = %path.display(), error = %e, "face extraction task failed");
                return None;
            }
            Err(_) => {
                tracing::debug!(
                    path = %path.display(),
                    timeout_secs = self.options.engine_timeout.as_secs_f32(),
                    "face extraction timed out"
                );
                return None;
            }
        };

        if faces.is_empty() {
            tracing::debug!(path = %path.display(), "no faces detected");
            return None;
        }
        let (face, quality) = quality::best_face(faces, self.options.quality_floor)?;

        let target = self.work_dir.fresh_file("jpg");
        let out = target.clone();
        match tokio::task::spawn_blocking(move || enhance::write_jpeg(&face.crop, &out)).await {
            Ok(Ok(())) => Some((target, quality)),
            Ok(Err(e)) => {
                tracing::debug!(path = %target.display(), error = %e, "failed to write face crop");
                cache::remove_file_quietly(&target);
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "face crop task failed");
                None
            }
        }
    }
}

/// Cache key for the prepared form of a source file.
pub fn cache_key(source: &Path) -> String {
    format!("{:x}", Sha256::digest(format!("{}_extracted", source.display()).as_bytes()))
}
