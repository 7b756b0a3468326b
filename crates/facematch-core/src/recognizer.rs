//! Face embedding networks via ONNX Runtime.
//!
//! One [`FaceRecognizer`] wraps one exported recognition model. Inputs are
//! RGB NCHW tensors at the model's native size, normalised symmetrically to
//! [-1, 1]; outputs are L2-normalised embeddings of whatever width the
//! network produces.

use crate::alignment;
use crate::types::{BoundingBox, Embedding, RecognitionModel};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_MEAN: f32 = 127.5;
const INPUT_STD: f32 = 127.5;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Embedding extractor for a single recognition model.
pub struct FaceRecognizer {
    session: Session,
    model: RecognitionModel,
}

impl FaceRecognizer {
    /// Load the ONNX export of `model` from the given path.
    pub fn load(model_path: &Path, model: RecognitionModel) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            model = %model,
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded recognition model"
        );

        Ok(Self { session, model })
    }

    pub fn model(&self) -> RecognitionModel {
        self.model
    }

    /// Extract an embedding for `face` in `image`, or for the whole image when no face is given.
    ///
    /// Faces with landmarks are aligned to canonical positions; faces without
    /// landmarks are cropped to their box.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: Option<&BoundingBox>,
    ) -> Result<Embedding, RecognizerError> {
        let (width, height) = self.model.input_size();
        let crop = face_input(image, face, width, height);
        let input = Self::preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw_data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        if raw_data.is_empty() {
            return Err(RecognizerError::InferenceFailed(format!(
                "{} produced an empty embedding",
                self.model
            )));
        }

        let embedding = Embedding {
            values: raw_data.to_vec(),
            model: Some(self.model),
        };
        Ok(embedding.l2_normalized())
    }

    /// Convert an RGB crop into a NCHW float tensor.
    fn preprocess(crop: &RgbImage) -> Array4<f32> {
        let (w, h) = (crop.width() as usize, crop.height() as usize);
        let mut tensor = Array4::<f32>::zeros((1, 3, h, w));

        for (x, y, pixel) in crop.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - INPUT_MEAN) / INPUT_STD;
            }
        }

        tensor
    }
}

/// Produce the `width` × `height` network input for a face.
fn face_input(image: &RgbImage, face: Option<&BoundingBox>, width: u32, height: u32) -> RgbImage {
    match face {
        Some(BoundingBox { landmarks: Some(landmarks), .. }) => {
            alignment::align_face(image, landmarks, width, height)
        }
        Some(bbox) => {
            let (x, y, w, h) = bbox.expanded(1.0, image.width(), image.height());
            if w == 0 || h == 0 {
                return imageops::resize(image, width, height, FilterType::Triangle);
            }
            let cropped = imageops::crop_imm(image, x, y, w, h).to_image();
            imageops::resize(&cropped, width, height, FilterType::Triangle)
        }
        None => imageops::resize(image, width, height, FilterType::Triangle),
    }
}
