//! Sex and age estimation with the InsightFace `genderage` head.

use crate::alignment;
use crate::types::{BoundingBox, Sex};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const GENDERAGE_INPUT_SIZE: usize = 96;
/// Crop side relative to the longest side of the face box.
const GENDERAGE_CONTEXT: f32 = 1.5;

#[derive(Error, Debug)]
pub enum AttributeError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Estimated attributes for one face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceAttributes {
    pub sex: Sex,
    pub age: u8,
}

pub struct GenderAgeEstimator {
    session: Session,
}

impl GenderAgeEstimator {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, AttributeError> {
        if !model_path.exists() {
            return Err(AttributeError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded genderage model"
        );

        Ok(Self { session })
    }

    pub fn estimate(&mut self, image: &RgbImage, bbox: &BoundingBox) -> Result<FaceAttributes, AttributeError> {
        let longest = bbox.width().max(bbox.height()).max(1.0);
        let scale = GENDERAGE_INPUT_SIZE as f32 / (longest * GENDERAGE_CONTEXT);
        let matrix = alignment::center_scale_transform(bbox.center(), scale, GENDERAGE_INPUT_SIZE);
        let crop = alignment::warp_affine(image, &matrix, GENDERAGE_INPUT_SIZE);

        let input = preprocess(&crop);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| AttributeError::InferenceFailed(format!("genderage output: {e}")))?;

        decode(raw)
    }
}

/// The genderage head takes raw 0–255 pixel values.
fn preprocess(crop: &RgbImage) -> Array4<f32> {
    let size = GENDERAGE_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in crop.enumerate_pixels() {
        for ch in 0..3 {
            tensor[[0, ch, y as usize, x as usize]] = px[ch] as f32;
        }
    }
    tensor
}

/// Output layout: `[female_logit, male_logit, age / 100]`.
fn decode(raw: &[f32]) -> Result<FaceAttributes, AttributeError> {
    let [female, male, age] = raw.get(..3).and_then(|s| <[f32; 3]>::try_from(s).ok()).ok_or_else(|| {
        AttributeError::InferenceFailed(format!("expected 3 genderage outputs, got {}", raw.len()))
    })?;

    let sex = if male > female { Sex::Male } else { Sex::Female };
    let age = (age * 100.0).round().clamp(0.0, u8::MAX as f32) as u8;

    Ok(FaceAttributes { sex, age })
}
