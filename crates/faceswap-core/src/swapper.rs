//! InSwapper face swap processor via ONNX Runtime.
//!
//! Replaces each target face with the identity carried by the source
//! embedding. The model takes a 128x128 aligned target crop plus a latent
//! vector obtained by projecting the ArcFace embedding through the model's
//! embedding map (shipped alongside the model as raw little-endian f32).

use crate::alignment;
use crate::processor::{FrameProcessor, ProcessorError};
use crate::recognizer::{l2_normalize, ARCFACE_EMBEDDING_DIM};
use crate::types::DetectedFace;
use image::{Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

pub const SWAPPER_MODEL: &str = "inswapper_128.onnx";
pub const SWAPPER_EMAP: &str = "inswapper_128.emap";
pub const SWAPPER_NAME: &str = "face_swapper";

const SWAPPER_INPUT_SIZE: usize = 128;
/// Blend ramp width, in crop pixels, at the edge of the pasted face.
const SWAPPER_FEATHER: f32 = 12.0;

#[derive(Error, Debug)]
pub enum SwapperError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("invalid embedding map {path}: {reason}")]
    InvalidEmap { path: String, reason: String },
    #[error("source embedding has {0} values, expected {ARCFACE_EMBEDDING_DIM}")]
    EmbeddingSize(usize),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

pub struct InSwapper {
    session: Session,
    emap: Array2<f32>,
}

impl InSwapper {
    /// Load `inswapper_128.onnx` and its embedding map from `model_dir`.
    pub fn load(model_dir: &Path, intra_threads: usize) -> Result<Self, SwapperError> {
        let model_path = model_dir.join(SWAPPER_MODEL);
        if !model_path.exists() {
            return Err(SwapperError::ModelNotFound(model_path.display().to_string()));
        }
        let emap = load_emap(&model_dir.join(SWAPPER_EMAP))?;

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(&model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            "loaded inswapper model"
        );

        Ok(Self { session, emap })
    }

    fn swap_one(
        &mut self,
        latent: &Array2<f32>,
        target: &DetectedFace,
        frame: &mut RgbImage,
    ) -> Result<(), SwapperError> {
        let (aligned, matrix) = alignment::align_face(frame, &target.landmarks, SWAPPER_INPUT_SIZE);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![
            "target" => TensorRef::from_array_view(input.view())?,
            "source" => TensorRef::from_array_view(latent.view())?,
        ])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SwapperError::InferenceFailed(format!("swap output: {e}")))?;

        let swapped = postprocess(raw)?;
        alignment::paste_back(frame, &swapped, &matrix, SWAPPER_FEATHER);
        Ok(())
    }
}

impl FrameProcessor for InSwapper {
    fn name(&self) -> &str {
        SWAPPER_NAME
    }

    fn process(
        &mut self,
        source: &DetectedFace,
        targets: &[DetectedFace],
        mut frame: RgbImage,
    ) -> Result<RgbImage, ProcessorError> {
        let wrap = |source| ProcessorError::Swapper {
            name: SWAPPER_NAME.to_string(),
            source,
        };

        let latent = project_latent(&source.embedding.values, &self.emap).map_err(wrap)?;
        for target in targets {
            self.swap_one(&latent, target, &mut frame).map_err(wrap)?;
        }
        tracing::debug!(swapped = targets.len(), "face swap applied");
        Ok(frame)
    }
}

fn load_emap(path: &Path) -> Result<Array2<f32>, SwapperError> {
    let invalid = |reason: String| SwapperError::InvalidEmap {
        path: path.display().to_string(),
        reason,
    };

    let bytes = std::fs::read(path)?;
    let expected = ARCFACE_EMBEDDING_DIM * ARCFACE_EMBEDDING_DIM * std::mem::size_of::<f32>();
    if bytes.len() != expected {
        return Err(invalid(format!("expected {expected} bytes, got {}", bytes.len())));
    }

    let values: Vec<f32> = bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Array2::from_shape_vec((ARCFACE_EMBEDDING_DIM, ARCFACE_EMBEDDING_DIM), values)
        .map_err(|e| invalid(e.to_string()))
}

/// `normalize(embedding · emap)` as a `(1, 512)` array.
fn project_latent(embedding: &[f32], emap: &Array2<f32>) -> Result<Array2<f32>, SwapperError> {
    if embedding.len() != emap.nrows() {
        return Err(SwapperError::EmbeddingSize(embedding.len()));
    }
    let row = Array2::from_shape_vec((1, embedding.len()), embedding.to_vec())
        .map_err(|e| SwapperError::InferenceFailed(e.to_string()))?;
    let projected = row.dot(emap);
    let values = l2_normalize(projected.iter().copied().collect());
    Array2::from_shape_vec((1, values.len()), values).map_err(|e| SwapperError::InferenceFailed(e.to_string()))
}

/// RGB scaled to [0, 1].
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = SWAPPER_INPUT_SIZE;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, px) in aligned.enumerate_pixels() {
        for ch in 0..3 {
            tensor[[0, ch, y as usize, x as usize]] = px[ch] as f32 / 255.0;
        }
    }
    tensor
}

/// NCHW [0, 1] output back to a 128x128 RGB image.
fn postprocess(raw: &[f32]) -> Result<RgbImage, SwapperError> {
    let size = SWAPPER_INPUT_SIZE;
    let plane = size * size;
    if raw.len() != 3 * plane {
        return Err(SwapperError::InferenceFailed(format!(
            "expected {} output values, got {}",
            3 * plane,
            raw.len()
        )));
    }

    let to_u8 = |v: f32| (v * 255.0).round().clamp(0.0, 255.0) as u8;
    Ok(RgbImage::from_fn(size as u32, size as u32, |x, y| {
        let i = y as usize * size + x as usize;
        Rgb([to_u8(raw[i]), to_u8(raw[plane + i]), to_u8(raw[2 * plane + i])])
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_latent_identity_map() {
        let emap = Array2::<f32>::eye(ARCFACE_EMBEDDING_DIM);
        let mut embedding = vec![0.0; ARCFACE_EMBEDDING_DIM];
        embedding[3] = 2.0;
        let latent = project_latent(&embedding, &emap).unwrap();
        assert_eq!(latent.shape(), &[1, ARCFACE_EMBEDDING_DIM]);
        assert!((latent[[0, 3]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_project_latent_wrong_size() {
        let emap = Array2::<f32>::eye(ARCFACE_EMBEDDING_DIM);
        assert!(matches!(
            project_latent(&[1.0, 2.0], &emap),
            Err(SwapperError::EmbeddingSize(2))
        ));
    }

    #[test]
    fn test_postprocess_planes() {
        let plane = SWAPPER_INPUT_SIZE * SWAPPER_INPUT_SIZE;
        let mut raw = vec![0.0f32; 3 * plane];
        raw[..plane].fill(1.0);
        raw[2 * plane..].fill(0.5);
        let img = postprocess(&raw).unwrap();
        assert_eq!(img.get_pixel(7, 9), &Rgb([255, 0, 128]));
    }

    #[test]
    fn test_postprocess_wrong_size() {
        assert!(postprocess(&[0.0; 10]).is_err());
    }

    #[test]
    fn test_preprocess_scaled() {
        let img = RgbImage::from_pixel(128, 128, Rgb([255, 0, 51]));
        let t = preprocess(&img);
        assert_eq!(t[[0, 0, 0, 0]], 1.0);
        assert_eq!(t[[0, 1, 0, 0]], 0.0);
        assert!((t[[0, 2, 0, 0]] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_load_emap_rejects_wrong_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SWAPPER_EMAP);
        std::fs::write(&path, [0u8; 16]).unwrap();
        assert!(matches!(load_emap(&path), Err(SwapperError::InvalidEmap { .. })));
    }

    #[test]
    fn test_load_emap_little_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SWAPPER_EMAP);
        let mut bytes = vec![0u8; ARCFACE_EMBEDDING_DIM * ARCFACE_EMBEDDING_DIM * 4];
        bytes[4..8].copy_from_slice(&1.5f32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();
        let emap = load_emap(&path).unwrap();
        assert_eq!(emap[[0, 1]], 1.5);
    }

    #[test]
    fn test_load_missing_model() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            InSwapper::load(dir.path(), 1),
            Err(SwapperError::ModelNotFound(_))
        ));
    }
}
