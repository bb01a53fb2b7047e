//! Full face analysis: detection, recognition and attributes in one pass.

use crate::attributes::GenderAgeEstimator;
use crate::detector::{Detector, DetectorError, ScrfdDetector, SCRFD_CONFIDENCE_THRESHOLD};
use crate::recognizer::FaceRecognizer;
use crate::types::DetectedFace;
use image::RgbImage;
use std::path::{Path, PathBuf};

pub const DETECTION_MODEL: &str = "det_10g.onnx";
pub const RECOGNITION_MODEL: &str = "w600k_r50.onnx";
pub const GENDERAGE_MODEL: &str = "genderage.onnx";

/// Tuning knobs for [`FaceAnalyser::load`].
#[derive(Debug, Clone)]
pub struct AnalyserOptions {
    pub detection_threshold: f32,
    pub intra_threads: usize,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        Self {
            detection_threshold: SCRFD_CONFIDENCE_THRESHOLD,
            intra_threads: 2,
        }
    }
}

/// SCRFD + ArcFace + genderage, equivalent to InsightFace's `buffalo_l` pack.
pub struct FaceAnalyser {
    detector: ScrfdDetector,
    recognizer: FaceRecognizer,
    attributes: GenderAgeEstimator,
}

impl FaceAnalyser {
    /// Load all three models from `model_dir`. Fails fast on the first
    /// missing or unloadable model.
    pub fn load(model_dir: &Path, options: &AnalyserOptions) -> Result<Self, DetectorError> {
        let detector = ScrfdDetector::load(
            &model_dir.join(DETECTION_MODEL),
            options.detection_threshold,
            options.intra_threads,
        )?;
        let recognizer = FaceRecognizer::load(&model_dir.join(RECOGNITION_MODEL), options.intra_threads)?;
        let attributes = GenderAgeEstimator::load(&model_dir.join(GENDERAGE_MODEL), options.intra_threads)?;

        tracing::info!(model_dir = %model_dir.display(), "face analyser ready");

        Ok(Self {
            detector,
            recognizer,
            attributes,
        })
    }

    /// Model files this analyser needs, for diagnostics.
    pub fn required_models(model_dir: &Path) -> Vec<PathBuf> {
        [DETECTION_MODEL, RECOGNITION_MODEL, GENDERAGE_MODEL]
            .iter()
            .map(|name| model_dir.join(name))
            .collect()
    }
}

impl Detector for FaceAnalyser {
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
        let detections = self.detector.detect_boxes(image)?;
        let mut faces = Vec::with_capacity(detections.len());

        for det in detections {
            let Some(landmarks) = det.landmarks else {
                tracing::warn!(score = det.score, "detection without landmarks skipped");
                continue;
            };

            let embedding = self.recognizer.extract(image, Some(&landmarks))?;
            let attrs = self.attributes.estimate(image, &det.bbox)?;

            faces.push(DetectedFace {
                bbox: det.bbox,
                landmarks,
                embedding,
                detection_score: det.score,
                age: attrs.age,
                sex: attrs.sex,
            });
        }

        tracing::debug!(faces = faces.len(), "analysed image");
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_missing_model_dir() {
        let dir = Path::new("/nonexistent/faceswap-models");
        match FaceAnalyser::load(dir, &AnalyserOptions::default()) {
            Err(DetectorError::ModelNotFound(path)) => assert!(path.ends_with(DETECTION_MODEL)),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("expected ModelNotFound"),
        }
    }

    #[test]
    fn test_required_models() {
        let models = FaceAnalyser::required_models(Path::new("/m"));
        assert_eq!(models.len(), 3);
        assert_eq!(models[0], Path::new("/m/det_10g.onnx"));
    }
}
