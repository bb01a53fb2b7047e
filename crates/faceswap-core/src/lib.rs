//! faceswap-core: Face extraction, selection and matching.
//!
//! Uses SCRFD for face detection, ArcFace for embeddings and the
//! InsightFace genderage head for attributes, all via ONNX Runtime.
//! Frame processors (InSwapper) consume the chosen faces.

pub mod alignment;
pub mod analyser;
pub mod attributes;
pub mod detector;
pub mod processor;
pub mod recognizer;
pub mod selection;
pub mod similarity;
pub mod swapper;
pub mod types;

pub use analyser::{AnalyserOptions, FaceAnalyser};
pub use detector::{Detector, DetectorError};
pub use processor::{build_chain, choose_targets, FrameProcessor, ProcessorChain, ProcessorError};
pub use selection::{extract_faces, get_many_faces, get_one_face};
pub use similarity::{cosine_distance, SimilarityError};
pub use types::{BoundingBox, DetectedFace, Embedding, FaceCrop, HasBounds, Sex};

/// Default directory for ONNX model files: `$XDG_DATA_HOME/faceswap/models`.
pub fn default_model_dir() -> std::path::PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            std::path::PathBuf::from(home).join(".local/share")
        })
        .join("faceswap/models")
}
