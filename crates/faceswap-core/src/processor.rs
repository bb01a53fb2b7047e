//! Frame processors: the transform applied to each target frame.

use crate::selection::get_one_face;
use crate::swapper::{InSwapper, SwapperError, SWAPPER_NAME};
use crate::types::{DetectedFace, Embedding};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("unknown frame processor: {0}")]
    Unknown(String),
    #[error("no frame processors configured")]
    Empty,
    #[error("{name}: {source}")]
    Swapper {
        name: String,
        #[source]
        source: SwapperError,
    },
}

/// Transforms one frame given the source face and the faces to replace.
pub trait FrameProcessor: Send {
    fn name(&self) -> &str;

    fn process(
        &mut self,
        source: &DetectedFace,
        targets: &[DetectedFace],
        frame: RgbImage,
    ) -> Result<RgbImage, ProcessorError>;
}

/// Processors applied in order, each one consuming the previous output.
#[derive(Default)]
pub struct ProcessorChain {
    processors: Vec<Box<dyn FrameProcessor>>,
}

impl ProcessorChain {
    pub fn new(processors: Vec<Box<dyn FrameProcessor>>) -> Self {
        Self { processors }
    }

    pub fn push(&mut self, processor: Box<dyn FrameProcessor>) {
        self.processors.push(processor);
    }

    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(|p| p.name()).collect()
    }

    pub fn process(
        &mut self,
        source: &DetectedFace,
        targets: &[DetectedFace],
        mut frame: RgbImage,
    ) -> Result<RgbImage, ProcessorError> {
        if self.processors.is_empty() {
            return Err(ProcessorError::Empty);
        }
        for processor in &mut self.processors {
            tracing::trace!(processor = processor.name(), targets = targets.len(), "processing frame");
            frame = processor.process(source, targets, frame)?;
        }
        Ok(frame)
    }
}

/// Build a chain from configured processor names, loading each model from
/// `model_dir`.
pub fn build_chain(names: &[String], model_dir: &Path, intra_threads: usize) -> Result<ProcessorChain, ProcessorError> {
    if names.is_empty() {
        return Err(ProcessorError::Empty);
    }

    let mut chain = ProcessorChain::default();
    for name in names {
        match name.as_str() {
            SWAPPER_NAME => {
                let swapper = InSwapper::load(model_dir, intra_threads).map_err(|source| ProcessorError::Swapper {
                    name: name.clone(),
                    source,
                })?;
                chain.push(Box::new(swapper));
            }
            other => return Err(ProcessorError::Unknown(other.to_string())),
        }
    }
    Ok(chain)
}

/// Which faces of a frame get replaced.
///
/// `many_faces` takes every face. Otherwise the face nearest in embedding
/// space to `reference` (the user's target pick) is used, falling back to
/// the leftmost face when there is no reference or no distance is defined.
pub fn choose_targets(
    faces: Vec<DetectedFace>,
    reference: Option<&Embedding>,
    many_faces: bool,
) -> Vec<DetectedFace> {
    if many_faces || faces.len() <= 1 {
        return faces;
    }

    let nearest = reference.and_then(|reference| {
        faces
            .iter()
            .filter_map(|f| f.embedding.distance(reference).ok().map(|d| (d, f)))
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, f)| f)
    });

    nearest
        .or_else(|| get_one_face(&faces))
        .cloned()
        .into_iter()
        .collect()
}
