use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::similarity::{cosine_distance, SimilarityError};

/// Axis-aligned face box in source-image pixel coordinates.
///
/// `x0` is the left edge; left-to-right ordering keys on it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x0 + self.x1) / 2.0, (self.y0 + self.y1) / 2.0)
    }

    /// Intersection-over-Union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);

        let inter = (x1 - x0).max(0.0) * (y1 - y0).max(0.0);
        let union = self.area() + other.area() - inter;

        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Integer crop rectangle `(x, y, width, height)` clamped to an image of
    /// `width` × `height`. Degenerate boxes give a zero-sized rectangle.
    pub fn clamped_rect(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() {
                0
            } else {
                (v.trunc().max(0.0) as u32).min(max)
            }
        };

        let x0 = clamp(self.x0, width);
        let y0 = clamp(self.y0, height);
        let x1 = clamp(self.x1, width).max(x0);
        let y1 = clamp(self.y1, height).max(y0);

        (x0, y0, x1 - x0, y1 - y0)
    }
}

/// Sex attribute reported by the gender/age head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sex {
    Female,
    Male,
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sex::Female => f.write_str("F"),
            Sex::Male => f.write_str("M"),
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    /// Cosine distance to another embedding: 0 = same direction, 2 = opposite.
    pub fn distance(&self, other: &Embedding) -> Result<f32, SimilarityError> {
        cosine_distance(&self.values, &other.values)
    }
}

/// One face found in an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub bbox: BoundingBox,
    /// Five-point landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: [(f32, f32); 5],
    pub embedding: Embedding,
    pub detection_score: f32,
    pub age: u8,
    pub sex: Sex,
}

/// A detected face together with the pixels cut out of its source image.
///
/// The pair is produced in one step and only ever moved together, so a
/// preview shown to the user always belongs to the embedding it is paired with.
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub face: DetectedFace,
    pub pixels: RgbImage,
}

/// Anything positioned by a face bounding box.
pub trait HasBounds {
    fn bounds(&self) -> &BoundingBox;
}

impl HasBounds for BoundingBox {
    fn bounds(&self) -> &BoundingBox {
        self
    }
}

impl HasBounds for DetectedFace {
    fn bounds(&self) -> &BoundingBox {
        &self.bbox
    }
}

impl HasBounds for FaceCrop {
    fn bounds(&self) -> &BoundingBox {
        &self.face.bbox
    }
}

impl<T: HasBounds> HasBounds for &T {
    fn bounds(&self) -> &BoundingBox {
        (*self).bounds()
    }
}
