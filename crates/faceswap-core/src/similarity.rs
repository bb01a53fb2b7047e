//! Cosine distance between face embeddings.
//!
//! The result is advisory: it is reported to the user, never compared
//! against a threshold here.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimilarityError {
    #[error("embedding length mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("similarity undefined: embedding has a zero or non-finite norm")]
    ZeroVector,
}

/// Compute `1 - (a·b) / (|a||b|)`.
///
/// Returns a value in [0, 2]: 0 for identical directions, 1 for orthogonal,
/// 2 for opposite. A vector with a zero or non-finite norm on either side
/// (all zeros, empty, NaN or infinite components) has no usable direction,
/// so the distance is reported as [`SimilarityError::ZeroVector`] instead of NaN.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (x as f64, y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 || !denom.is_finite() {
        return Err(SimilarityError::ZeroVector);
    }

    // Rounding can push |cos| marginally past 1.
    let cos = (dot / denom).clamp(-1.0, 1.0);
    Ok((1.0 - cos) as f32)
}
