//! Face extraction and left-to-right selection.

use crate::detector::{Detector, DetectorError};
use crate::types::{DetectedFace, FaceCrop, HasBounds};
use image::RgbImage;

/// The face whose left edge is furthest left. Ties go to the earliest
/// element; an empty slice gives `None`.
pub fn get_one_face<T: HasBounds>(faces: &[T]) -> Option<&T> {
    faces
        .iter()
        .min_by(|a, b| a.bounds().x0.total_cmp(&b.bounds().x0))
}

/// All faces sorted by left edge. The sort is stable, so faces sharing an
/// `x0` keep their input order.
pub fn get_many_faces<T: HasBounds>(mut faces: Vec<T>) -> Vec<T> {
    faces.sort_by(|a, b| a.bounds().x0.total_cmp(&b.bounds().x0));
    faces
}

/// Run the detector once and return the leftmost face, if any.
pub fn detect_one<D: Detector + ?Sized>(
    detector: &mut D,
    image: &RgbImage,
) -> Result<Option<DetectedFace>, DetectorError> {
    let faces = detector.detect(image)?;
    Ok(get_one_face(&faces).cloned())
}

/// Run the detector once and return every face, left to right.
pub fn detect_many<D: Detector + ?Sized>(
    detector: &mut D,
    image: &RgbImage,
) -> Result<Vec<DetectedFace>, DetectorError> {
    Ok(get_many_faces(detector.detect(image)?))
}

/// Detect faces and cut each one out of the image.
///
/// Boxes reaching past the image edges are clamped. An image with no faces
/// gives an empty vector; callers treat that as "nothing to select".
pub fn extract_faces<D: Detector + ?Sized>(
    detector: &mut D,
    image: &RgbImage,
) -> Result<Vec<FaceCrop>, DetectorError> {
    let crops = detect_many(detector, image)?
        .into_iter()
        .map(|face| {
            let pixels = crop_face(image, &face);
            FaceCrop { face, pixels }
        })
        .collect::<Vec<_>>();

    tracing::debug!(faces = crops.len(), "extracted face crops");
    Ok(crops)
}

/// Pixels inside the face's bounding box.
pub fn crop_face(image: &RgbImage, face: &DetectedFace) -> RgbImage {
    let (x, y, w, h) = face.bbox.clamped_rect(image.width(), image.height());
    image::imageops::crop_imm(image, x, y, w, h).to_image()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::{BoundingBox, Embedding, Sex};
    use image::Rgb;

    pub(crate) fn face_at(x0: f32, tag: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { x0, y0: 10.0, x1: x0 + 20.0, y1: 30.0 },
            landmarks: [(0.0, 0.0); 5],
            embedding: Embedding::new(vec![tag, 1.0]),
            detection_score: 0.9,
            age: 30,
            sex: Sex::Female,
        }
    }

    /// Returns a fixed list of faces for every image.
    pub(crate) struct FixedDetector {
        pub faces: Vec<DetectedFace>,
        pub calls: usize,
    }

    impl Detector for FixedDetector {
        fn detect(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
            self.calls += 1;
            Ok(self.faces.clone())
        }
    }

    #[test]
    fn test_get_one_face_minimum_x0() {
        let faces = vec![face_at(50.0, 1.0), face_at(5.0, 2.0), face_at(30.0, 3.0)];
        let one = get_one_face(&faces).unwrap();
        assert_eq!(one.bbox.x0, 5.0);
    }

    #[test]
    fn test_get_one_face_tie_returns_first() {
        let faces = vec![face_at(7.0, 1.0), face_at(7.0, 2.0), face_at(7.0, 3.0)];
        let one = get_one_face(&faces).unwrap();
        assert_eq!(one.embedding.values[0], 1.0);
    }

    #[test]
    fn test_get_one_face_empty() {
        let faces: Vec<DetectedFace> = Vec::new();
        assert!(get_one_face(&faces).is_none());
    }

    #[test]
    fn test_get_many_faces_sorted_permutation() {
        let faces = vec![
            face_at(40.0, 1.0),
            face_at(-3.0, 2.0),
            face_at(12.5, 3.0),
            face_at(40.0, 4.0),
            face_at(0.0, 5.0),
        ];
        let sorted = get_many_faces(faces.clone());

        assert_eq!(sorted.len(), faces.len());
        assert!(sorted.windows(2).all(|w| w[0].bbox.x0 <= w[1].bbox.x0));
        for f in &faces {
            assert_eq!(
                sorted.iter().filter(|s| *s == f).count(),
                faces.iter().filter(|o| *o == f).count()
            );
        }
        // Stable: the two x0 = 40 faces keep their order.
        let tags: Vec<f32> = sorted.iter().map(|f| f.embedding.values[0]).collect();
        assert_eq!(tags, vec![2.0, 5.0, 3.0, 1.0, 4.0]);
    }

    #[test]
    fn test_get_many_faces_empty() {
        assert!(get_many_faces(Vec::<DetectedFace>::new()).is_empty());
    }

    #[test]
    fn test_get_one_face_with_nan_does_not_panic() {
        let faces = vec![face_at(f32::NAN, 1.0), face_at(3.0, 2.0)];
        assert!(get_one_face(&faces).is_some());
        assert_eq!(get_many_faces(faces).len(), 2);
    }

    #[test]
    fn test_extract_faces_pairs_crop_with_face() {
        let mut image = RgbImage::new(100, 40);
        for y in 10..30 {
            for x in 60..80 {
                image.put_pixel(x, y, Rgb([255, 0, 0]));
            }
        }
        let mut detector = FixedDetector {
            faces: vec![face_at(60.0, 1.0), face_at(10.0, 2.0)],
            calls: 0,
        };

        let crops = extract_faces(&mut detector, &image).unwrap();

        assert_eq!(detector.calls, 1);
        assert_eq!(crops.len(), 2);
        assert_eq!(crops[0].face.bbox.x0, 10.0);
        assert_eq!(crops[1].face.bbox.x0, 60.0);
        assert_eq!(crops[1].pixels.dimensions(), (20, 20));
        assert_eq!(crops[1].pixels.get_pixel(5, 5), &Rgb([255, 0, 0]));
        assert_eq!(crops[0].pixels.get_pixel(5, 5), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_extract_faces_empty() {
        let mut detector = FixedDetector { faces: vec![], calls: 0 };
        let crops = extract_faces(&mut detector, &RgbImage::new(10, 10)).unwrap();
        assert!(crops.is_empty());
    }

    #[test]
    fn test_extract_faces_clamps_out_of_bounds() {
        let mut detector = FixedDetector { faces: vec![face_at(-10.0, 1.0)], calls: 0 };
        let crops = extract_faces(&mut detector, &RgbImage::new(15, 25)).unwrap();
        assert_eq!(crops[0].pixels.dimensions(), (10, 15));
    }

    #[test]
    fn test_detect_one_and_many() {
        let mut detector = FixedDetector {
            faces: vec![face_at(9.0, 1.0), face_at(2.0, 2.0)],
            calls: 0,
        };
        let image = RgbImage::new(4, 4);
        assert_eq!(detect_one(&mut detector, &image).unwrap().unwrap().bbox.x0, 2.0);
        assert_eq!(detect_many(&mut detector, &image).unwrap()[1].bbox.x0, 9.0);
        assert_eq!(detector.calls, 2);
    }
}
