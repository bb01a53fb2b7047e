//! Face alignment via 4-DOF similarity transform.
//!
//! Aligns detected faces to canonical square crops using the five
//! InsightFace reference landmarks and least-squares estimation, and maps
//! processed crops back into the full frame.

use image::{Rgb, RgbImage};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

/// 2×3 affine matrix `[a, b, tx, c, d, ty]` mapping source to destination:
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// ```
pub type Affine = [f32; 6];

/// Reference landmarks for an `size`×`size` aligned crop.
///
/// Multiples of 112 scale the template directly; other sizes scale from a
/// 128 base and shift right by 8px (the InsightFace convention).
pub fn reference_landmarks(size: usize) -> [(f32, f32); 5] {
    let (ratio, diff_x) = if size % 112 == 0 {
        (size as f32 / 112.0, 0.0)
    } else {
        let ratio = size as f32 / 128.0;
        (ratio, 8.0 * ratio)
    };

    REFERENCE_LANDMARKS_112.map(|(x, y)| (x * ratio + diff_x, y * ratio))
}

/// Estimate a 2×3 similarity transform (4-DOF: scale, rotation, translation)
/// from `src` landmarks to `dst` landmarks using least-squares.
///
/// Returns [a, -b, tx, b, a, ty].
pub fn estimate_similarity_transform(src: &[(f32, f32); 5], dst: &[(f32, f32); 5]) -> Affine {
    // Build overdetermined system A * [a, b, tx, ty]^T = B
    // For each point pair (sx, sy) -> (dx, dy):
    //   sx * a - sy * b + tx = dx
    //   sy * a + sx * b + ty = dy
    let mut ata = [0.0f32; 16]; // 4x4, row-major
    let mut atb = [0.0f32; 4];

    for i in 0..5 {
        let (sx, sy) = src[i];
        let (dx, dy) = dst[i];

        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];

        for j in 0..4 {
            for k in 0..4 {
                ata[j * 4 + k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let x = solve_4x4(&ata, &atb);
    let (a, b, tx, ty) = (x[0], x[1], x[2], x[3]);

    [a, -b, tx, b, a, ty]
}

/// Solve a 4×4 linear system via Gaussian elimination with partial pivoting.
#[allow(clippy::needless_range_loop)]
fn solve_4x4(ata: &[f32; 16], atb: &[f32; 4]) -> [f32; 4] {
    let mut m = [[0.0f32; 5]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = ata[i * 4 + j];
        }
        m[i][4] = atb[i];
    }

    for col in 0..4 {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..4 {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        m.swap(col, max_row);

        let pivot = m[col][col];
        if pivot.abs() < 1e-12 {
            return [1.0, 0.0, 0.0, 0.0];
        }

        for row in (col + 1)..4 {
            let factor = m[row][col] / pivot;
            for j in col..5 {
                m[row][j] -= factor * m[col][j];
            }
        }
    }

    let mut x = [0.0f32; 4];
    for i in (0..4).rev() {
        x[i] = m[i][4];
        for j in (i + 1)..4 {
            x[i] -= m[i][j] * x[j];
        }
        x[i] /= m[i][i];
    }

    x
}

/// Scale-and-translate transform placing `center` at the middle of an
/// `out_size` square, scaled by `scale`.
pub fn center_scale_transform(center: (f32, f32), scale: f32, out_size: usize) -> Affine {
    let half = out_size as f32 / 2.0;
    [
        scale,
        0.0,
        half - center.0 * scale,
        0.0,
        scale,
        half - center.1 * scale,
    ]
}

/// Invert a 2×3 affine matrix. `None` when the linear part is singular.
pub fn invert_affine(m: &Affine) -> Option<Affine> {
    let (a, b, tx, c, d, ty) = (m[0], m[1], m[2], m[3], m[4], m[5]);
    let det = a * d - b * c;
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    let ia = d * inv;
    let ib = -b * inv;
    let ic = -c * inv;
    let id = a * inv;
    Some([ia, ib, -(ia * tx + ib * ty), ic, id, -(ic * tx + id * ty)])
}

fn apply(m: &Affine, x: f32, y: f32) -> (f32, f32) {
    (m[0] * x + m[1] * y + m[2], m[3] * x + m[4] * y + m[5])
}

/// Bilinear sample; `None` if all four taps are outside the image.
fn sample_bilinear(image: &RgbImage, sx: f32, sy: f32) -> Option<[f32; 3]> {
    let (w, h) = (image.width() as i64, image.height() as i64);
    let x0 = sx.floor() as i64;
    let y0 = sy.floor() as i64;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;

    let mut acc = [0.0f32; 3];
    let mut hit = false;
    for (dx, dy, wgt) in [
        (0, 0, (1.0 - fx) * (1.0 - fy)),
        (1, 0, fx * (1.0 - fy)),
        (0, 1, (1.0 - fx) * fy),
        (1, 1, fx * fy),
    ] {
        let (x, y) = (x0 + dx, y0 + dy);
        if x >= 0 && x < w && y >= 0 && y < h {
            let p = image.get_pixel(x as u32, y as u32);
            for ch in 0..3 {
                acc[ch] += p[ch] as f32 * wgt;
            }
            hit = true;
        }
    }

    hit.then_some(acc)
}

/// Apply a 2×3 affine warp (source → destination) to produce an
/// `out_size`×`out_size` image.
///
/// Uses bilinear interpolation. Out-of-bounds pixels are filled with black.
pub fn warp_affine(image: &RgbImage, matrix: &Affine, out_size: usize) -> RgbImage {
    let mut output = RgbImage::new(out_size as u32, out_size as u32);
    let Some(inv) = invert_affine(matrix) else {
        return output;
    };

    for (ox, oy, px) in output.enumerate_pixels_mut() {
        let (sx, sy) = apply(&inv, ox as f32, oy as f32);
        if let Some(v) = sample_bilinear(image, sx, sy) {
            *px = Rgb(v.map(|c| c.round().clamp(0.0, 255.0) as u8));
        }
    }

    output
}

/// Align a detected face to a canonical `size`×`size` crop.
///
/// Returns the crop and the frame → crop transform, which
/// [`paste_back`] needs to return a processed crop to the frame.
pub fn align_face(image: &RgbImage, landmarks: &[(f32, f32); 5], size: usize) -> (RgbImage, Affine) {
    let matrix = estimate_similarity_transform(landmarks, &reference_landmarks(size));
    (warp_affine(image, &matrix, size), matrix)
}

/// Blend an aligned crop back into `frame` through the inverse of `matrix`.
///
/// The blend weight falls off linearly over `feather` pixels from the crop
/// border so the seam does not show.
pub fn paste_back(frame: &mut RgbImage, crop: &RgbImage, matrix: &Affine, feather: f32) {
    let Some(inv) = invert_affine(matrix) else {
        return;
    };
    let size = crop.width().min(crop.height()) as f32;
    if size < 1.0 {
        return;
    }

    // Bounding box of the crop's corners in frame space.
    let corners = [(0.0, 0.0), (size, 0.0), (0.0, size), (size, size)].map(|(x, y)| apply(&inv, x, y));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let max_x = (corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as u32)
        .min(frame.width());
    let max_y = (corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as u32)
        .min(frame.height());

    let feather = feather.max(1.0);
    for y in min_y..max_y {
        for x in min_x..max_x {
            let (cx, cy) = apply(matrix, x as f32, y as f32);
            let edge = cx.min(cy).min(size - 1.0 - cx).min(size - 1.0 - cy);
            if edge < 0.0 {
                continue;
            }
            let alpha = (edge / feather).min(1.0);
            let Some(src) = sample_bilinear(crop, cx, cy) else {
                continue;
            };
            let dst = frame.get_pixel_mut(x, y);
            for ch in 0..3 {
                let blended = src[ch] * alpha + dst[ch] as f32 * (1.0 - alpha);
                dst[ch] = blended.round().clamp(0.0, 255.0) as u8;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_transform() {
        let pts = REFERENCE_LANDMARKS_112;
        let m = estimate_similarity_transform(&pts, &pts);

        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!((m[4] - 1.0).abs() < 1e-4, "a2 = {}", m[4]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        // Source landmarks at 2x scale → transform should have a ≈ 0.5
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0, y * 2.0));
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 0.05, "a = {}, expected ~0.5", m[0]);
    }

    #[test]
    fn test_reference_landmarks_112_unchanged() {
        assert_eq!(reference_landmarks(112), REFERENCE_LANDMARKS_112);
    }

    #[test]
    fn test_reference_landmarks_128_shifted() {
        let pts = reference_landmarks(128);
        assert!((pts[0].0 - (38.2946 + 8.0)).abs() < 1e-4);
        assert!((pts[0].1 - 51.6963).abs() < 1e-4);
    }

    #[test]
    fn test_invert_affine_roundtrip() {
        let m: Affine = [0.8, -0.3, 12.0, 0.3, 0.8, -4.0];
        let inv = invert_affine(&m).unwrap();
        let (x, y) = apply(&m, 37.0, 91.0);
        let (bx, by) = apply(&inv, x, y);
        assert!((bx - 37.0).abs() < 1e-3 && (by - 91.0).abs() < 1e-3);
    }

    #[test]
    fn test_invert_singular() {
        assert!(invert_affine(&[0.0; 6]).is_none());
    }

    #[test]
    fn test_center_scale_transform_maps_center_to_middle() {
        let m = center_scale_transform((50.0, 80.0), 0.5, 96);
        let (x, y) = apply(&m, 50.0, 80.0);
        assert!((x - 48.0).abs() < 1e-4 && (y - 48.0).abs() < 1e-4);
    }

    #[test]
    fn test_warp_output_size() {
        let frame = RgbImage::from_pixel(64, 48, Rgb([128, 128, 128]));
        let m: Affine = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let out = warp_affine(&frame, &m, 112);
        assert_eq!(out.dimensions(), (112, 112));
        assert_eq!(out.get_pixel(10, 10), &Rgb([128, 128, 128]));
        // Outside the source → black.
        assert_eq!(out.get_pixel(100, 100), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_landmark_roundtrip() {
        // A bright patch at a landmark should land near the reference position.
        let mut frame = RgbImage::new(200, 200);
        let src_landmarks: [(f32, f32); 5] = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        for dy in 0..5 {
            for dx in 0..5 {
                frame.put_pixel(78 + dx, 58 + dy, Rgb([255, 255, 255]));
            }
        }

        let (aligned, _) = align_face(&frame, &src_landmarks, 112);

        let ref_x = REFERENCE_LANDMARKS_112[0].0.round() as u32;
        let ref_y = REFERENCE_LANDMARKS_112[0].1.round() as u32;
        let mut max_val = 0u8;
        for y in ref_y - 1..=ref_y + 1 {
            for x in ref_x - 1..=ref_x + 1 {
                max_val = max_val.max(aligned.get_pixel(x, y)[0]);
            }
        }
        assert!(max_val > 100, "expected bright patch near ({ref_x}, {ref_y}), max={max_val}");
    }

    #[test]
    fn test_paste_back_identity_replaces_interior() {
        let mut frame = RgbImage::from_pixel(32, 32, Rgb([0, 0, 0]));
        let crop = RgbImage::from_pixel(16, 16, Rgb([200, 100, 50]));
        let m: Affine = [1.0, 0.0, -8.0, 0.0, 1.0, -8.0]; // frame (8,8) → crop (0,0)
        paste_back(&mut frame, &crop, &m, 2.0);

        assert_eq!(frame.get_pixel(16, 16), &Rgb([200, 100, 50]));
        assert_eq!(frame.get_pixel(2, 2), &Rgb([0, 0, 0]));
        // Feathered edge is a partial blend.
        assert!(frame.get_pixel(9, 16)[0] < 200);
    }
}
