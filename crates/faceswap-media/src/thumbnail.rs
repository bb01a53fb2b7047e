//! Resizing for thumbnails and previews.

use image::imageops::FilterType;
use image::{DynamicImage, RgbImage};

/// Scale and center-crop to exactly `width` × `height` (face buttons,
/// face choice tiles).
pub fn fit(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return RgbImage::new(width, height);
    }
    DynamicImage::ImageRgb8(image.clone())
        .resize_to_fill(width, height, FilterType::Lanczos3)
        .to_rgb8()
}

/// Scale, keeping the aspect ratio, to the largest size inside
/// `max_width` × `max_height` (preview window).
pub fn contain(image: &RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    if image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    DynamicImage::ImageRgb8(image.clone())
        .resize(max_width, max_height, FilterType::Lanczos3)
        .to_rgb8()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_exact_size() {
        let img = RgbImage::new(300, 120);
        assert_eq!(fit(&img, 200, 200).dimensions(), (200, 200));
    }

    #[test]
    fn test_fit_empty_source() {
        assert_eq!(fit(&RgbImage::new(0, 0), 16, 8).dimensions(), (16, 8));
    }

    #[test]
    fn test_contain_keeps_aspect() {
        let img = RgbImage::new(2400, 700);
        assert_eq!(contain(&img, 1200, 700).dimensions(), (1200, 350));
    }

    #[test]
    fn test_contain_scales_up() {
        let img = RgbImage::new(100, 100);
        assert_eq!(contain(&img, 1200, 700).dimensions(), (700, 700));
    }
}
