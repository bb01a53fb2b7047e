//! Debug export of face crops.

use crate::media::{save_image, MediaError};
use image::RgbImage;
use std::path::{Path, PathBuf};

/// Write each crop to `dir` as `0.png`, `1.png`, ... in the given order.
pub fn export_crops<'a, I>(crops: I, dir: &Path) -> Result<Vec<PathBuf>, MediaError>
where
    I: IntoIterator<Item = &'a RgbImage>,
{
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();
    for (i, crop) in crops.into_iter().enumerate() {
        if crop.width() == 0 || crop.height() == 0 {
            tracing::debug!(index = i, "skipping empty crop");
            continue;
        }
        let path = dir.join(format!("{i}.png"));
        save_image(crop, &path)?;
        written.push(path);
    }
    tracing::debug!(count = written.len(), dir = %dir.display(), "exported face crops");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_export_numbered_files() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("crops");
        let crops = vec![RgbImage::new(4, 4), RgbImage::new(0, 0), RgbImage::new(2, 3)];

        let written = export_crops(&crops, &out).unwrap();

        assert_eq!(written, vec![out.join("0.png"), out.join("2.png")]);
        assert!(out.join("0.png").exists());
        assert!(!out.join("1.png").exists());
    }
}
