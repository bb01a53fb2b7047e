//! Media classification and still-image decode.

use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("not an image or video: {0}")]
    Unsupported(String),
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to write {path}: {source}")]
    Encode {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("{tool} could not be started: {source} (is it installed and on PATH?)")]
    ToolMissing {
        tool: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("unexpected ffprobe output: {0}")]
    Probe(String),
    #[error("frame {index} is beyond the end of {path}")]
    FrameOutOfRange { path: String, index: u64 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// What a path holds, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    /// Videos and animated GIFs: anything read frame by frame.
    Video,
}

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "webp", "tif", "tiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "m4v", "mov", "mkv", "avi", "webm", "gif"];

impl MediaKind {
    /// `None` for paths that are neither, including extension-less paths.
    pub fn classify(path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }

    /// Default file name offered for rendered output of this kind.
    pub fn default_output_name(self) -> &'static str {
        match self {
            MediaKind::Image => "output.png",
            MediaKind::Video => "output.mp4",
        }
    }
}

/// Decode an image file to 8-bit RGB.
pub fn load_image(path: &Path) -> Result<RgbImage, MediaError> {
    let image = image::open(path).map_err(|source| MediaError::Decode {
        path: path.display().to_string(),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Encode an RGB image; the format follows the file extension.
pub fn save_image(image: &RgbImage, path: &Path) -> Result<(), MediaError> {
    image.save(path).map_err(|source| MediaError::Encode {
        path: path.display().to_string(),
        source,
    })
}
