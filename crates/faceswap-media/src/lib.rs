//! faceswap-media: Media access for the face swap pipeline.
//!
//! Classifies paths, decodes still images, reads and writes video frames
//! through ffmpeg, and resizes thumbnails and previews.

pub mod export;
pub mod media;
pub mod thumbnail;
pub mod video;

pub use media::{load_image, save_image, MediaError, MediaKind};
pub use video::VideoInfo;
