//! Writing the swapped result for the current target.

use crate::session::{FrameRef, Role, Session, SessionError};
use faceswap_core::Detector;
use faceswap_media::video::{self, DEFAULT_FPS};
use faceswap_media::{load_image, save_image, MediaError, MediaKind};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Frames between progress log lines during video renders.
const PROGRESS_EVERY: usize = 50;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderReport {
    pub output: PathBuf,
    pub frames: usize,
    /// Encoding rate; `None` for still images.
    pub fps: Option<f64>,
    /// Where the processed frames were kept, when asked to keep them.
    pub frames_dir: Option<PathBuf>,
}

impl<D: Detector> Session<D> {
    /// Render the processed target to `output`.
    pub fn render(&mut self, output: &Path) -> Result<RenderReport, SessionError> {
        if self.path(Role::Source).is_none() {
            return Err(SessionError::Missing(Role::Source));
        }
        let target = self
            .path(Role::Target)
            .map(Path::to_path_buf)
            .ok_or(SessionError::Missing(Role::Target))?;
        let kind = self.media_kind(Role::Target).ok_or(SessionError::Missing(Role::Target))?;

        tracing::info!(target = %target.display(), output = %output.display(), ?kind, "render started");
        let report = match kind {
            MediaKind::Image => {
                let frame = self.render_frame(0)?;
                save_image(&frame, output)?;
                RenderReport {
                    output: output.to_path_buf(),
                    frames: 1,
                    fps: None,
                    frames_dir: None,
                }
            }
            MediaKind::Video => self.render_video(&target, output)?,
        };

        self.remember_output(output);
        tracing::info!(output = %output.display(), frames = report.frames, "render finished");
        Ok(report)
    }

    fn render_video(&mut self, target: &Path, output: &Path) -> Result<RenderReport, SessionError> {
        let source = self.source_face()?;
        let options = self.options();

        let fps = if options.keep_fps {
            video::probe_video(target)?.fps
        } else {
            DEFAULT_FPS
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("faceswap-");
        let scratch = match self.temp_dir() {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                builder.tempdir_in(dir)?
            }
            None => builder.tempdir()?,
        };

        let frames_dir = if options.keep_frames {
            let dir = kept_frames_dir(output);
            clear_frames(&dir)?;
            dir
        } else {
            scratch.path().join("frames")
        };

        let frames = video::extract_frames(target, &frames_dir, fps)?;
        if frames.is_empty() {
            return Err(MediaError::FrameOutOfRange {
                path: target.display().to_string(),
                index: 0,
            }
            .into());
        }
        tracing::info!(frames = frames.len(), fps, "frames extracted");

        for (i, frame_path) in frames.iter().enumerate() {
            let image = load_image(frame_path)?;
            let origin = FrameRef {
                path: target.to_path_buf(),
                frame: i as u64,
            };
            let processed = self.process_frame(&source, image, &origin)?;
            save_image(&processed, frame_path)?;

            if (i + 1) % PROGRESS_EVERY == 0 {
                tracing::info!(done = i + 1, total = frames.len(), "processing frames");
            }
        }

        let silent = scratch.path().join(silent_name(output));
        video::encode_frames(&frames_dir, fps, &silent)?;

        if options.keep_audio {
            video::restore_audio(target, &silent, output)?;
        } else {
            std::fs::copy(&silent, output)?;
        }

        Ok(RenderReport {
            output: output.to_path_buf(),
            frames: frames.len(),
            fps: Some(fps),
            frames_dir: options.keep_frames.then_some(frames_dir),
        })
    }
}

/// `<dir>/<stem>_frames` next to the output.
pub fn kept_frames_dir(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{stem}_frames"))
}

/// Encoder output inside the scratch dir, keeping the container extension.
fn silent_name(output: &Path) -> String {
    match output.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("silent.{ext}"),
        None => "silent.mp4".to_string(),
    }
}

/// Remove numbered frames left by an earlier render into the same dir.
fn clear_frames(dir: &Path) -> Result<(), MediaError> {
    if !dir.exists() {
        return Ok(());
    }
    for frame in video::list_frames(dir)? {
        std::fs::remove_file(frame)?;
    }
    Ok(())
}
