//! Video access through the `ffmpeg` / `ffprobe` executables.
//!
//! No codec work happens in-process: frames come out of ffmpeg as PNG and
//! go back in the same way.

use crate::media::MediaError;
use image::RgbImage;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Frame file pattern used for extracted and re-encoded frames.
pub const FRAME_PATTERN: &str = "%06d.png";
/// Frame rate used when the source rate is not kept.
pub const DEFAULT_FPS: f64 = 30.0;

/// Stream properties reported by ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub fps: f64,
    pub frame_count: u64,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    r_frame_rate: Option<String>,
    nb_frames: Option<String>,
    nb_read_packets: Option<String>,
}

fn run(tool: &'static str, args: &[&std::ffi::OsStr]) -> Result<Vec<u8>, MediaError> {
    tracing::debug!(tool, ?args, "running");
    let output = Command::new(tool)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|source| MediaError::ToolMissing { tool, source })?;

    if !output.status.success() {
        return Err(MediaError::ToolFailed {
            tool,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output.stdout)
}

macro_rules! os_args {
    ($($arg:expr),* $(,)?) => {
        &[$(std::ffi::OsStr::new($arg)),*]
    };
}

/// Probe the first video stream of `path`.
pub fn probe_video(path: &Path) -> Result<VideoInfo, MediaError> {
    let stdout = run(
        "ffprobe",
        os_args![
            "-v", "error",
            "-select_streams", "v:0",
            "-count_packets",
            "-show_entries", "stream=r_frame_rate,nb_frames,nb_read_packets",
            "-of", "json",
            path.as_os_str(),
        ],
    )?;
    parse_probe(&stdout)
}

fn parse_probe(json: &[u8]) -> Result<VideoInfo, MediaError> {
    let probe: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| MediaError::Probe(e.to_string()))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| MediaError::Probe("no video stream".into()))?;

    let fps = stream
        .r_frame_rate
        .as_deref()
        .and_then(parse_frame_rate)
        .unwrap_or(DEFAULT_FPS);

    // Containers often omit nb_frames; the packet count is exact.
    let frame_count = [stream.nb_read_packets, stream.nb_frames]
        .into_iter()
        .flatten()
        .find_map(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    Ok(VideoInfo {
        fps,
        frame_count,
    })
}

/// Parse ffprobe's rational rate ("30000/1001") or a plain number.
pub fn parse_frame_rate(rate: &str) -> Option<f64> {
    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => rate.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Decode a single frame (0-based) of a video or animated GIF.
pub fn read_video_frame(path: &Path, index: u64) -> Result<RgbImage, MediaError> {
    let filter = format!("select=eq(n\\,{index})");
    let stdout = run(
        "ffmpeg",
        os_args![
            "-v", "error",
            "-i", path.as_os_str(),
            "-vf", filter.as_str(),
            "-vframes", "1",
            "-f", "image2pipe",
            "-vcodec", "png",
            "-",
        ],
    )?;

    if stdout.is_empty() {
        return Err(MediaError::FrameOutOfRange {
            path: path.display().to_string(),
            index,
        });
    }

    let image = image::load_from_memory(&stdout).map_err(|source| MediaError::Decode {
        path: format!("{} [frame {index}]", path.display()),
        source,
    })?;
    Ok(image.to_rgb8())
}

/// Dump every frame of `video` into `dir` as numbered PNGs at `fps`.
pub fn extract_frames(video: &Path, dir: &Path, fps: f64) -> Result<Vec<PathBuf>, MediaError> {
    std::fs::create_dir_all(dir)?;
    let filter = format!("fps={fps}");
    let pattern = dir.join(FRAME_PATTERN);
    run(
        "ffmpeg",
        os_args![
            "-v", "error",
            "-i", video.as_os_str(),
            "-vf", filter.as_str(),
            "-pix_fmt", "rgb24",
            pattern.as_os_str(),
        ],
    )?;
    list_frames(dir)
}

/// Numbered PNG frames in `dir`, in order.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>, MediaError> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.extension().is_some_and(|e| e == "png")
                && p.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()))
        })
        .collect();
    frames.sort();
    Ok(frames)
}

/// Encode the numbered PNGs in `dir` into an H.264 video at `fps`.
pub fn encode_frames(dir: &Path, fps: f64, output: &Path) -> Result<(), MediaError> {
    let rate = fps.to_string();
    let pattern = dir.join(FRAME_PATTERN);
    run(
        "ffmpeg",
        os_args![
            "-v", "error",
            "-y",
            "-framerate", rate.as_str(),
            "-i", pattern.as_os_str(),
            "-c:v", "libx264",
            "-pix_fmt", "yuv420p",
            output.as_os_str(),
        ],
    )?;
    Ok(())
}

/// Mux the audio of `original` onto `video`, writing `output`.
///
/// A source without audio is not an error: the video is copied as-is.
pub fn restore_audio(original: &Path, video: &Path, output: &Path) -> Result<(), MediaError> {
    let muxed = run(
        "ffmpeg",
        os_args![
            "-v", "error",
            "-y",
            "-i", video.as_os_str(),
            "-i", original.as_os_str(),
            "-c:v", "copy",
            "-map", "0:v:0",
            "-map", "1:a:0",
            "-shortest",
            output.as_os_str(),
        ],
    );

    match muxed {
        Ok(_) => Ok(()),
        Err(MediaError::ToolFailed { stderr, .. }) => {
            tracing::warn!(%stderr, "audio restore failed, keeping silent video");
            std::fs::copy(video, output)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_parse_probe_prefers_packet_count() {
        let json = br#"{"streams":[{"r_frame_rate":"24/1","nb_frames":"N/A","nb_read_packets":"240"}]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(
            info,
            VideoInfo { fps: 24.0, frame_count: 240 }
        );
    }

    #[test]
    fn test_parse_probe_falls_back_to_nb_frames() {
        let json = br#"{"streams":[{"r_frame_rate":"0/0","nb_frames":"12"}]}"#;
        let info = parse_probe(json).unwrap();
        assert_eq!(info.frame_count, 12);
        assert_eq!(info.fps, DEFAULT_FPS);
    }

    #[test]
    fn test_parse_probe_no_stream() {
        assert!(matches!(parse_probe(br#"{"streams":[]}"#), Err(MediaError::Probe(_))));
        assert!(matches!(parse_probe(b"not json"), Err(MediaError::Probe(_))));
    }

    #[test]
    fn test_list_frames_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["000002.png", "000001.png", "000010.png", "cover.png", "000003.jpg"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let frames = list_frames(dir.path()).unwrap();
        let names: Vec<_> = frames
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["000001.png", "000002.png", "000010.png"]);
    }
}
