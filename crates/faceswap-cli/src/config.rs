use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Application configuration.
///
/// Layered as defaults → TOML file → `FACESWAP_*` environment → CLI flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// SCRFD score threshold for a detection.
    pub detection_threshold: f32,
    /// ONNX Runtime intra-op threads per model.
    pub intra_threads: usize,
    /// Frame processors applied in order.
    pub frame_processors: Vec<String>,
    /// Replace every face in the target instead of one chosen face.
    pub many_faces: bool,
    /// Render video at the source frame rate instead of 30 fps.
    pub keep_fps: bool,
    /// Carry the source audio track into rendered video.
    pub keep_audio: bool,
    /// Keep extracted video frames next to the output.
    pub keep_frames: bool,
    /// Write every extracted face crop here (debugging).
    pub export_dir: Option<PathBuf>,
    /// Side of the square face thumbnails.
    pub thumbnail_size: u32,
    pub preview_max_width: u32,
    pub preview_max_height: u32,
    /// Scratch space for video frames; system temp dir when unset.
    pub temp_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: faceswap_core::default_model_dir(),
            detection_threshold: 0.5,
            intra_threads: 2,
            frame_processors: vec![faceswap_core::swapper::SWAPPER_NAME.to_string()],
            many_faces: false,
            keep_fps: true,
            keep_audio: true,
            keep_frames: false,
            export_dir: None,
            thumbnail_size: 200,
            preview_max_width: 1200,
            preview_max_height: 700,
            temp_dir: None,
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location when it exists.
    /// Environment overrides are applied on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `FACESWAP_*` overrides. Unparseable values are ignored.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = var("FACESWAP_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("FACESWAP_EXPORT_DIR") {
            self.export_dir = Some(PathBuf::from(dir));
        }
        if let Some(dir) = var("FACESWAP_TEMP_DIR") {
            self.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(v) = var("FACESWAP_DET_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.detection_threshold = v;
        }
        if let Some(v) = var("FACESWAP_INTRA_THREADS").and_then(|v| v.parse().ok()) {
            self.intra_threads = v;
        }
        for (key, field) in [
            ("FACESWAP_MANY_FACES", &mut self.many_faces),
            ("FACESWAP_KEEP_FPS", &mut self.keep_fps),
            ("FACESWAP_KEEP_AUDIO", &mut self.keep_audio),
            ("FACESWAP_KEEP_FRAMES", &mut self.keep_frames),
        ] {
            if let Some(v) = var(key).and_then(|v| parse_flag(&v)) {
                *field = v;
            }
        }
    }

    pub fn analyser_options(&self) -> faceswap_core::AnalyserOptions {
        faceswap_core::AnalyserOptions {
            detection_threshold: self.detection_threshold,
            intra_threads: self.intra_threads,
        }
    }
}

/// `$XDG_CONFIG_HOME/faceswap/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
        .ok()?;
    Some(base.join("faceswap/config.toml"))
}

/// Accepts `1/0`, `true/false`, `on/off`, `yes/no`.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
