//! Selection session: the state behind "pick a source face, pick a target".
//!
//! One owned object holds the current path, candidates and selection for
//! each role. Every user action is a method call that runs to completion;
//! the most recent call wins.

use crate::config::{parse_flag, Config};
use faceswap_core::selection::detect_one;
use faceswap_core::{
    choose_targets, extract_faces, BoundingBox, DetectedFace, Detector, DetectorError, FaceCrop,
    ProcessorChain, ProcessorError, Sex, SimilarityError,
};
use faceswap_media::{load_image, thumbnail, video, MediaError, MediaKind};
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Source,
    Target,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => f.write_str("source"),
            Role::Target => f.write_str("target"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{path} is not a usable {role} file")]
    UnsupportedMedia { role: Role, path: PathBuf },
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error(transparent)]
    Processor(#[from] ProcessorError),
    #[error("no face choice is pending")]
    NoPendingChoice,
    #[error("face {index} does not exist ({count} candidates)")]
    NoSuchFace { index: usize, count: usize },
    #[error("select a {0} first")]
    Missing(Role),
    #[error("no face found in the source image")]
    NoSourceFace,
    #[error("unknown option: {0}")]
    UnknownOption(String),
    #[error("frame {frame} is past the end of the target ({count} frames)")]
    FrameOutOfRange { frame: u64, count: u64 },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Advisory distance between the source and target picks.
pub type Distance = Result<f32, SimilarityError>;

/// Where a selected face was found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FrameRef {
    pub path: PathBuf,
    pub frame: u64,
}

/// The chosen face for one role.
///
/// Built only from a [`FaceCrop`], so `preview` is always the crop of
/// `face`.
#[derive(Debug, Clone)]
pub struct FaceSelection {
    pub role: Role,
    pub face: DetectedFace,
    pub preview: RgbImage,
    pub origin: FrameRef,
}

impl FaceSelection {
    fn from_crop(role: Role, crop: &FaceCrop, origin: FrameRef, thumbnail_size: u32) -> Self {
        Self {
            role,
            face: crop.face.clone(),
            preview: thumbnail::fit(&crop.pixels, thumbnail_size, thumbnail_size),
            origin,
        }
    }
}

/// What the user sees for each candidate face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceSummary {
    pub index: usize,
    pub score: f32,
    pub sex: Sex,
    pub age: u8,
    pub bbox: BoundingBox,
}

impl FaceSummary {
    pub fn new(index: usize, face: &DetectedFace) -> Self {
        Self {
            index,
            score: face.detection_score,
            sex: face.sex,
            age: face.age,
            bbox: face.bbox,
        }
    }

    pub fn list(crops: &[FaceCrop]) -> Vec<Self> {
        crops.iter().enumerate().map(|(i, c)| Self::new(i, &c.face)).collect()
    }
}

impl fmt::Display for FaceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] Score: {:.3} - Sex: {} - Age: {} - x: {:.0}..{:.0}",
            self.index, self.score, self.sex, self.age, self.bbox.x0, self.bbox.x1
        )
    }
}

#[derive(Debug)]
pub enum SelectOutcome {
    /// Exactly one face (or a resolved choice) became the role's selection.
    Selected {
        role: Role,
        face: FaceSummary,
        distance: Option<Distance>,
    },
    /// Several faces; call [`Session::choose_face`] with one of them. The
    /// other role's pending choice, if any, stays open.
    NeedsChoice { role: Role, faces: Vec<FaceSummary> },
    /// Nothing usable was found; the role's path has been cleared.
    NoFace { role: Role },
    /// Target accepted in many-faces mode, where no single face is picked.
    AcceptedAll,
}

/// Toggles that change how frames are processed and rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Options {
    pub many_faces: bool,
    pub keep_fps: bool,
    pub keep_audio: bool,
    pub keep_frames: bool,
}

impl Options {
    pub fn from_config(config: &Config) -> Self {
        Self {
            many_faces: config.many_faces,
            keep_fps: config.keep_fps,
            keep_audio: config.keep_audio,
            keep_frames: config.keep_frames,
        }
    }

    fn field(&mut self, name: &str) -> Option<&mut bool> {
        match name.replace('-', "_").as_str() {
            "many_faces" => Some(&mut self.many_faces),
            "keep_fps" => Some(&mut self.keep_fps),
            "keep_audio" => Some(&mut self.keep_audio),
            "keep_frames" => Some(&mut self.keep_frames),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Slot {
    path: Option<PathBuf>,
    kind: Option<MediaKind>,
    recent_dir: Option<PathBuf>,
    candidates: Vec<FaceCrop>,
    selection: Option<FaceSelection>,
    thumbnail: Option<RgbImage>,
    /// Candidates are waiting for `choose_face`.
    pending: bool,
    /// Video length reported by ffprobe when the path was accepted.
    frame_count: Option<u64>,
}

impl Slot {
    fn clear(&mut self) {
        self.path = None;
        self.kind = None;
        self.candidates.clear();
        self.selection = None;
        self.thumbnail = None;
        self.pending = false;
        self.frame_count = None;
    }
}

/// Read-only snapshot for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub source: Option<PathBuf>,
    pub target: Option<PathBuf>,
    pub source_selected: bool,
    pub target_selected: bool,
    /// Roles with an open face choice, most recent first.
    pub pending: Vec<Role>,
    pub target_frames: Option<u64>,
    pub options: Options,
    pub processors: Vec<String>,
    pub distance: Option<f32>,
}

pub struct Session<D> {
    detector: D,
    processors: ProcessorChain,
    options: Options,
    thumbnail_size: u32,
    preview_max: (u32, u32),
    export_dir: Option<PathBuf>,
    temp_dir: Option<PathBuf>,
    source: Slot,
    target: Slot,
    /// Role whose choice opened last; the default for `choose_face(None, ..)`.
    recent_pending: Option<Role>,
    output_dir: Option<PathBuf>,
}

impl<D: Detector> Session<D> {
    pub fn new(detector: D, processors: ProcessorChain, config: &Config) -> Self {
        Self {
            detector,
            processors,
            options: Options::from_config(config),
            thumbnail_size: config.thumbnail_size,
            preview_max: (config.preview_max_width, config.preview_max_height),
            export_dir: config.export_dir.clone(),
            temp_dir: config.temp_dir.clone(),
            source: Slot::default(),
            target: Slot::default(),
            recent_pending: None,
            output_dir: None,
        }
    }

    fn slot(&self, role: Role) -> &Slot {
        match role {
            Role::Source => &self.source,
            Role::Target => &self.target,
        }
    }

    fn slot_mut(&mut self, role: Role) -> &mut Slot {
        match role {
            Role::Source => &mut self.source,
            Role::Target => &mut self.target,
        }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn set_option(&mut self, name: &str, value: &str) -> Result<Options, SessionError> {
        let value = parse_flag(value).ok_or_else(|| SessionError::UnknownOption(format!("{name}={value}")))?;
        let field = self
            .options
            .field(name)
            .ok_or_else(|| SessionError::UnknownOption(name.to_string()))?;
        *field = value;
        tracing::debug!(option = name, value, "option changed");
        Ok(self.options)
    }

    pub fn path(&self, role: Role) -> Option<&Path> {
        self.slot(role).path.as_deref()
    }

    pub fn media_kind(&self, role: Role) -> Option<MediaKind> {
        self.slot(role).kind
    }

    pub fn recent_dir(&self, role: Role) -> Option<&Path> {
        self.slot(role).recent_dir.as_deref()
    }

    pub fn selection(&self, role: Role) -> Option<&FaceSelection> {
        self.slot(role).selection.as_ref()
    }

    /// Image shown for the role: the selected face, or the whole target in
    /// many-faces mode.
    pub fn thumbnail(&self, role: Role) -> Option<&RgbImage> {
        let slot = self.slot(role);
        slot.selection.as_ref().map(|s| &s.preview).or(slot.thumbnail.as_ref())
    }

    /// Roles waiting for a face choice, most recent first.
    pub fn pending(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = [Role::Source, Role::Target]
            .into_iter()
            .filter(|&r| self.slot(r).pending)
            .collect();
        roles.sort_by_key(|&r| Some(r) != self.recent_pending);
        roles
    }

    fn pending_role(&self, role: Option<Role>) -> Result<Role, SessionError> {
        match role {
            Some(role) if self.slot(role).pending => Ok(role),
            Some(_) => Err(SessionError::NoPendingChoice),
            None => self.pending().first().copied().ok_or(SessionError::NoPendingChoice),
        }
    }

    pub fn candidates(&self, role: Role) -> Vec<FaceSummary> {
        FaceSummary::list(&self.slot(role).candidates)
    }

    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }

    pub fn status(&self) -> Status {
        Status {
            source: self.source.path.clone(),
            target: self.target.path.clone(),
            source_selected: self.source.selection.is_some(),
            target_selected: self.target.selection.is_some(),
            pending: self.pending(),
            target_frames: self.target.frame_count,
            options: self.options,
            processors: self.processors.names().into_iter().map(String::from).collect(),
            distance: self.distance().and_then(Result::ok),
        }
    }

    /// Pick the source image. Only still images are accepted.
    pub fn select_source(&mut self, path: &Path) -> Result<SelectOutcome, SessionError> {
        if MediaKind::classify(path) != Some(MediaKind::Image) {
            return Err(self.reject(Role::Source, path));
        }
        let frame = load_image(path)?;
        self.accept(Role::Source, path, MediaKind::Image, frame)
    }

    /// Pick the target image or video. Videos (and GIFs) are inspected on
    /// their first frame.
    pub fn select_target(&mut self, path: &Path) -> Result<SelectOutcome, SessionError> {
        let Some(kind) = MediaKind::classify(path) else {
            return Err(self.reject(Role::Target, path));
        };
        let frame_count = match kind {
            MediaKind::Video => Some(video::probe_video(path)?.frame_count).filter(|&n| n > 0),
            MediaKind::Image => None,
        };
        let frame = load_frame(path, kind, 0)?;

        if self.options.many_faces {
            let thumb = thumbnail::fit(&frame, self.thumbnail_size, self.thumbnail_size);
            let slot = self.slot_mut(Role::Target);
            slot.clear();
            slot.path = Some(path.to_path_buf());
            slot.kind = Some(kind);
            slot.recent_dir = path.parent().map(Path::to_path_buf);
            slot.thumbnail = Some(thumb);
            slot.frame_count = frame_count;
            tracing::info!(path = %path.display(), "target accepted for all faces");
            return Ok(SelectOutcome::AcceptedAll);
        }

        let outcome = self.accept(Role::Target, path, kind, frame)?;
        if self.target.path.is_some() {
            self.target.frame_count = frame_count;
        }
        Ok(outcome)
    }

    fn reject(&mut self, role: Role, path: &Path) -> SessionError {
        self.slot_mut(role).clear();
        tracing::warn!(%role, path = %path.display(), "unsupported media");
        SessionError::UnsupportedMedia {
            role,
            path: path.to_path_buf(),
        }
    }

    fn accept(
        &mut self,
        role: Role,
        path: &Path,
        kind: MediaKind,
        frame: RgbImage,
    ) -> Result<SelectOutcome, SessionError> {
        let crops = extract_faces(&mut self.detector, &frame)?;
        self.export(&crops);

        let slot = self.slot_mut(role);
        slot.clear();
        slot.recent_dir = path.parent().map(Path::to_path_buf);

        match crops.len() {
            0 => {
                tracing::info!(%role, path = %path.display(), "no face found");
                Ok(SelectOutcome::NoFace { role })
            }
            1 => {
                slot.path = Some(path.to_path_buf());
                slot.kind = Some(kind);
                slot.candidates = crops;
                self.select_candidate(role, 0)
            }
            n => {
                tracing::info!(%role, faces = n, "multiple faces, waiting for a choice");
                slot.path = Some(path.to_path_buf());
                slot.kind = Some(kind);
                slot.candidates = crops;
                slot.pending = true;
                self.recent_pending = Some(role);
                Ok(SelectOutcome::NeedsChoice {
                    role,
                    faces: self.candidates(role),
                })
            }
        }
    }

    fn export(&self, crops: &[FaceCrop]) {
        let Some(dir) = &self.export_dir else {
            return;
        };
        if let Err(err) = faceswap_media::export::export_crops(crops.iter().map(|c| &c.pixels), dir) {
            tracing::warn!(error = %err, dir = %dir.display(), "face crop export failed");
        }
    }

    fn select_candidate(&mut self, role: Role, index: usize) -> Result<SelectOutcome, SessionError> {
        let thumbnail_size = self.thumbnail_size;
        let slot = self.slot_mut(role);
        let count = slot.candidates.len();
        let crop = slot
            .candidates
            .get(index)
            .ok_or(SessionError::NoSuchFace { index, count })?;
        let path = slot.path.clone().ok_or(SessionError::Missing(role))?;

        let selection = FaceSelection::from_crop(role, crop, FrameRef { path, frame: 0 }, thumbnail_size);
        let face = FaceSummary::new(index, &selection.face);
        slot.selection = Some(selection);

        let distance = match role {
            Role::Target => self.distance(),
            Role::Source => None,
        };
        match &distance {
            Some(Ok(d)) => tracing::info!(distance = d, "similarity distance between source and target"),
            Some(Err(e)) => tracing::warn!(error = %e, "similarity distance undefined"),
            None => {}
        }

        tracing::info!(%role, index, score = face.score, "face selected");
        Ok(SelectOutcome::Selected { role, face, distance })
    }

    /// Resolve a pending multi-face choice for `role`, or for the most
    /// recently opened choice when `role` is `None`. An invalid index leaves
    /// the choice pending.
    pub fn choose_face(&mut self, role: Option<Role>, index: usize) -> Result<SelectOutcome, SessionError> {
        let role = self.pending_role(role)?;
        let outcome = self.select_candidate(role, index)?;
        self.slot_mut(role).pending = false;
        Ok(outcome)
    }

    /// Drop a pending choice; the role keeps its path but has no selection.
    pub fn cancel_choice(&mut self, role: Option<Role>) -> Result<Role, SessionError> {
        let role = self.pending_role(role)?;
        self.slot_mut(role).pending = false;
        Ok(role)
    }

    /// Advisory cosine distance between the two current selections.
    pub fn distance(&self) -> Option<Distance> {
        let source = self.source.selection.as_ref()?;
        let target = self.target.selection.as_ref()?;
        Some(source.face.embedding.distance(&target.face.embedding))
    }

    /// The face to swap in: the source selection, or the leftmost face of
    /// the source image when nothing was picked.
    pub fn source_face(&mut self) -> Result<DetectedFace, SessionError> {
        if let Some(selection) = &self.source.selection {
            return Ok(selection.face.clone());
        }
        let path = self.source.path.clone().ok_or(SessionError::Missing(Role::Source))?;
        let image = load_image(&path)?;
        detect_one(&mut self.detector, &image)?.ok_or(SessionError::NoSourceFace)
    }

    /// Run the processors over one target frame.
    pub fn process_frame(
        &mut self,
        source: &DetectedFace,
        frame: RgbImage,
        origin: &FrameRef,
    ) -> Result<RgbImage, SessionError> {
        let exact = self
            .target
            .selection
            .as_ref()
            .filter(|s| !self.options.many_faces && &s.origin == origin)
            .map(|s| s.face.clone());

        let targets = match exact {
            Some(face) => vec![face],
            None => {
                let faces = self.detector.detect(&frame)?;
                let reference = self.target.selection.as_ref().map(|s| &s.face.embedding);
                choose_targets(faces, reference, self.options.many_faces)
            }
        };

        Ok(self.processors.process(source, &targets, frame)?)
    }

    /// Full-resolution processed target frame.
    pub fn render_frame(&mut self, frame: u64) -> Result<RgbImage, SessionError> {
        let target = self.target.path.clone().ok_or(SessionError::Missing(Role::Target))?;
        let kind = self.target.kind.ok_or(SessionError::Missing(Role::Target))?;
        if let Some(count) = self.target.frame_count {
            if kind == MediaKind::Video && frame >= count {
                return Err(SessionError::FrameOutOfRange { frame, count });
            }
        }
        let source = self.source_face()?;

        let frame = if kind == MediaKind::Image { 0 } else { frame };
        let image = load_frame(&target, kind, frame)?;
        self.process_frame(&source, image, &FrameRef { path: target, frame })
    }

    /// Processed frame scaled to fit the preview area.
    pub fn preview(&mut self, frame: u64) -> Result<RgbImage, SessionError> {
        if self.source.path.is_none() {
            return Err(SessionError::Missing(Role::Source));
        }
        let rendered = self.render_frame(frame)?;
        let (w, h) = self.preview_max;
        Ok(thumbnail::contain(&rendered, w, h))
    }

    /// Default output location for the current target.
    pub fn suggest_output(&self) -> Option<PathBuf> {
        let kind = self.target.kind?;
        let dir = self
            .output_dir
            .clone()
            .or_else(|| self.target.recent_dir.clone())
            .unwrap_or_default();
        Some(dir.join(kind.default_output_name()))
    }

    pub(crate) fn remember_output(&mut self, output: &Path) {
        self.output_dir = output.parent().map(Path::to_path_buf);
    }
}

pub(crate) fn load_frame(path: &Path, kind: MediaKind, frame: u64) -> Result<RgbImage, MediaError> {
    match kind {
        MediaKind::Image => load_image(path),
        MediaKind::Video => video::read_video_frame(path, frame),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use faceswap_core::{Embedding, FrameProcessor};
    use image::Rgb;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    pub(crate) fn face(x0: f32, tag: f32) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox { x0, y0: 4.0, x1: x0 + 8.0, y1: 12.0 },
            landmarks: [(0.0, 0.0); 5],
            embedding: Embedding::new(vec![tag, 1.0]),
            detection_score: 0.8,
            age: 40,
            sex: Sex::Male,
        }
    }

    /// Faces keyed by image width, so each test image has its own faces.
    pub(crate) struct WidthDetector {
        pub faces: HashMap<u32, Vec<DetectedFace>>,
        pub calls: Arc<Mutex<usize>>,
    }

    impl Detector for WidthDetector {
        fn detect(&mut self, image: &RgbImage) -> Result<Vec<DetectedFace>, DetectorError> {
            *self.calls.lock().unwrap() += 1;
            Ok(self.faces.get(&image.width()).cloned().unwrap_or_default())
        }
    }

    /// Paints each target box with the source tag as the red value.
    pub(crate) struct Paint {
        pub seen: Arc<Mutex<Vec<Vec<f32>>>>,
    }

    impl FrameProcessor for Paint {
        fn name(&self) -> &str {
            "paint"
        }

        fn process(
            &mut self,
            source: &DetectedFace,
            targets: &[DetectedFace],
            mut frame: RgbImage,
        ) -> Result<RgbImage, ProcessorError> {
            self.seen
                .lock()
                .unwrap()
                .push(targets.iter().map(|t| t.bbox.x0).collect());
            let red = source.embedding.values[0] as u8;
            for t in targets {
                let (x, y, w, h) = t.bbox.clamped_rect(frame.width(), frame.height());
                for py in y..y + h {
                    for px in x..x + w {
                        frame.put_pixel(px, py, Rgb([red, 0, 0]));
                    }
                }
            }
            Ok(frame)
        }
    }

    pub(crate) struct Fixture {
        pub dir: tempfile::TempDir,
        pub seen: Arc<Mutex<Vec<Vec<f32>>>>,
        pub calls: Arc<Mutex<usize>>,
        pub session: Session<WidthDetector>,
    }

    impl Fixture {
        pub fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }
    }

    /// Images: solo.png (one face), group.png (three faces), empty.png (none).
    pub(crate) fn fixture(config: Config) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (name, width) in [("solo.png", 32), ("group.png", 48), ("empty.png", 16)] {
            let mut img = RgbImage::new(width, 16);
            for (x, _, px) in img.enumerate_pixels_mut() {
                *px = Rgb([0, x as u8, 100]);
            }
            img.save(dir.path().join(name)).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "hi").unwrap();

        let faces: HashMap<u32, Vec<DetectedFace>> = [
            (32, vec![face(10.0, 7.0)]),
            (48, vec![face(30.0, 3.0), face(2.0, 1.0), face(16.0, 2.0)]),
        ]
        .into_iter()
        .collect();

        let calls = Arc::new(Mutex::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let detector = WidthDetector { faces, calls: calls.clone() };
        let chain = ProcessorChain::new(vec![Box::new(Paint { seen: seen.clone() })]);

        Fixture {
            dir,
            seen,
            calls,
            session: Session::new(detector, chain, &config),
        }
    }

    fn small_config() -> Config {
        Config {
            thumbnail_size: 8,
            preview_max_width: 24,
            preview_max_height: 24,
            ..Config::default()
        }
    }

    #[test]
    fn test_single_face_source_auto_selected() {
        let mut fx = fixture(small_config());
        let path = fx.path("solo.png");

        let outcome = fx.session.select_source(&path).unwrap();

        assert!(matches!(outcome, SelectOutcome::Selected { role: Role::Source, distance: None, .. }));
        let sel = fx.session.selection(Role::Source).unwrap();
        assert_eq!(sel.face, face(10.0, 7.0));
        assert_eq!(sel.preview.dimensions(), (8, 8));
        assert_eq!(sel.origin, FrameRef { path: path.clone(), frame: 0 });
        assert_eq!(fx.session.path(Role::Source), Some(path.as_path()));
        assert_eq!(fx.session.recent_dir(Role::Source), Some(fx.dir.path()));
    }

    #[test]
    fn test_multi_face_source_waits_for_choice() {
        let mut fx = fixture(small_config());

        let outcome = fx.session.select_source(&fx.path("group.png")).unwrap();

        let SelectOutcome::NeedsChoice { role, faces } = outcome else {
            panic!("expected a pending choice");
        };
        assert_eq!(role, Role::Source);
        let xs: Vec<f32> = faces.iter().map(|f| f.bbox.x0).collect();
        assert_eq!(xs, vec![2.0, 16.0, 30.0]);
        assert_eq!(fx.session.pending(), vec![Role::Source]);
        assert!(fx.session.selection(Role::Source).is_none());
    }

    #[test]
    fn test_choice_pairs_face_with_its_crop() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("group.png")).unwrap();

        fx.session.choose_face(None, 1).unwrap();

        let sel = fx.session.selection(Role::Source).unwrap();
        assert_eq!(sel.face.bbox.x0, 16.0);
        // Crop of x 16..24 has green = x; a different face would differ.
        let expected_crop = image::imageops::crop_imm(
            &load_image(&fx.path("group.png")).unwrap(),
            16,
            4,
            8,
            8,
        )
        .to_image();
        assert_eq!(sel.preview, thumbnail::fit(&expected_crop, 8, 8));
        assert_eq!(fx.session.pending(), Vec::<Role>::new());
    }

    #[test]
    fn test_new_pick_replaces_selection() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("group.png")).unwrap();
        fx.session.choose_face(None, 0).unwrap();
        fx.session.select_source(&fx.path("group.png")).unwrap();
        // A new path clears the previous pick until a choice is made.
        assert!(fx.session.selection(Role::Source).is_none());
        fx.session.choose_face(None, 2).unwrap();

        assert_eq!(fx.session.selection(Role::Source).unwrap().face.bbox.x0, 30.0);
    }

    #[test]
    fn test_choose_without_pending() {
        let mut fx = fixture(small_config());
        assert!(matches!(fx.session.choose_face(None, 0), Err(SessionError::NoPendingChoice)));
        assert!(matches!(fx.session.cancel_choice(None), Err(SessionError::NoPendingChoice)));
    }

    #[test]
    fn test_choose_out_of_range_keeps_pending() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("group.png")).unwrap();

        let err = fx.session.choose_face(None, 3).unwrap_err();

        assert!(matches!(err, SessionError::NoSuchFace { index: 3, count: 3 }));
        assert_eq!(fx.session.pending(), vec![Role::Source]);
    }

    #[test]
    fn test_cancel_choice() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("group.png")).unwrap();
        fx.session.cancel_choice(None).unwrap();
        assert_eq!(fx.session.pending(), Vec::<Role>::new());
        assert!(fx.session.selection(Role::Source).is_none());
        assert!(fx.session.path(Role::Source).is_some());
    }

    #[test]
    fn test_no_face_clears_path() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("solo.png")).unwrap();

        let outcome = fx.session.select_source(&fx.path("empty.png")).unwrap();

        assert!(matches!(outcome, SelectOutcome::NoFace { role: Role::Source }));
        assert!(fx.session.path(Role::Source).is_none());
        assert!(fx.session.selection(Role::Source).is_none());
    }

    #[test]
    fn test_unsupported_media_is_an_error() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("solo.png")).unwrap();

        let err = fx.session.select_source(&fx.path("notes.txt")).unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedMedia { role: Role::Source, .. }));
        assert!(fx.session.path(Role::Source).is_none());
        assert!(fx.session.selection(Role::Source).is_none());

        // A video is never a source.
        let err = fx.session.select_source(&fx.path("clip.mp4")).unwrap_err();
        assert!(matches!(err, SessionError::UnsupportedMedia { .. }));
        assert_eq!(*fx.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_target_selection_reports_distance() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("solo.png")).unwrap();
        fx.session.select_target(&fx.path("group.png")).unwrap();

        let SelectOutcome::Selected { distance, .. } = fx.session.choose_face(None, 0).unwrap() else {
            panic!("expected a selection");
        };
        // source [7, 1] vs target [1, 1]
        let expected = 1.0 - 8.0 / (50f32.sqrt() * 2f32.sqrt());
        assert!((distance.unwrap().unwrap() - expected).abs() < 1e-5);
        assert!(fx.session.distance().is_some());
    }

    #[test]
    fn test_many_faces_target_has_no_selection() {
        let mut config = small_config();
        config.many_faces = true;
        let mut fx = fixture(config);

        let outcome = fx.session.select_target(&fx.path("group.png")).unwrap();

        assert!(matches!(outcome, SelectOutcome::AcceptedAll));
        assert!(fx.session.selection(Role::Target).is_none());
        assert_eq!(fx.session.thumbnail(Role::Target).unwrap().dimensions(), (8, 8));
        assert_eq!(*fx.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_preview_requires_both_paths() {
        let mut fx = fixture(small_config());
        assert!(matches!(fx.session.preview(0), Err(SessionError::Missing(Role::Source))));
        fx.session.select_source(&fx.path("solo.png")).unwrap();
        assert!(matches!(fx.session.preview(0), Err(SessionError::Missing(Role::Target))));
    }

    #[test]
    fn test_preview_swaps_selected_target_face() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("solo.png")).unwrap();
        fx.session.select_target(&fx.path("group.png")).unwrap();
        fx.session.choose_face(None, 2).unwrap();

        let full = fx.session.render_frame(0).unwrap();
        assert_eq!(*fx.seen.lock().unwrap(), vec![vec![30.0]]);
        assert_eq!(full.get_pixel(33, 8), &Rgb([7, 0, 0]));
        assert_eq!(full.get_pixel(5, 8), &Rgb([0, 5, 100]));

        let preview = fx.session.preview(0).unwrap();
        assert_eq!(preview.dimensions(), (24, 8));
    }

    #[test]
    fn test_preview_many_faces_swaps_all() {
        let mut config = small_config();
        config.many_faces = true;
        let mut fx = fixture(config);
        fx.session.select_source(&fx.path("solo.png")).unwrap();
        fx.session.select_target(&fx.path("group.png")).unwrap();

        fx.session.render_frame(0).unwrap();

        let seen = fx.seen.lock().unwrap();
        assert_eq!(seen[0].len(), 3);
    }

    #[test]
    fn test_preview_without_source_pick_uses_leftmost() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("group.png")).unwrap();
        fx.session.cancel_choice(None).unwrap();
        fx.session.select_target(&fx.path("solo.png")).unwrap();

        let full = fx.session.render_frame(0).unwrap();
        // Leftmost source face has tag 1.
        assert_eq!(full.get_pixel(12, 8), &Rgb([1, 0, 0]));
    }

    #[test]
    fn test_set_option() {
        let mut fx = fixture(small_config());
        let opts = fx.session.set_option("many-faces", "on").unwrap();
        assert!(opts.many_faces);
        assert!(matches!(
            fx.session.set_option("turbo", "on"),
            Err(SessionError::UnknownOption(_))
        ));
        assert!(matches!(
            fx.session.set_option("keep_fps", "sometimes"),
            Err(SessionError::UnknownOption(_))
        ));
    }

    #[test]
    fn test_suggest_output() {
        let mut fx = fixture(small_config());
        assert!(fx.session.suggest_output().is_none());
        fx.session.select_target(&fx.path("solo.png")).unwrap();
        assert_eq!(fx.session.suggest_output(), Some(fx.path("output.png")));

        fx.session.remember_output(Path::new("/renders/x.png"));
        assert_eq!(fx.session.suggest_output(), Some(PathBuf::from("/renders/output.png")));
    }

    #[test]
    fn test_export_dir_receives_crops() {
        let export = tempfile::tempdir().unwrap();
        let mut config = small_config();
        config.export_dir = Some(export.path().to_path_buf());
        let mut fx = fixture(config);

        fx.session.select_source(&fx.path("group.png")).unwrap();

        for i in 0..3 {
            assert!(export.path().join(format!("{i}.png")).exists());
        }
    }

    #[test]
    fn test_status_snapshot() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("solo.png")).unwrap();
        fx.session.select_target(&fx.path("solo.png")).unwrap();

        let status = fx.session.status();
        assert!(status.source_selected && status.target_selected);
        assert_eq!(status.processors, vec!["paint".to_string()]);
        assert!(status.distance.unwrap().abs() < 1e-6);
    }

    #[test]
    fn test_choices_for_both_roles_stay_open() {
        let mut fx = fixture(small_config());
        let group = fx.path("group.png");
        fx.session.select_source(&group).unwrap();
        fx.session.select_target(&group).unwrap();
        assert_eq!(fx.session.pending(), vec![Role::Target, Role::Source]);

        // Without a role the most recent choice is resolved.
        let outcome = fx.session.choose_face(None, 2).unwrap();
        assert!(matches!(outcome, SelectOutcome::Selected { role: Role::Target, .. }));
        assert_eq!(fx.session.pending(), vec![Role::Source]);
        assert_eq!(fx.session.status().pending, vec![Role::Source]);

        fx.session.choose_face(None, 1).unwrap();
        assert_eq!(fx.session.selection(Role::Source).unwrap().face.bbox.x0, 16.0);
        assert_eq!(fx.session.selection(Role::Target).unwrap().face.bbox.x0, 30.0);
        assert!(fx.session.pending().is_empty());
    }

    #[test]
    fn test_choose_face_for_explicit_role() {
        let mut fx = fixture(small_config());
        let group = fx.path("group.png");
        fx.session.select_source(&group).unwrap();
        fx.session.select_target(&group).unwrap();

        let outcome = fx.session.choose_face(Some(Role::Source), 0).unwrap();
        assert!(matches!(outcome, SelectOutcome::Selected { role: Role::Source, .. }));
        assert_eq!(fx.session.pending(), vec![Role::Target]);

        assert!(matches!(
            fx.session.choose_face(Some(Role::Source), 0),
            Err(SessionError::NoPendingChoice)
        ));
        assert_eq!(fx.session.cancel_choice(Some(Role::Target)).unwrap(), Role::Target);
        assert!(fx.session.pending().is_empty());
    }

    #[test]
    fn test_new_path_closes_only_its_own_choice() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("group.png")).unwrap();
        fx.session.select_target(&fx.path("solo.png")).unwrap();
        assert_eq!(fx.session.pending(), vec![Role::Source]);

        fx.session.select_source(&fx.path("solo.png")).unwrap();
        assert!(fx.session.pending().is_empty());
    }

    #[test]
    fn test_video_frame_past_end_is_rejected() {
        let mut fx = fixture(small_config());
        fx.session.select_source(&fx.path("solo.png")).unwrap();
        fx.session.target.path = Some(fx.path("clip.mp4"));
        fx.session.target.kind = Some(MediaKind::Video);
        fx.session.target.frame_count = Some(10);

        assert!(matches!(
            fx.session.render_frame(10),
            Err(SessionError::FrameOutOfRange { frame: 10, count: 10 })
        ));
        assert!(matches!(
            fx.session.preview(25),
            Err(SessionError::FrameOutOfRange { frame: 25, count: 10 })
        ));
        assert_eq!(fx.session.status().target_frames, Some(10));
    }

    #[test]
    fn test_thumbnail_prefers_selected_face() {
        let mut fx = fixture(small_config());
        assert!(fx.session.thumbnail(Role::Source).is_none());
        fx.session.select_source(&fx.path("solo.png")).unwrap();
        let selected = fx.session.selection(Role::Source).unwrap().preview.clone();
        assert_eq!(fx.session.thumbnail(Role::Source), Some(&selected));
    }
}
