use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use faceswap_core::{build_chain, extract_faces, Detector, FaceAnalyser, ProcessorChain};
use faceswap_media::{load_image, save_image};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod render;
mod session;
mod shell;

use config::Config;
use session::{FaceSummary, Role, SelectOutcome, Session};

#[derive(Parser)]
#[command(name = "faceswap", about = "Swap a chosen face into an image or video")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/faceswap/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Directory containing the ONNX models
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Face detection score threshold
    #[arg(long, global = true)]
    threshold: Option<f32>,
    /// Frame processor to apply; repeat to chain
    #[arg(long = "processor", global = true)]
    processors: Vec<String>,
    #[command(flatten)]
    toggles: Toggles,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Toggles {
    /// Swap every face in the target
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    many_faces: Option<bool>,
    /// Keep the target frame rate
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    keep_fps: Option<bool>,
    /// Keep the target audio
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    keep_audio: Option<bool>,
    /// Keep extracted frames next to the output
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    keep_frames: Option<bool>,
}

#[derive(Args)]
struct FacePicks {
    /// Source face index, left to right (default: leftmost)
    #[arg(long)]
    source_face: Option<usize>,
    /// Target face index, left to right (default: leftmost)
    #[arg(long)]
    target_face: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the faces in an image, left to right
    Faces {
        image: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        /// Write each face crop to DIR as N.png
        #[arg(long, value_name = "DIR")]
        export: Option<PathBuf>,
    },
    /// Cosine distance between a source face and a target face
    Compare {
        source: PathBuf,
        target: PathBuf,
        #[command(flatten)]
        picks: FacePicks,
    },
    /// Write one processed target frame
    Preview {
        source: PathBuf,
        target: PathBuf,
        /// Frame index for video targets
        #[arg(long, default_value_t = 0)]
        frame: u64,
        #[command(flatten)]
        picks: FacePicks,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Render the swapped image or video
    Run {
        source: PathBuf,
        target: PathBuf,
        #[command(flatten)]
        picks: FacePicks,
        /// Output file (default: output.png / output.mp4 next to the target)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Interactive session
    Shell,
    /// Show which model files are expected and present
    Models,
}

impl Cli {
    fn apply(&self, config: &mut Config) {
        if let Some(dir) = &self.model_dir {
            config.model_dir = dir.clone();
        }
        if let Some(t) = self.threshold {
            config.detection_threshold = t;
        }
        if !self.processors.is_empty() {
            config.frame_processors = self.processors.clone();
        }
        let t = &self.toggles;
        for (flag, field) in [
            (t.many_faces, &mut config.many_faces),
            (t.keep_fps, &mut config.keep_fps),
            (t.keep_audio, &mut config.keep_audio),
            (t.keep_frames, &mut config.keep_frames),
        ] {
            if let Some(v) = flag {
                *field = v;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref()).context("loading config")?;
    cli.apply(&mut config);
    tracing::debug!(?config, "effective config");

    match cli.command {
        Commands::Shell => {
            let session = open_session(&config, true)?;
            let engine = engine::spawn_engine(session)?;
            shell::run_shell(engine).await
        }
        Commands::Models => {
            print_models(&config.model_dir);
            Ok(())
        }
        Commands::Faces { image, json, export } => {
            blocking(move || {
                let mut analyser = load_analyser(&config)?;
                list_faces(&mut analyser, &image, json, export.as_deref())
            })
            .await
        }
        Commands::Compare { source, target, picks } => {
            blocking(move || compare(&config, &source, &target, &picks)).await
        }
        Commands::Preview { source, target, frame, picks, output } => {
            blocking(move || preview(&config, &source, &target, frame, &picks, &output)).await
        }
        Commands::Run { source, target, picks, output } => {
            blocking(move || run(&config, &source, &target, &picks, output)).await
        }
    }
}

/// Run synchronous session work off the async runtime.
async fn blocking<F>(work: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(work).await.context("worker task failed")?
}

fn load_analyser(config: &Config) -> Result<FaceAnalyser> {
    FaceAnalyser::load(&config.model_dir, &config.analyser_options())
        .with_context(|| format!("loading face models from {}", config.model_dir.display()))
}

fn open_session(config: &Config, with_processors: bool) -> Result<Session<FaceAnalyser>> {
    let analyser = load_analyser(config)?;
    let chain = if with_processors {
        build_chain(&config.frame_processors, &config.model_dir, config.intra_threads)
            .context("loading frame processors")?
    } else {
        ProcessorChain::default()
    };
    Ok(Session::new(analyser, chain, config))
}

fn compare(config: &Config, source: &Path, target: &Path, picks: &FacePicks) -> Result<()> {
    let mut session = open_session(config, false)?;
    pick(&mut session, Role::Source, source, picks.source_face)?;
    pick(&mut session, Role::Target, target, picks.target_face)?;
    match session.distance() {
        Some(d) => println!("{}", shell::format_distance(&d)),
        None => bail!("both images need a selected face"),
    }
    Ok(())
}

fn preview(
    config: &Config,
    source: &Path,
    target: &Path,
    frame: u64,
    picks: &FacePicks,
    output: &Path,
) -> Result<()> {
    let mut session = open_session(config, true)?;
    pick(&mut session, Role::Source, source, picks.source_face)?;
    pick(&mut session, Role::Target, target, picks.target_face)?;
    let image = session.preview(frame).context("rendering preview")?;
    save_image(&image, output).context("writing preview")?;
    println!("preview written to {}", output.display());
    Ok(())
}

fn run(
    config: &Config,
    source: &Path,
    target: &Path,
    picks: &FacePicks,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut session = open_session(config, true)?;
    pick(&mut session, Role::Source, source, picks.source_face)?;
    pick(&mut session, Role::Target, target, picks.target_face)?;
    let output = match output {
        Some(o) => o,
        None => session.suggest_output().context("no output location")?,
    };
    let report = session.render(&output).context("rendering output")?;
    println!("wrote {} ({} frames)", report.output.display(), report.frames);
    if let Some(dir) = report.frames_dir {
        println!("frames kept in {}", dir.display());
    }
    Ok(())
}

/// Select a face non-interactively: `index` resolves a multi-face choice,
/// defaulting to the leftmost face.
fn pick<D: Detector>(
    session: &mut Session<D>,
    role: Role,
    path: &Path,
    index: Option<usize>,
) -> Result<()> {
    let outcome = match role {
        Role::Source => session.select_source(path),
        Role::Target => session.select_target(path),
    }
    .with_context(|| format!("selecting {role} {}", path.display()))?;

    let outcome = match outcome {
        SelectOutcome::NeedsChoice { .. } => session.choose_face(Some(role), index.unwrap_or(0))?,
        SelectOutcome::Selected { .. } if index.is_some_and(|i| i > 0) => {
            bail!("{} has a single face; --{role}-face must be 0", path.display())
        }
        SelectOutcome::NoFace { .. } => bail!("no face found in {}", path.display()),
        other => other,
    };

    if let SelectOutcome::Selected { face, distance, .. } = &outcome {
        tracing::info!(%role, index = face.index, "using face");
        if let Some(Err(err)) = distance {
            eprintln!("distance: undefined ({err})");
        }
    }
    Ok(())
}

fn list_faces<D: Detector>(detector: &mut D, path: &Path, json: bool, export: Option<&Path>) -> Result<()> {
    let image = load_image(path)?;
    let crops = extract_faces(detector, &image)?;

    if let Some(dir) = export {
        let written = faceswap_media::export::export_crops(crops.iter().map(|c| &c.pixels), dir)?;
        eprintln!("exported {} crops to {}", written.len(), dir.display());
    }

    let faces = FaceSummary::list(&crops);
    if json {
        println!("{}", serde_json::to_string_pretty(&faces)?);
    } else if faces.is_empty() {
        println!("no faces found");
    } else {
        for face in &faces {
            println!("{face}");
        }
    }
    Ok(())
}

fn print_models(model_dir: &Path) {
    let mut models = FaceAnalyser::required_models(model_dir);
    models.push(model_dir.join(faceswap_core::swapper::SWAPPER_MODEL));
    models.push(model_dir.join(faceswap_core::swapper::SWAPPER_EMAP));

    println!("model directory: {}", model_dir.display());
    for path in models {
        let mark = if path.exists() { "ok" } else { "missing" };
        println!("  [{mark:>7}] {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{fixture, WidthDetector};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_cli_flags_override_config() {
        let cli = Cli::parse_from([
            "faceswap",
            "--many-faces",
            "--keep-audio",
            "false",
            "--processor",
            "face_swapper",
            "--model-dir",
            "/m",
            "run",
            "a.png",
            "b.mp4",
        ]);
        let mut config = Config::default();
        cli.apply(&mut config);

        assert!(config.many_faces);
        assert!(!config.keep_audio);
        assert!(config.keep_fps, "untouched flag keeps its value");
        assert_eq!(config.model_dir, PathBuf::from("/m"));
        assert!(matches!(cli.command, Commands::Run { output: None, .. }));
    }

    #[test]
    fn test_pick_resolves_choice_by_index() {
        let mut fx = fixture(Config::default());
        let group = fx.path("group.png");
        pick(&mut fx.session, Role::Source, &group, Some(2)).unwrap();
        assert_eq!(fx.session.selection(Role::Source).unwrap().face.bbox.x0, 30.0);

        pick(&mut fx.session, Role::Target, &group, None).unwrap();
        assert_eq!(fx.session.selection(Role::Target).unwrap().face.bbox.x0, 2.0);
    }

    #[test]
    fn test_pick_rejects_bad_index_and_no_face() {
        let mut fx = fixture(Config::default());
        let solo = fx.path("solo.png");
        let empty = fx.path("empty.png");
        assert!(pick(&mut fx.session, Role::Source, &solo, Some(1)).is_err());
        assert!(pick(&mut fx.session, Role::Source, &empty, None).is_err());
    }

    #[tokio::test]
    async fn test_blocking_returns_work_result() {
        blocking(|| Ok(())).await.unwrap();
        let err = blocking(|| bail!("no face found in a.png")).await.unwrap_err();
        assert_eq!(err.to_string(), "no face found in a.png");
    }

    #[test]
    fn test_list_faces_exports() {
        let fx = fixture(Config::default());
        let out = tempfile::tempdir().unwrap();
        let mut detector = WidthDetector {
            faces: HashMap::from([(48, vec![session::tests::face(3.0, 1.0)])]),
            calls: Arc::new(Mutex::new(0)),
        };

        list_faces(&mut detector, &fx.path("group.png"), true, Some(out.path())).unwrap();

        assert!(out.path().join("0.png").exists());
    }
}
