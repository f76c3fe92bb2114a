use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facewatch_core::{
    DetectorModel, EventLog, FaceDetector, FacePipeline, FaceRecognizer, GalleryLoader,
    GalleryStatus, KnownFaceSet,
};
use facewatch_hw::{device_path_for, Camera};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod annotate;
mod config;
mod keys;
mod session;
mod sink;

use config::Config;
use session::{Session, SessionSettings};

#[derive(Parser)]
#[command(name = "facewatch", version, about = "Live webcam face recognition with CSV event logging")]
struct Cli {
    #[command(flatten)]
    opts: Options,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// Overrides for `FACEWATCH_*` settings.
#[derive(Args)]
struct Options {
    /// Camera index or V4L2 device path
    #[arg(long)]
    camera: Option<String>,
    /// Processing scale in (0, 1]; smaller is faster
    #[arg(long)]
    scale: Option<f32>,
    /// Match distance threshold; lower is stricter
    #[arg(long)]
    threshold: Option<f32>,
    /// Known-face cache file
    #[arg(long)]
    encodings: Option<PathBuf>,
    /// Directory of reference images, one per identity
    #[arg(long)]
    known_dir: Option<PathBuf>,
    /// CSV event log
    #[arg(long)]
    log: Option<PathBuf>,
    /// Detection model: 10g or 500m
    #[arg(long)]
    det_model: Option<DetectorModel>,
    /// Directory containing the ONNX models
    #[arg(long)]
    model_dir: Option<PathBuf>,
    /// Window title
    #[arg(long)]
    window_title: Option<String>,
    /// Write the latest annotated frame to this JPEG path
    #[arg(long)]
    preview: Option<PathBuf>,
    /// Directory for 's' snapshots
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    /// Log detected faces as unknown when recognition is unavailable
    #[arg(long)]
    log_detection_only: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run live recognition (default)
    Run,
    /// Rebuild the known-face cache from the reference directory
    BuildCache,
    /// List identities in the known-face cache
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// List V4L2 capture devices
    Devices,
}

impl Options {
    fn apply(self, mut config: Config) -> Config {
        if let Some(v) = self.camera {
            config.camera = v;
        }
        if let Some(v) = self.scale {
            config.scale = v;
        }
        if let Some(v) = self.threshold {
            config.threshold = v;
        }
        if let Some(v) = self.encodings {
            config.encodings = v;
        }
        if let Some(v) = self.known_dir {
            config.known_dir = v;
        }
        if let Some(v) = self.log {
            config.log_path = v;
        }
        if let Some(v) = self.det_model {
            config.det_model = v;
        }
        if let Some(v) = self.model_dir {
            config.model_dir = v;
        }
        if let Some(v) = self.window_title {
            config.window_title = v;
        }
        if self.preview.is_some() {
            config.preview = self.preview;
        }
        if let Some(v) = self.snapshot_dir {
            config.snapshot_dir = v;
        }
        config.log_detection_only |= self.log_detection_only;
        config
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli.opts.apply(Config::from_env()).validate();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config),
        Commands::BuildCache => build_cache(&config),
        Commands::List { json } => list(&config, json),
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}\t{}\t{}\t{}", d.path, d.name, d.driver, d.bus);
            }
            Ok(())
        }
    }
}

/// Load the detector (required) and the recognizer (optional).
fn load_pipeline(config: &Config) -> Result<FacePipeline> {
    let det_path = config.detector_model_path();
    let detector = FaceDetector::load(&det_path)
        .with_context(|| format!("failed to load detection model {det_path}"))?;

    let recognizer = match FaceRecognizer::load(&config.recognizer_model_path()) {
        Ok(r) => Some(r),
        Err(err) => {
            tracing::warn!(error = %err, "recognition model unavailable; detection only");
            None
        }
    };

    Ok(FacePipeline::new(detector, recognizer))
}

fn run(config: &Config) -> Result<()> {
    let mut pipeline = load_pipeline(config)?;

    let loader = GalleryLoader::new(&config.encodings, &config.known_dir);
    let status = loader.ensure_loaded(&mut pipeline);
    match &status {
        GalleryStatus::Cached(set) => tracing::info!(count = set.len(), "known faces loaded from cache"),
        GalleryStatus::Rebuilt { set, skipped } => tracing::info!(
            count = set.len(),
            skipped = skipped.len(),
            cache = %config.encodings.display(),
            "known faces rebuilt"
        ),
        GalleryStatus::Unavailable { reason } => tracing::warn!(
            reason = %reason,
            dir = %config.known_dir.display(),
            "no known faces; add reference images to the known-face directory"
        ),
    }
    let known = status.into_set();

    let device = device_path_for(&config.camera);
    let camera = Camera::open(&device).with_context(|| format!("cannot open camera {device}"))?;
    let keys = keys::StdinKeys::spawn().context("failed to start key input")?;
    let sink = sink::PreviewSink::new(config.window_title.clone(), config.preview.clone());

    let mut session = Session::new(
        camera,
        pipeline,
        sink,
        keys,
        known,
        EventLog::new(&config.log_path),
        SessionSettings {
            threshold: config.threshold,
            scale: config.scale,
            log_detection_only: config.log_detection_only,
            snapshot_dir: config.snapshot_dir.clone(),
        },
    );

    let summary = session.run()?;
    println!(
        "{} frames, {} faces, {} matched ({:?})",
        summary.frames, summary.faces, summary.matches, summary.stop
    );
    Ok(())
}

fn build_cache(config: &Config) -> Result<()> {
    let mut pipeline = load_pipeline(config)?;
    let loader = GalleryLoader::new(&config.encodings, &config.known_dir);

    let report = loader.rebuild(&mut pipeline)?;
    for path in &report.skipped {
        println!("[WARN] skipped: {}", path.display());
    }
    if report.set.is_empty() {
        anyhow::bail!("no encodings generated; check the images in {}", config.known_dir.display());
    }
    report.set.save(&config.encodings)?;
    println!(
        "{} identities written to {}",
        report.set.len(),
        config.encodings.display()
    );
    Ok(())
}

fn list(config: &Config, json: bool) -> Result<()> {
    let set = KnownFaceSet::load(&config.encodings)?.unwrap_or_default();
    if json {
        let entries: Vec<_> = set
            .iter()
            .map(|(name, e)| serde_json::json!({ "name": name, "dim": e.dim() }))
            .collect();
        println!("{}", serde_json::Value::Array(entries));
    } else if set.is_empty() {
        println!("No known faces in {}", config.encodings.display());
    } else {
        for (i, name) in set.names().iter().enumerate() {
            println!("{i}\t{name}");
        }
    }
    Ok(())
}
