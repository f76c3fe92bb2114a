use facewatch_core::DetectorModel;
use std::path::PathBuf;

const DEFAULT_SCALE: f32 = 0.5;
/// Euclidean distance on unit-length ArcFace embeddings (≈ cosine 0.40).
const DEFAULT_THRESHOLD: f32 = 1.10;

/// Runtime configuration: defaults, then `FACEWATCH_*` environment
/// variables, then command-line flags.
#[derive(Debug, Clone)]
pub struct Config {
    /// Camera index (`0`) or V4L2 device path.
    pub camera: String,
    /// Frames are downscaled by this factor before detection.
    pub scale: f32,
    /// Maximum Euclidean distance for a positive match (strict).
    pub threshold: f32,
    /// Known-face cache file.
    pub encodings: PathBuf,
    /// Reference images, one identity per file.
    pub known_dir: PathBuf,
    /// CSV event log.
    pub log_path: PathBuf,
    pub det_model: DetectorModel,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub window_title: String,
    /// Where the latest annotated frame is written, if anywhere.
    pub preview: Option<PathBuf>,
    pub snapshot_dir: PathBuf,
    /// Log faces as `unknown` when recognition is unavailable.
    pub log_detection_only: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: "0".to_string(),
            scale: DEFAULT_SCALE,
            threshold: DEFAULT_THRESHOLD,
            encodings: PathBuf::from("encodings.cbor"),
            known_dir: PathBuf::from("known_faces"),
            log_path: PathBuf::from("recognition_log.csv"),
            det_model: DetectorModel::default(),
            model_dir: default_model_dir(),
            window_title: "facewatch".to_string(),
            preview: None,
            snapshot_dir: PathBuf::from("."),
            log_detection_only: false,
        }
    }
}

impl Config {
    /// Defaults overlaid with `FACEWATCH_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            camera: env_string("FACEWATCH_CAMERA").unwrap_or(d.camera),
            scale: env_parse("FACEWATCH_SCALE", d.scale),
            threshold: env_parse("FACEWATCH_THRESHOLD", d.threshold),
            encodings: env_path("FACEWATCH_ENCODINGS").unwrap_or(d.encodings),
            known_dir: env_path("FACEWATCH_KNOWN_DIR").unwrap_or(d.known_dir),
            log_path: env_path("FACEWATCH_LOG").unwrap_or(d.log_path),
            det_model: env_parse("FACEWATCH_DET_MODEL", d.det_model),
            model_dir: d.model_dir,
            window_title: env_string("FACEWATCH_WINDOW_TITLE").unwrap_or(d.window_title),
            preview: env_path("FACEWATCH_PREVIEW").or(d.preview),
            snapshot_dir: env_path("FACEWATCH_SNAPSHOT_DIR").unwrap_or(d.snapshot_dir),
            log_detection_only: std::env::var("FACEWATCH_LOG_DETECTION_ONLY")
                .map(|v| v != "0")
                .unwrap_or(d.log_detection_only),
        }
    }

    /// Replace out-of-range values with defaults. Never fails.
    pub fn validate(mut self) -> Self {
        if !(self.scale > 0.0 && self.scale <= 1.0) {
            tracing::warn!(scale = self.scale, default = DEFAULT_SCALE, "scale must be in (0, 1]; using default");
            self.scale = DEFAULT_SCALE;
        }
        if !(self.threshold.is_finite() && self.threshold > 0.0) {
            tracing::warn!(
                threshold = self.threshold,
                default = DEFAULT_THRESHOLD,
                "threshold must be positive; using default"
            );
            self.threshold = DEFAULT_THRESHOLD;
        }
        self
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> String {
        self.model_dir
            .join(self.det_model.file_name())
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn recognizer_model_path(&self) -> String {
        self.model_dir
            .join(facewatch_core::recognizer::MODEL_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

/// `$FACEWATCH_MODEL_DIR`, else `$XDG_DATA_HOME/facewatch/models`.
fn default_model_dir() -> PathBuf {
    if let Some(dir) = env_path("FACEWATCH_MODEL_DIR") {
        return dir;
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewatch")
        .join("models")
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_string(key).map(PathBuf::from)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
