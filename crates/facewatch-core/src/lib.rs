//! facewatch-core: known-face gallery, matching and event logging.
//!
//! Faces are found with SCRFD and encoded with ArcFace, both running via
//! ONNX Runtime on the CPU. Identity decisions are a Euclidean
//! nearest-neighbour lookup against a small in-memory gallery.

pub mod alignment;
pub mod detector;
pub mod event_log;
pub mod gallery;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use detector::{DetectorModel, FaceDetector};
pub use event_log::{EventLog, LogRecord};
pub use gallery::{GalleryLoader, GalleryStatus, KnownFaceSet};
pub use matcher::{EuclideanMatcher, MatchResult, Matcher, UNKNOWN};
pub use pipeline::{FaceEncoder, FacePipeline, PipelineError};
pub use recognizer::FaceRecognizer;
pub use types::{Detection, Embedding, FaceBox, Observation};
