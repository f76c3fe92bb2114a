//! ArcFace face encoder via ONNX Runtime.
//!
//! Produces L2-normalized 512-dimensional embeddings from aligned RGB crops,
//! using the w600k_r50 ArcFace model.

use crate::alignment::{self, ALIGNED_SIZE};
use crate::types::{Detection, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 127.5; // symmetric, unlike SCRFD's 128.0
const EMBEDDING_DIM: usize = 512;
pub const MODEL_VERSION: &str = "w600k_r50";
pub const MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("face has no landmarks; detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace-based face encoder.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    /// Load the ArcFace ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, RecognizerError> {
        if !Path::new(model_path).exists() {
            return Err(RecognizerError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(path = model_path, "loaded ArcFace model");

        Ok(Self { session })
    }

    /// Extract the embedding of one detected face.
    pub fn extract(&mut self, frame: &RgbImage, face: &Detection) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let aligned = alignment::align_face(frame, landmarks);
        let input = preprocess(&aligned);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        to_embedding(raw)
    }
}

/// Validate raw model output and normalize it to unit length.
fn to_embedding(raw: &[f32]) -> Result<Embedding, RecognizerError> {
    if raw.len() != EMBEDDING_DIM {
        return Err(RecognizerError::InferenceFailed(format!(
            "expected {EMBEDDING_DIM}-dim embedding, got {}",
            raw.len()
        )));
    }
    if !raw.iter().all(|v| v.is_finite()) {
        return Err(RecognizerError::InferenceFailed(
            "embedding contains non-finite values".to_string(),
        ));
    }

    Ok(Embedding {
        values: l2_normalize(raw),
        model_version: Some(MODEL_VERSION.to_string()),
    })
}

/// Aligned 112×112 RGB crop to a normalized NCHW tensor.
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ALIGNED_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in aligned.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }
    tensor
}

fn l2_normalize(raw: &[f32]) -> Vec<f32> {
    let norm = raw.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        raw.iter().map(|x| x / norm).collect()
    } else {
        raw.to_vec()
    }
}
