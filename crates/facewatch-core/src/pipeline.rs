//! Detector/encoder collaborator: turns an RGB image into observations.

use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError, MODEL_VERSION};
use crate::types::{FaceBox, Observation};
use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Produces zero or more observations from an image.
///
/// Boxes are in the coordinates of the image passed in.
pub trait FaceEncoder {
    fn observe(&mut self, image: &RgbImage) -> Result<Vec<Observation>, PipelineError>;

    /// Whether observations carry embeddings.
    fn can_encode(&self) -> bool;

    /// Version tag of the embedding model, if one is loaded.
    fn model_version(&self) -> Option<&str>;
}

/// SCRFD detection, optionally followed by ArcFace encoding of every face.
pub struct FacePipeline {
    detector: FaceDetector,
    recognizer: Option<FaceRecognizer>,
}

impl FacePipeline {
    pub fn new(detector: FaceDetector, recognizer: Option<FaceRecognizer>) -> Self {
        Self { detector, recognizer }
    }
}

impl FaceEncoder for FacePipeline {
    fn observe(&mut self, image: &RgbImage) -> Result<Vec<Observation>, PipelineError> {
        let detections = self.detector.detect(image)?;
        let mut observations = Vec::with_capacity(detections.len());

        for det in &detections {
            let embedding = match self.recognizer.as_mut() {
                Some(recognizer) => match recognizer.extract(image, det) {
                    Ok(e) => Some(e),
                    Err(RecognizerError::NoLandmarks) => {
                        tracing::debug!(confidence = det.confidence, "face without landmarks; not encoded");
                        None
                    }
                    Err(err) => return Err(err.into()),
                },
                None => None,
            };

            observations.push(Observation {
                face: FaceBox::from_detection(det),
                confidence: det.confidence,
                embedding,
            });
        }

        Ok(observations)
    }

    fn can_encode(&self) -> bool {
        self.recognizer.is_some()
    }

    fn model_version(&self) -> Option<&str> {
        self.recognizer.as_ref().map(|_| MODEL_VERSION)
    }
}
