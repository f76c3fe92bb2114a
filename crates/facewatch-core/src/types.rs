use serde::{Deserialize, Serialize};

/// Raw detector output for one face, in the coordinates of the image that
/// was handed to the detector.
#[derive(Debug, Clone)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

/// Integer face box as `(left, top, right, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl FaceBox {
    /// Truncate a detection to integer pixel coordinates.
    pub fn from_detection(det: &Detection) -> Self {
        Self {
            left: det.x as i32,
            top: det.y as i32,
            right: (det.x + det.width) as i32,
            bottom: (det.y + det.height) as i32,
        }
    }

    /// Map a box found on a frame resized by `scale` back to the original frame.
    pub fn unscale(&self, scale: f32) -> Self {
        let back = |v: i32| (v as f32 / scale) as i32;
        Self {
            left: back(self.left),
            top: back(self.top),
            right: back(self.right),
            bottom: back(self.bottom),
        }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    pub model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance between two embeddings.
    ///
    /// `None` when the dimensions differ or the result is not finite.
    pub fn euclidean_distance(&self, other: &Embedding) -> Option<f32> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let dist = self
            .values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt();
        dist.is_finite().then_some(dist)
    }
}

/// One detected face in one frame.
#[derive(Debug, Clone)]
pub struct Observation {
    pub face: FaceBox,
    pub confidence: f32,
    /// `None` when no encoder is loaded (detection-only).
    pub embedding: Option<Embedding>,
}
