//! SCRFD face detector via ONNX Runtime.
//!
//! Runs the anchor-free SCRFD model over an RGB frame letterboxed into a
//! square input, decodes the three stride levels and removes overlapping
//! boxes with NMS.

use crate::types::Detection;
use image::imageops::{self, FilterType};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: u32 = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}; download from insightface and place in the model directory")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Which SCRFD export to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DetectorModel {
    /// `det_10g.onnx`: accurate, slower.
    #[default]
    Det10g,
    /// `det_500m.onnx`: light CPU model.
    Det500m,
}

impl DetectorModel {
    pub fn file_name(self) -> &'static str {
        match self {
            DetectorModel::Det10g => "det_10g.onnx",
            DetectorModel::Det500m => "det_500m.onnx",
        }
    }
}

impl std::str::FromStr for DetectorModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "10g" | "det_10g" => Ok(DetectorModel::Det10g),
            "500m" | "det_500m" => Ok(DetectorModel::Det500m),
            other => Err(format!("unknown detection model '{other}' (expected 10g or 500m)")),
        }
    }
}

/// Scale and padding applied when fitting a frame into the model input.
#[derive(Debug, Clone, Copy)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    fn fit(width: u32, height: u32) -> Self {
        let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        Self {
            scale,
            pad_x: (INPUT_SIZE as f32 - new_w) / 2.0,
            pad_y: (INPUT_SIZE as f32 - new_h) / 2.0,
        }
    }

    /// Map a point in model-input space back to frame space.
    fn unmap(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Output tensor positions for one stride: (score, bbox, kps).
type StrideOutputs = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    outputs: [StrideOutputs; 3],
}

impl FaceDetector {
    /// Load the SCRFD ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(path = model_path, outputs = ?names, "loaded SCRFD model");

        if names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs 9 outputs (score/bbox/kps per stride), got {}",
                names.len()
            )));
        }

        let outputs = map_outputs(&names);
        tracing::debug!(?outputs, "SCRFD output mapping");

        Ok(Self { session, outputs })
    }

    /// Detect faces in an RGB frame, highest confidence first.
    pub fn detect(&mut self, frame: &RgbImage) -> Result<Vec<Detection>, DetectorError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(Vec::new());
        }

        let (input, letterbox) = preprocess(frame);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (&stride, &(score_idx, bbox_idx, kps_idx)) in STRIDES.iter().zip(self.outputs.iter()) {
            let tensor = |idx: usize, what: &'static str| {
                outputs[idx]
                    .try_extract_tensor::<f32>()
                    .map(|(_, data)| data)
                    .map_err(|e| DetectorError::InferenceFailed(format!("{what} stride {stride}: {e}")))
            };
            let scores = tensor(score_idx, "scores")?;
            let boxes = tensor(bbox_idx, "boxes")?;
            let kps = tensor(kps_idx, "landmarks")?;

            candidates.extend(decode_stride(scores, boxes, kps, stride, &letterbox));
        }

        Ok(nms(candidates, NMS_IOU))
    }
}

/// Letterbox the frame into an `INPUT_SIZE` square NCHW tensor, padding
/// with the mean so the border normalizes to zero.
fn preprocess(frame: &RgbImage) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(frame.width(), frame.height());
    let new_w = ((frame.width() as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let new_h = ((frame.height() as f32 * letterbox.scale).round() as u32).clamp(1, INPUT_SIZE);
    let resized = imageops::resize(frame, new_w, new_h, FilterType::Triangle);

    let size = INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let x0 = letterbox.pad_x.floor() as u32;
    let y0 = letterbox.pad_y.floor() as u32;

    for (x, y, pixel) in resized.enumerate_pixels() {
        let (tx, ty) = ((x + x0) as usize, (y + y0) as usize);
        if tx >= size || ty >= size {
            continue;
        }
        for c in 0..3 {
            tensor[[0, c, ty, tx]] = (pixel[c] as f32 - PIXEL_MEAN) / PIXEL_STD;
        }
    }

    (tensor, letterbox)
}

/// Map output tensor names to stride slots.
///
/// Exports that name tensors `score_8`, `bbox_16`, `kps_32`, ... are mapped by
/// name; anything else uses the standard positional layout
/// (scores 0-2, boxes 3-5, landmarks 6-8).
fn map_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: usize| {
        let wanted = format!("{kind}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let by_name: Option<Vec<StrideOutputs>> = STRIDES
        .iter()
        .map(|&s| Some((position("score", s)?, position("bbox", s)?, position("kps", s)?)))
        .collect();

    match by_name {
        Some(found) => [found[0], found[1], found[2]],
        None => [(0, 3, 6), (1, 4, 7), (2, 5, 8)],
    }
}

/// Decode candidate detections for one stride level.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<Detection> {
    let cells_x = INPUT_SIZE as usize / stride;
    let cells_y = INPUT_SIZE as usize / stride;
    let step = stride as f32;
    let anchors = cells_x * cells_y * ANCHORS_PER_CELL;

    (0..anchors)
        .filter_map(|idx| {
            let score = scores.get(idx).copied()?;
            if score <= SCORE_THRESHOLD {
                return None;
            }
            let offsets = boxes.get(idx * 4..idx * 4 + 4)?;

            let cell = idx / ANCHORS_PER_CELL;
            let ax = (cell % cells_x) as f32 * step;
            let ay = (cell / cells_x) as f32 * step;

            let (x1, y1) = letterbox.unmap(ax - offsets[0] * step, ay - offsets[1] * step);
            let (x2, y2) = letterbox.unmap(ax + offsets[2] * step, ay + offsets[3] * step);

            let landmarks = kps.get(idx * 10..idx * 10 + 10).map(|k| {
                std::array::from_fn(|i| letterbox.unmap(ax + k[i * 2] * step, ay + k[i * 2 + 1] * step))
            });

            Some(Detection {
                x: x1,
                y: y1,
                width: x2 - x1,
                height: y2 - y1,
                confidence: score,
                landmarks,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression; output sorted by descending confidence.
fn nms(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for det in candidates {
        if kept.iter().all(|k| iou(k, &det) <= iou_threshold) {
            kept.push(det);
        }
    }
    kept
}

/// Intersection-over-union of two detections.
fn iou(a: &Detection, b: &Detection) -> f32 {
    let iw = ((a.x + a.width).min(b.x + b.width) - a.x.max(b.x)).max(0.0);
    let ih = ((a.y + a.height).min(b.y + b.height) - a.y.max(b.y)).max(0.0);
    let inter = iw * ih;
    let union = a.width * a.height + b.width * b.height - inter;
    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: f32, y: f32, w: f32, h: f32, conf: f32) -> Detection {
        Detection { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn test_iou() {
        let a = det(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
        assert_eq!(iou(&a, &det(20.0, 20.0, 10.0, 10.0, 1.0)), 0.0);
        // 5x10 overlap over a 150 union
        assert!((iou(&a, &det(5.0, 0.0, 10.0, 10.0, 1.0)) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let kept = nms(
            vec![
                det(5.0, 5.0, 100.0, 100.0, 0.8),
                det(200.0, 200.0, 50.0, 50.0, 0.7),
                det(0.0, 0.0, 100.0, 100.0, 0.9),
            ],
            NMS_IOU,
        );
        let confidences: Vec<f32> = kept.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7]);
    }

    #[test]
    fn test_nms_empty() {
        assert!(nms(Vec::new(), NMS_IOU).is_empty());
    }

    #[test]
    fn test_letterbox_unmap_roundtrip() {
        let lb = Letterbox::fit(320, 240);
        assert!((lb.scale - 2.0).abs() < 1e-6);
        assert!((lb.pad_y - 80.0).abs() < 1e-6);
        let (x, y) = lb.unmap(100.0 * lb.scale + lb.pad_x, 50.0 * lb.scale + lb.pad_y);
        assert!((x - 100.0).abs() < 0.1 && (y - 50.0).abs() < 0.1);
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let frame = RgbImage::from_pixel(320, 240, image::Rgb([255, 0, 128]));
        let (tensor, _) = preprocess(&frame);
        assert_eq!(tensor.shape(), &[1, 3, 640, 640]);
        // Padding rows normalize to zero.
        assert_eq!(tensor[[0, 0, 0, 0]], 0.0);
        // Content rows carry per-channel values.
        let r = tensor[[0, 0, 320, 320]];
        let g = tensor[[0, 1, 320, 320]];
        assert!((r - (255.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 0.05);
        assert!((g - (0.0 - PIXEL_MEAN) / PIXEL_STD).abs() < 0.05);
    }

    #[test]
    fn test_map_outputs_by_name() {
        let names: Vec<String> = [
            "bbox_8", "kps_8", "score_8",
            "bbox_16", "kps_16", "score_16",
            "bbox_32", "kps_32", "score_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(map_outputs(&names), [(2, 0, 1), (5, 3, 4), (8, 6, 7)]);
    }

    #[test]
    fn test_map_outputs_positional_fallback() {
        let names: Vec<String> = (0..9).map(|i: usize| (440 + i).to_string()).collect();
        assert_eq!(map_outputs(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn test_decode_stride_single_anchor() {
        let stride = 32;
        let cells = INPUT_SIZE as usize / stride;
        let anchors = cells * cells * ANCHORS_PER_CELL;
        let mut scores = vec![0.0; anchors];
        let mut boxes = vec![0.0; anchors * 4];
        let kps = vec![0.0; anchors * 10];

        // Anchor in cell (x=2, y=1): centre (64, 32) in input space.
        let idx = (cells + 2) * ANCHORS_PER_CELL;
        scores[idx] = 0.95;
        boxes[idx * 4..idx * 4 + 4].copy_from_slice(&[1.0, 1.0, 1.0, 1.0]);

        let identity = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };
        let dets = decode_stride(&scores, &boxes, &kps, stride, &identity);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert_eq!((d.x, d.y, d.width, d.height), (32.0, 0.0, 64.0, 64.0));
        assert_eq!(d.landmarks.unwrap()[0], (64.0, 32.0));
    }

    #[test]
    fn test_detector_model_parse() {
        assert_eq!("10g".parse::<DetectorModel>().unwrap(), DetectorModel::Det10g);
        assert_eq!("500M".parse::<DetectorModel>().unwrap(), DetectorModel::Det500m);
        assert!("hog".parse::<DetectorModel>().is_err());
        assert_eq!(DetectorModel::Det500m.file_name(), "det_500m.onnx");
    }

    #[test]
    fn test_load_missing_model() {
        assert!(matches!(
            FaceDetector::load("/nonexistent/det_10g.onnx"),
            Err(DetectorError::ModelNotFound(_))
        ));
    }
}
