//! Per-face annotations drawn onto the displayed frame.

use chrono::{DateTime, Local};
use facewatch_core::{FaceBox, MatchResult};
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

const MATCH_COLOR: Rgb<u8> = Rgb([50, 200, 50]);
const UNKNOWN_COLOR: Rgb<u8> = Rgb([200, 80, 80]);
const DETECTION_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const LINE_WIDTH: i32 = 2;

/// How a face was classified this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum FaceLabel {
    Known(MatchResult),
    Unknown(MatchResult),
    /// No recognition available; the face was only detected.
    Detected,
}

impl FaceLabel {
    pub fn from_match(result: MatchResult) -> Self {
        if result.is_match() {
            FaceLabel::Known(result)
        } else {
            FaceLabel::Unknown(result)
        }
    }

    pub fn color(&self) -> Rgb<u8> {
        match self {
            FaceLabel::Known(_) => MATCH_COLOR,
            FaceLabel::Unknown(_) => UNKNOWN_COLOR,
            FaceLabel::Detected => DETECTION_COLOR,
        }
    }

    /// Caption shown above the box, e.g. `alice 0.42`.
    pub fn text(&self) -> String {
        match self {
            FaceLabel::Known(r) | FaceLabel::Unknown(r) => format!("{} {:.2}", r.name, r.distance),
            FaceLabel::Detected => "face detected".to_string(),
        }
    }
}

/// One annotated face in original-frame coordinates.
#[derive(Debug, Clone)]
pub struct Annotation {
    pub face: FaceBox,
    pub label: FaceLabel,
}

/// Everything shown alongside one displayed frame.
#[derive(Debug, Clone, Default)]
pub struct FrameAnnotation {
    pub faces: Vec<Annotation>,
    /// Clock and smoothed frame rate, see [`overlay_text`].
    pub overlay: String,
}

/// `YYYY-MM-DD HH:MM:SS   FPS:<fps>` with one decimal.
pub fn overlay_text(now: DateTime<Local>, fps: f32) -> String {
    format!("{}   FPS:{fps:.1}", now.format("%Y-%m-%d %H:%M:%S"))
}

/// Draw each face box with a border of `LINE_WIDTH` pixels.
///
/// Glyph rendering is left to whatever displays the frame; captions are
/// available through [`FaceLabel::text`].
pub fn draw(frame: &mut RgbImage, annotations: &[Annotation]) {
    for ann in annotations {
        let color = ann.label.color();
        for inset in 0..LINE_WIDTH {
            let w = ann.face.width() - 2 * inset;
            let h = ann.face.height() - 2 * inset;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(ann.face.left + inset, ann.face.top + inset).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(frame, rect, color);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn face(left: i32, top: i32, right: i32, bottom: i32) -> FaceBox {
        FaceBox { left, top, right, bottom }
    }

    #[test]
    fn test_label_text_and_color() {
        let known = FaceLabel::from_match(MatchResult {
            name: "alice".into(),
            distance: 0.4242,
            index: Some(0),
        });
        assert_eq!(known.text(), "alice 0.42");
        assert_eq!(known.color(), MATCH_COLOR);

        let unknown = FaceLabel::from_match(MatchResult::unknown(1.5));
        assert_eq!(unknown.text(), "unknown 1.50");
        assert_eq!(unknown.color(), UNKNOWN_COLOR);

        assert_eq!(FaceLabel::Detected.color(), DETECTION_COLOR);
    }

    #[test]
    fn test_overlay_text_format() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(overlay_text(now, 29.96), "2024-03-09 14:05:07   FPS:30.0");
        assert_eq!(overlay_text(now, 0.0), "2024-03-09 14:05:07   FPS:0.0");
    }

    #[test]
    fn test_draw_border_only() {
        let mut frame = RgbImage::new(40, 40);
        draw(
            &mut frame,
            &[Annotation {
                face: face(5, 5, 25, 25),
                label: FaceLabel::Detected,
            }],
        );
        assert_eq!(*frame.get_pixel(5, 5), DETECTION_COLOR);
        assert_eq!(*frame.get_pixel(6, 10), DETECTION_COLOR);
        assert_eq!(*frame.get_pixel(15, 15), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_clips_out_of_frame_boxes() {
        let mut frame = RgbImage::new(10, 10);
        draw(
            &mut frame,
            &[
                Annotation { face: face(-5, -5, 50, 50), label: FaceLabel::Detected },
                Annotation { face: face(3, 3, 3, 3), label: FaceLabel::Detected },
            ],
        );
        assert_eq!(*frame.get_pixel(5, 5), Rgb([0, 0, 0]));
    }
}
