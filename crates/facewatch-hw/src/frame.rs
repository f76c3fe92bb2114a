//! Frame type and pixel conversion: YUYV and MJPG to RGB, processing scale.

use image::imageops::{self, FilterType};
use image::{ImageFormat, Rgb, RgbImage};

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    pub image: RgbImage,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Resize an image by `scale` for processing. `scale >= 1.0` returns a copy.
pub fn scale_image(image: &RgbImage, scale: f32) -> RgbImage {
    if scale >= 1.0 || scale <= 0.0 {
        return image.clone();
    }
    let w = ((image.width() as f32 * scale).round() as u32).max(1);
    let h = ((image.height() as f32 * scale).round() as u32).max(1);
    imageops::resize(image, w, h, FilterType::Triangle)
}

/// Convert packed YUYV 4:2:2 to RGB (BT.601, limited range).
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V], sharing chroma.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = (width * height * 2) as usize;
    if width % 2 != 0 || yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let (y0, u, y1, v) = (chunk[0], chunk[1], chunk[2], chunk[3]);
        rgb.extend_from_slice(&ycbcr_to_rgb(y0, u, v).0);
        rgb.extend_from_slice(&ycbcr_to_rgb(y1, u, v).0);
    }

    RgbImage::from_raw(width, height, rgb).ok_or(FrameError::InvalidLength {
        expected,
        actual: yuyv.len(),
    })
}

fn ycbcr_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
    let c = y as i32 - 16;
    let d = u as i32 - 128;
    let e = v as i32 - 128;
    let clamp = |x: i32| ((x + 128) >> 8).clamp(0, 255) as u8;
    Rgb([
        clamp(298 * c + 409 * e),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 516 * d),
    ])
}

/// Decode one Motion-JPEG buffer.
pub fn mjpeg_to_rgb(buf: &[u8]) -> Result<RgbImage, FrameError> {
    Ok(image::load_from_memory_with_format(buf, ImageFormat::Jpeg)?.to_rgb8())
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(#[from] image::ImageError),
}
