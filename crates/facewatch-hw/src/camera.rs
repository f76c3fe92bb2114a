//! V4L2 webcam capture via the `v4l` crate.

use crate::frame::{self, Frame};
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const STREAM_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device not found: {0}")]
    DeviceNotFound(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// Motion-JPEG, one JPEG per buffer.
    Mjpg,
}

/// Map a bare camera index (`"0"`) to its device node; paths pass through.
pub fn device_path_for(camera: &str) -> String {
    match camera.parse::<u32>() {
        Ok(index) => format!("/dev/video{index}"),
        Err(_) => camera.to_string(),
    }
}

/// V4L2 webcam handle. The capture stream is started on the first frame
/// and stopped when the camera is dropped.
pub struct Camera {
    device: Device,
    stream: Option<MmapStream<'static>>,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0").
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceNotFound(device_path.to_string()));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceNotFound(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::CaptureFailed(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV; many webcams answer with MJPG instead, which is fine.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = if fourcc == FourCC::new(b"YUYV") {
            PixelFormat::Yuyv
        } else if fourcc == FourCC::new(b"MJPG") {
            PixelFormat::Mjpg
        } else {
            return Err(CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need YUYV or MJPG)"
            )));
        };

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        Ok(Self {
            device,
            stream: None,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    /// Block until the next frame is available and convert it to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        if self.stream.is_none() {
            let stream = MmapStream::with_buffers(&self.device, BufType::VideoCapture, STREAM_BUFFERS)
                .map_err(|e| CameraError::CaptureFailed(format!("failed to create mmap stream: {e}")))?;
            self.stream = Some(stream);
        }
        let Some(stream) = self.stream.as_mut() else {
            return Err(CameraError::CaptureFailed("stream not started".into()));
        };

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;
        let sequence = meta.sequence;

        let image = match self.pixel_format {
            PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, self.width, self.height),
            PixelFormat::Mjpg => {
                let used = (meta.bytesused as usize).min(buf.len());
                frame::mjpeg_to_rgb(&buf[..used])
            }
        }
        .map_err(|e| CameraError::CaptureFailed(format!("frame conversion failed: {e}")))?;

        Ok(Frame {
            image,
            timestamp: std::time::Instant::now(),
            sequence,
        })
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        (0..16)
            .filter_map(|i| {
                let path = format!("/dev/video{i}");
                if !Path::new(&path).exists() {
                    return None;
                }
                let caps = Device::with_path(&path).ok()?.query_caps().ok()?;
                if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                    return None;
                }
                Some(DeviceInfo {
                    path,
                    name: caps.card,
                    driver: caps.driver,
                    bus: caps.bus,
                })
            })
            .collect()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        // Stop streaming before the device handle goes away.
        if self.stream.take().is_some() {
            tracing::debug!(device = %self.device_path, "camera released");
        }
    }
}
