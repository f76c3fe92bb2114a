//! facewatch-hw: Hardware abstraction for webcam capture.
//!
//! Provides V4L2-based camera access with YUYV and MJPG frames converted
//! to RGB.

pub mod camera;
pub mod frame;

pub use camera::{device_path_for, Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::{scale_image, Frame, FrameError};
