//! Where annotated frames go: a preview file stands in for a window.

use crate::annotate::FrameAnnotation;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Display target for annotated frames.
///
/// Boxes are already drawn into `frame`; captions and the overlay line come
/// with `annotation` for sinks that render text.
pub trait FrameSink {
    fn show(&mut self, frame: &RgbImage, annotation: &FrameAnnotation) -> Result<(), SinkError>;
}

/// Writes the latest annotated frame to a JPEG file, if a path is set.
pub struct PreviewSink {
    path: Option<PathBuf>,
}

impl PreviewSink {
    pub fn new(title: impl Into<String>, path: Option<PathBuf>) -> Self {
        let title = title.into();
        match &path {
            Some(p) => tracing::info!(window = %title, preview = %p.display(), "writing preview frames"),
            None => tracing::info!(window = %title, "headless: no preview output"),
        }
        Self { path }
    }
}

impl FrameSink for PreviewSink {
    fn show(&mut self, frame: &RgbImage, annotation: &FrameAnnotation) -> Result<(), SinkError> {
        tracing::debug!(
            overlay = %annotation.overlay,
            captions = ?annotation.faces.iter().map(|a| a.label.text()).collect::<Vec<_>>(),
            "frame"
        );
        let Some(path) = &self.path else {
            return Ok(());
        };
        // Write beside the target and rename so viewers never see a partial file.
        let tmp = path.with_extension("tmp.jpg");
        save_jpeg(frame, &tmp)?;
        std::fs::rename(&tmp, path).map_err(|e| SinkError::Write {
            path: path.clone(),
            source: image::ImageError::IoError(e),
        })
    }
}

/// Save an annotated frame as `snapshot_<unix_seconds>.jpg` in `dir`.
pub fn save_snapshot(frame: &RgbImage, dir: &Path) -> Result<PathBuf, SinkError> {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = dir.join(format!("snapshot_{secs}.jpg"));
    save_jpeg(frame, &path)?;
    Ok(path)
}

fn save_jpeg(frame: &RgbImage, path: &Path) -> Result<(), SinkError> {
    frame
        .save_with_format(path, image::ImageFormat::Jpeg)
        .map_err(|source| SinkError::Write {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("preview.jpg");
        let mut sink = PreviewSink::new("test", Some(path.clone()));
        sink.show(&RgbImage::new(16, 16), &FrameAnnotation::default()).unwrap();
        assert_eq!(image::open(&path).unwrap().width(), 16);
    }

    #[test]
    fn test_headless_sink_is_noop() {
        let mut sink = PreviewSink::new("test", None);
        assert!(sink.show(&RgbImage::new(4, 4), &FrameAnnotation::default()).is_ok());
    }

    #[test]
    fn test_snapshot_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_snapshot(&RgbImage::new(8, 8), dir.path()).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("snapshot_") && name.ends_with(".jpg"));
        assert!(path.exists());
    }
}
