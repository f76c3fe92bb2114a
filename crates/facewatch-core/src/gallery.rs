//! Known-face gallery: the session's reference set of (name, embedding) pairs.
//!
//! The gallery is persisted as a CBOR cache file. At startup
//! [`GalleryLoader::ensure_loaded`] either loads that cache (warm start) or
//! rebuilds it from a directory of reference images (cold start), one
//! identity per image file named by the file stem.

use crate::pipeline::FaceEncoder;
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cache I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cache decode failed: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
    #[error("cache encode failed: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    #[error("cache is corrupt: {names} names but {embeddings} embeddings")]
    Corrupt { names: usize, embeddings: usize },
    #[error("cache is corrupt: embedding {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    #[error("cache is corrupt: embedding {index} has non-finite values")]
    NonFinite { index: usize },
    #[error("reference directory not found: {0}")]
    MissingReferenceDir(PathBuf),
    #[error("encoder has no recognition model loaded")]
    NoEncoder,
}

/// Ordered (name, embedding) pairs. Names and embeddings always share indices.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KnownFaceSet {
    names: Vec<String>,
    embeddings: Vec<Embedding>,
}

impl KnownFaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an identity. Duplicate names are allowed; entries are unique by position.
    pub fn push(&mut self, name: impl Into<String>, embedding: Embedding) {
        self.names.push(name.into());
        self.embeddings.push(embedding);
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Embedding)> {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.embeddings.iter())
    }

    /// Model version shared by the stored embeddings, if any recorded one.
    pub fn model_version(&self) -> Option<&str> {
        self.embeddings
            .iter()
            .find_map(|e| e.model_version.as_deref())
    }

    /// Serialize to the cache file, replacing any previous content.
    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let record = CacheRecord {
            names: self.names.clone(),
            embeddings: self.embeddings.iter().map(|e| e.values.clone()).collect(),
            model_version: self.model_version().map(str::to_string),
        };

        let file = File::create(path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        ciborium::into_writer(&record, &mut writer)?;
        writer.flush().map_err(io_err)?;
        Ok(())
    }

    /// Deserialize from the cache file. `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, GalleryError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(GalleryError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let record: CacheRecord = ciborium::from_reader(BufReader::new(file))?;
        record.validate()?;

        let embeddings = record
            .embeddings
            .into_iter()
            .map(|values| Embedding {
                values,
                model_version: record.model_version.clone(),
            })
            .collect();

        Ok(Some(Self {
            names: record.names,
            embeddings,
        }))
    }
}

/// On-disk layout of the cache file.
#[derive(Serialize, Deserialize)]
struct CacheRecord {
    names: Vec<String>,
    embeddings: Vec<Vec<f32>>,
    #[serde(default)]
    model_version: Option<String>,
}

impl CacheRecord {
    /// Paired lists, one shared dimension, finite values only.
    fn validate(&self) -> Result<(), GalleryError> {
        if self.names.len() != self.embeddings.len() {
            return Err(GalleryError::Corrupt {
                names: self.names.len(),
                embeddings: self.embeddings.len(),
            });
        }
        let expected = self.embeddings.first().map_or(0, Vec::len);
        for (index, values) in self.embeddings.iter().enumerate() {
            if values.len() != expected {
                return Err(GalleryError::DimensionMismatch {
                    index,
                    expected,
                    found: values.len(),
                });
            }
            if !values.iter().all(|v| v.is_finite()) {
                return Err(GalleryError::NonFinite { index });
            }
        }
        Ok(())
    }
}

/// How the gallery for this session was obtained.
#[derive(Debug)]
pub enum GalleryStatus {
    /// Warm start: read from the cache file.
    Cached(KnownFaceSet),
    /// Cold start: rebuilt from the reference directory and written back.
    Rebuilt {
        set: KnownFaceSet,
        /// Reference files that produced no embedding.
        skipped: Vec<PathBuf>,
    },
    /// No usable gallery; the caller may continue in detection-only mode.
    Unavailable { reason: String },
}

impl GalleryStatus {
    pub fn is_available(&self) -> bool {
        !matches!(self, GalleryStatus::Unavailable { .. })
    }

    /// The loaded set, empty when unavailable.
    pub fn into_set(self) -> KnownFaceSet {
        match self {
            GalleryStatus::Cached(set) | GalleryStatus::Rebuilt { set, .. } => set,
            GalleryStatus::Unavailable { .. } => KnownFaceSet::new(),
        }
    }
}

/// Outcome of a directory scan.
#[derive(Debug)]
pub struct RebuildReport {
    pub set: KnownFaceSet,
    pub skipped: Vec<PathBuf>,
}

/// Loads the gallery from cache, or rebuilds it from reference images.
pub struct GalleryLoader {
    cache_path: PathBuf,
    reference_dir: PathBuf,
}

impl GalleryLoader {
    pub fn new(cache_path: impl Into<PathBuf>, reference_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_path: cache_path.into(),
            reference_dir: reference_dir.into(),
        }
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    pub fn reference_dir(&self) -> &Path {
        &self.reference_dir
    }

    /// Warm start from the cache if it holds entries from the current
    /// encoder model, otherwise cold start from the reference directory.
    ///
    /// Never fails: every problem degrades to a rebuild or to `Unavailable`.
    pub fn ensure_loaded(&self, encoder: &mut dyn FaceEncoder) -> GalleryStatus {
        match KnownFaceSet::load(&self.cache_path) {
            Ok(Some(set)) if set.is_empty() => {
                tracing::info!(path = %self.cache_path.display(), "cache is empty; rebuilding");
            }
            Ok(Some(set)) if !model_matches(&set, encoder.model_version()) => {
                tracing::info!(
                    path = %self.cache_path.display(),
                    cached = ?set.model_version(),
                    current = ?encoder.model_version(),
                    "cache was built by a different encoder model; rebuilding"
                );
            }
            Ok(Some(set)) => {
                tracing::info!(
                    path = %self.cache_path.display(),
                    count = set.len(),
                    "loaded known faces from cache"
                );
                return GalleryStatus::Cached(set);
            }
            Ok(None) => {
                tracing::info!(path = %self.cache_path.display(), "no cache file; rebuilding");
            }
            Err(err) => {
                tracing::warn!(error = %err, "unreadable cache; rebuilding");
            }
        }

        match self.rebuild(encoder) {
            Ok(report) if report.set.is_empty() => GalleryStatus::Unavailable {
                reason: format!(
                    "no encodings generated from {}; check the reference images",
                    self.reference_dir.display()
                ),
            },
            Ok(report) => {
                if let Err(err) = report.set.save(&self.cache_path) {
                    tracing::warn!(error = %err, "failed to persist rebuilt cache");
                }
                GalleryStatus::Rebuilt {
                    set: report.set,
                    skipped: report.skipped,
                }
            }
            Err(err) => GalleryStatus::Unavailable {
                reason: err.to_string(),
            },
        }
    }

    /// Scan the reference directory in file-name order, encoding the first
    /// face found in each image. Files without a face are skipped with a warning.
    ///
    /// Does not touch the cache file.
    pub fn rebuild(&self, encoder: &mut dyn FaceEncoder) -> Result<RebuildReport, GalleryError> {
        if !self.reference_dir.is_dir() {
            return Err(GalleryError::MissingReferenceDir(self.reference_dir.clone()));
        }
        if !encoder.can_encode() {
            return Err(GalleryError::NoEncoder);
        }

        let read_err = |source| GalleryError::Io {
            path: self.reference_dir.clone(),
            source,
        };
        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.reference_dir)
            .map_err(read_err)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        tracing::info!(dir = %self.reference_dir.display(), files = paths.len(), "building encodings");

        let mut set = KnownFaceSet::new();
        let mut skipped = Vec::new();

        for path in paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                skipped.push(path);
                continue;
            };

            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(err) => {
                    tracing::warn!(file = %path.display(), error = %err, "not a readable image; skipping");
                    skipped.push(path);
                    continue;
                }
            };

            let observations = match encoder.observe(&image) {
                Ok(obs) => obs,
                Err(err) => {
                    tracing::warn!(file = %path.display(), error = %err, "encoding failed; skipping");
                    skipped.push(path);
                    continue;
                }
            };

            match observations.into_iter().find_map(|o| o.embedding) {
                Some(embedding) => {
                    tracing::info!(name = %name, "loaded reference face");
                    set.push(name, embedding);
                }
                None => {
                    tracing::warn!(file = %path.display(), "no face found; skipping");
                    skipped.push(path);
                }
            }
        }

        Ok(RebuildReport { set, skipped })
    }
}

fn model_matches(set: &KnownFaceSet, current: Option<&str>) -> bool {
    match (set.model_version(), current) {
        (Some(cached), Some(current)) => cached == current,
        _ => true,
    }
}
