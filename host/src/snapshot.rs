use std::path::PathBuf;

use binbot_common::frame::{Frame, FramePayload};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to write snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode snapshot {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Saves received images into one directory, one file per frame.
#[derive(Debug, Clone)]
pub struct SnapshotWriter {
    dir: PathBuf,
}

impl SnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Write `frame` and return its path. JPEG bytes are stored untouched;
    /// raw luma is stored as PNG when its length matches the geometry and
    /// skipped otherwise.
    pub fn save(&self, frame: &Frame) -> Result<Option<PathBuf>, SnapshotError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| SnapshotError::Write {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.dir.join(frame.snapshot_name());

        match &frame.payload {
            FramePayload::Jpeg(data) => {
                std::fs::write(&path, data).map_err(|source| SnapshotError::Write {
                    path: path.clone(),
                    source,
                })?;
            }
            FramePayload::Luma(data) => {
                let Some(img) = image::GrayImage::from_raw(frame.width, frame.height, data.clone())
                else {
                    debug!(
                        bytes = data.len(),
                        width = frame.width,
                        height = frame.height,
                        "raw image does not match its geometry, not saved"
                    );
                    return Ok(None);
                };
                img.save(&path).map_err(|source| SnapshotError::Encode {
                    path: path.clone(),
                    source,
                })?;
            }
        }

        debug!(path = path.display().to_string(), bytes = frame.payload_size(), "snapshot saved");
        Ok(Some(path))
    }
}
