//! File-backed record medium for host runs.
//!
//! The whole region is mirrored in memory; a commit writes the merged image
//! to a sibling temporary file and renames it over the original so a crash
//! mid-commit leaves the previous image intact.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use acir_types::StoreError;
use tracing::{debug, info, warn};

use crate::medium::{ERASED_BYTE, RecordMedium, StagedImage};

/// A persistent region stored in a regular file.
#[derive(Debug)]
pub struct FileMedium {
    path: PathBuf,
    image: StagedImage,
}

impl FileMedium {
    /// Open (or lazily create) the image at `path` with a fixed `capacity`.
    ///
    /// A missing file reads as fully erased.  A short file is padded with the
    /// erased pattern; a long one is truncated to `capacity`.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, StoreError> {
        let path = path.into();
        let mut bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "no medium image yet, starting erased");
                Vec::new()
            }
            Err(e) => {
                return Err(StoreError::Io(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        if !bytes.is_empty() && bytes.len() != capacity {
            warn!(
                path = %path.display(),
                found = bytes.len(),
                capacity,
                "medium image size mismatch, resizing"
            );
        }
        bytes.resize(capacity, ERASED_BYTE);

        Ok(Self {
            path,
            image: StagedImage::new(bytes),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_image(&self, image: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, image)?;
        fs::rename(&tmp, &self.path)
    }
}

impl RecordMedium for FileMedium {
    fn capacity(&self) -> usize {
        self.image.capacity()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StoreError> {
        self.image.read(offset, buf)
    }

    fn stage(&mut self, offset: usize, bytes: &[u8]) -> Result<(), StoreError> {
        self.image.stage(offset, bytes)
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        let merged = self.image.merged();
        self.write_image(&merged).map_err(|e| {
            StoreError::Commit(format!("failed to write {}: {e}", self.path.display()))
        })?;
        debug!(path = %self.path.display(), writes = self.image.pending_writes(), "medium image committed");
        self.image.apply();
        Ok(())
    }
}
