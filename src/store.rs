//! Snapshot file persistence
//!
//! A snapshot is the raw region image: no header, no magic, no checksum.
//! Its only structure is its length, which must equal the region length.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SnapError};

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the image, replacing any previous snapshot at this path.
    /// Not atomic: a crash mid-write leaves a truncated file, which the
    /// load path rejects.
    pub fn write(&self, image: &[u8]) -> Result<()> {
        let mut file = File::create(&self.path)?;
        file.write_all(image)?;
        file.flush()?;
        Ok(())
    }

    /// Fill `image` from the snapshot. The file must be exactly as long as
    /// the image; anything else is refused before a byte is copied.
    pub fn read_into(&self, image: &mut [u8]) -> Result<()> {
        let mut file = File::open(&self.path)?;
        let expected = image.len() as u64;
        let actual = file.metadata()?.len();

        if actual < expected {
            return Err(SnapError::ShortRead {
                path: self.path.clone(),
                expected,
                actual,
            });
        }
        if actual > expected {
            return Err(SnapError::TrailingBytes {
                path: self.path.clone(),
                expected,
                extra: actual - expected,
            });
        }

        file.read_exact(image).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => SnapError::ShortRead {
                path: self.path.clone(),
                expected,
                actual,
            },
            _ => SnapError::Io(e),
        })
    }
}
