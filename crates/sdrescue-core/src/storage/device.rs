//! Sector access to a device node or disk image
//!
//! Reads go through plain positioned file I/O so that a failing sector
//! surfaces as an `io::Error` for that sector alone.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::SectorDevice;
use crate::error::{RecoveryError, Result};

/// Read-only sector reader over a block device or image file
pub struct ImageDevice {
    file: Mutex<File>,
    path: PathBuf,
    sector_size: usize,
    sector_count: u64,
}

impl ImageDevice {
    /// Open `path` read-only with the given sector size.
    ///
    /// A trailing partial sector is not addressable.
    pub fn open(path: impl AsRef<Path>, sector_size: usize) -> Result<Self> {
        let path = path.as_ref();
        if sector_size == 0 {
            return Err(RecoveryError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sector size must be non-zero",
            )));
        }

        let mut file = OpenOptions::new().read(true).write(false).open(path)?;

        // Block devices report a zero length in their metadata
        let size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        let sector_count = size / sector_size as u64;
        if size % sector_size as u64 != 0 {
            tracing::warn!(
                "{}: {} trailing bytes do not fill a sector and are ignored",
                path.display(),
                size % sector_size as u64
            );
        }

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
            sector_size,
            sector_count,
        })
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "device lock poisoned"))?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }
}

impl SectorDevice for ImageDevice {
    fn sector_count(&self) -> u64 {
        self.sector_count
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn read_sector(&self, index: u64, buf: &mut [u8]) -> Result<()> {
        if index >= self.sector_count || buf.len() != self.sector_size {
            return Err(RecoveryError::SectorRead {
                index,
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "sector {} of {} with a {}-byte buffer",
                        index,
                        self.sector_count,
                        buf.len()
                    ),
                ),
            });
        }

        self.read_at(index * self.sector_size as u64, buf)
            .map_err(|source| RecoveryError::SectorRead { index, source })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
