//! Offline raw image dump with a JSON report
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::raw::{RawImageStreamer, DAMAGED_SECTOR};
use crate::storage::SectorDevice;

/// Per-sector progress passed to the dump callback
#[derive(Debug, Clone, Copy)]
pub struct DumpProgress {
    pub sector: u64,
    pub sector_count: u64,
    pub damaged: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpReport {
    pub device: String,
    pub output: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub sector_size: usize,
    pub sector_count: u64,
    pub total_bytes: u64,
    pub fill_byte: u8,
    /// Indices of sectors replaced by the fill byte
    pub damaged_sectors: Vec<u64>,
    pub sha256: String,
}

impl DumpReport {
    /// Path of the report written alongside `output`
    pub fn path_for(output: &Path) -> PathBuf {
        let mut name = output.as_os_str().to_owned();
        name.push(".report.json");
        PathBuf::from(name)
    }

    pub fn export_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    pub fn import_json(path: impl AsRef<Path>) -> io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Image `device` into `output`, then write the report next to it.
pub fn dump_image<F>(
    device: Arc<dyn SectorDevice>,
    output: impl AsRef<Path>,
    mut progress: F,
) -> Result<DumpReport>
where
    F: FnMut(DumpProgress),
{
    let output = output.as_ref();
    let describe = device.describe();
    let file = File::create(output)
        .with_context(|| format!("Failed to create image file {}", output.display()))?;
    let mut out = BufWriter::new(file);

    let started_at = Utc::now();
    let mut streamer = RawImageStreamer::new(device);
    let header = streamer.initialize();
    let mut damaged_sectors = Vec::new();

    let summary = streamer
        .stream_to(|chunk| {
            if chunk.damaged {
                damaged_sectors.push(chunk.index);
            }
            out.write_all(chunk.data)?;
            progress(DumpProgress {
                sector: chunk.index,
                sector_count: header.sector_count,
                damaged: damaged_sectors.len() as u64,
            });
            Ok::<(), io::Error>(())
        })
        .with_context(|| format!("Failed to write image to {}", output.display()))?;
    out.flush()
        .with_context(|| format!("Failed to flush {}", output.display()))?;

    let report = DumpReport {
        device: describe,
        output: output.to_path_buf(),
        started_at,
        finished_at: Utc::now(),
        sector_size: header.sector_size,
        sector_count: header.sector_count,
        total_bytes: summary.bytes,
        fill_byte: DAMAGED_SECTOR,
        damaged_sectors,
        sha256: summary.sha256,
    };

    let report_path = DumpReport::path_for(output);
    report
        .export_json(&report_path)
        .with_context(|| format!("Failed to write report {}", report_path.display()))?;
    tracing::info!(
        "Dumped {} bytes to {} ({} damaged sectors), report at {}",
        report.total_bytes,
        output.display(),
        report.damaged_sectors.len(),
        report_path.display()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RecoveryError, Result as RecoveryResult};
    use tempfile::TempDir;

    struct PatternDevice {
        sectors: u64,
        bad: u64,
    }

    impl SectorDevice for PatternDevice {
        fn sector_count(&self) -> u64 {
            self.sectors
        }

        fn sector_size(&self) -> usize {
            256
        }

        fn read_sector(&self, index: u64, buf: &mut [u8]) -> RecoveryResult<()> {
            if index == self.bad {
                return Err(RecoveryError::SectorRead {
                    index,
                    source: io::Error::new(io::ErrorKind::Other, "unreadable"),
                });
            }
            buf.fill(index as u8);
            Ok(())
        }

        fn describe(&self) -> String {
            "pattern".to_string()
        }
    }

    #[test]
    fn test_dump_writes_image_and_report() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("card.img");
        let device = Arc::new(PatternDevice { sectors: 5, bad: 3 });

        let mut calls = Vec::new();
        let report = dump_image(device, &output, |p| calls.push(p.sector)).unwrap();

        let image = std::fs::read(&output).unwrap();
        assert_eq!(image.len(), 1280);
        assert!(image[768..1024].iter().all(|&b| b == DAMAGED_SECTOR));
        assert!(image[1024..].iter().all(|&b| b == 4));
        assert_eq!(calls, vec![0, 1, 2, 3, 4]);
        assert_eq!(report.damaged_sectors, vec![3]);

        let saved = DumpReport::import_json(DumpReport::path_for(&output)).unwrap();
        assert_eq!(saved, report);
    }

    #[test]
    fn test_report_path() {
        assert_eq!(
            DumpReport::path_for(Path::new("/tmp/card.img")),
            PathBuf::from("/tmp/card.img.report.json")
        );
    }

    #[test]
    fn test_unwritable_output() {
        let device = Arc::new(PatternDevice { sectors: 1, bad: 9 });
        assert!(dump_image(device, "/nonexistent/dir/card.img", |_| {}).is_err());
    }
}
