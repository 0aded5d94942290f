//! Fault-tolerant raw image streaming
//!
//! Every sector of the device is read once, in order, into a single reused
//! buffer. A sector that cannot be read is replaced by [`DAMAGED_SECTOR`]
//! repeated for the full sector size, so the emitted image always has the
//! length declared when streaming started.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::sync::Arc;

use crate::storage::SectorDevice;

/// Fill byte substituted for unreadable sectors
pub const DAMAGED_SECTOR: u8 = 0xE5;

/// Geometry fixed when a stream is initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawImageHeader {
    pub sector_count: u64,
    pub sector_size: usize,
    /// Exact number of bytes the stream will emit
    pub total_bytes: u64,
}

/// Outcome of a completed stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSummary {
    pub sectors: u64,
    pub bytes: u64,
    pub damaged_sectors: u64,
    /// SHA-256 of the emitted bytes, sentinel fill included
    pub sha256: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Idle,
    Streaming { next: u64 },
    Done,
}

/// A sector emitted by the streamer
#[derive(Debug)]
pub struct SectorChunk<'a> {
    pub index: u64,
    pub damaged: bool,
    pub data: &'a [u8],
}

pub struct RawImageStreamer {
    device: Arc<dyn SectorDevice>,
    state: StreamState,
    buffer: Vec<u8>,
    header: Option<RawImageHeader>,
    bytes_emitted: u64,
    damaged: u64,
    hasher: Sha256,
}

impl RawImageStreamer {
    pub fn new(device: Arc<dyn SectorDevice>) -> Self {
        Self {
            device,
            state: StreamState::Idle,
            buffer: Vec::new(),
            header: None,
            bytes_emitted: 0,
            damaged: 0,
            hasher: Sha256::new(),
        }
    }

    /// Fix the geometry and declare the response length.
    ///
    /// Idempotent: later calls return the header computed by the first one.
    pub fn initialize(&mut self) -> RawImageHeader {
        if let Some(header) = self.header {
            return header;
        }

        let sector_count = self.device.sector_count();
        let sector_size = self.device.sector_size();
        let header = RawImageHeader {
            sector_count,
            sector_size,
            total_bytes: sector_count * sector_size as u64,
        };

        tracing::info!(
            "Raw image of {}: {} sectors, {} bytes per sector, {} bytes",
            self.device.describe(),
            header.sector_count,
            header.sector_size,
            header.total_bytes
        );

        self.buffer = vec![0u8; sector_size];
        self.header = Some(header);
        self.state = StreamState::Streaming { next: 0 };
        header
    }

    pub fn is_done(&self) -> bool {
        self.state == StreamState::Done
    }

    /// Read the next sector, substituting the sentinel fill on failure.
    ///
    /// Returns `None` once every sector has been attempted.
    pub fn next_sector(&mut self) -> Option<SectorChunk<'_>> {
        if self.state == StreamState::Idle {
            self.initialize();
        }

        let index = match self.state {
            StreamState::Streaming { next } if next < self.device.sector_count() => next,
            StreamState::Streaming { .. } => {
                self.finish();
                return None;
            }
            StreamState::Idle | StreamState::Done => return None,
        };

        let damaged = match self.device.read_sector(index, &mut self.buffer) {
            Ok(()) => false,
            Err(e) => {
                tracing::warn!("Error reading sector {}: {}", index, e);
                self.buffer.fill(DAMAGED_SECTOR);
                self.damaged += 1;
                true
            }
        };

        self.hasher.update(&self.buffer);
        self.bytes_emitted += self.buffer.len() as u64;
        self.state = StreamState::Streaming { next: index + 1 };

        Some(SectorChunk {
            index,
            damaged,
            data: &self.buffer,
        })
    }

    fn finish(&mut self) {
        self.state = StreamState::Done;
        if self.damaged > 0 {
            tracing::warn!(
                "Raw image complete: {} of {} sectors unreadable, filled with 0x{:02X}",
                self.damaged,
                self.header.map(|h| h.sector_count).unwrap_or_default(),
                DAMAGED_SECTOR
            );
        } else {
            tracing::info!("Raw image complete: {} bytes", self.bytes_emitted);
        }
    }

    /// Summary of the stream; the digest is only final once done
    pub fn summary(&self) -> StreamSummary {
        StreamSummary {
            sectors: self.header.map(|h| h.sector_count).unwrap_or_default(),
            bytes: self.bytes_emitted,
            damaged_sectors: self.damaged,
            sha256: format!("{:x}", self.hasher.clone().finalize()),
        }
    }

    /// Drive the whole stream into `sink`.
    ///
    /// Sector failures never stop the stream; only a sink error does.
    pub fn stream_to<E, F>(&mut self, mut sink: F) -> Result<StreamSummary, E>
    where
        F: FnMut(SectorChunk<'_>) -> Result<(), E>,
    {
        while let Some(chunk) = self.next_sector() {
            sink(chunk)?;
        }
        Ok(self.summary())
    }

    /// Write the whole image to `out`
    pub fn write_to<W: Write>(&mut self, out: &mut W) -> io::Result<StreamSummary> {
        self.stream_to(|chunk| out.write_all(chunk.data))
    }
}

impl std::fmt::Debug for RawImageStreamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawImageStreamer")
            .field("device", &self.device.describe())
            .field("state", &self.state)
            .field("bytes_emitted", &self.bytes_emitted)
            .finish()
    }
}
