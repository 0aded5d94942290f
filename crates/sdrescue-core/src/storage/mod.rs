//! Storage accessor for the medium being recovered
//!
//! The medium is reached through two collaborators: a [`SectorDevice`] for
//! block-level reads (the raw image) and a [`Volume`] for file-level reads
//! (the mounted filesystem). A [`Medium`] bundles both and is attached once
//! at startup; its absence is the "medium unavailable" condition.

use std::io::{self, Read};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::content::Resolution;
use crate::error::{RecoveryError, Result};

mod device;
mod volume;

pub use device::ImageDevice;
pub use volume::MountedVolume;

/// Kind of a filesystem node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    #[serde(rename = "file")]
    File,
    #[serde(rename = "dir")]
    Directory,
}

/// A child yielded while enumerating a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildEntry {
    pub name: String,
    pub kind: EntryKind,
}

/// Lazy, single-pass enumeration of a directory's children
pub type ChildIter = Box<dyn Iterator<Item = io::Result<ChildEntry>> + Send>;

/// Block-level access to the medium
pub trait SectorDevice: Send + Sync {
    /// Number of whole sectors on the device
    fn sector_count(&self) -> u64;

    /// Size of one sector in bytes
    fn sector_size(&self) -> usize;

    /// Read sector `index` into `buf`, which must be exactly one sector long.
    ///
    /// A failure concerns this sector only; callers decide how to recover.
    fn read_sector(&self, index: u64, buf: &mut [u8]) -> Result<()>;

    /// Human-readable identification used in logs
    fn describe(&self) -> String;

    fn total_bytes(&self) -> u64 {
        self.sector_count() * self.sector_size() as u64
    }
}

/// File-level access to the medium
pub trait Volume: Send + Sync {
    /// Open the node at `path`, or fail with [`RecoveryError::Path`]
    fn open(&self, path: &str) -> Result<Handle>;

    fn exists(&self, path: &str) -> bool;

    /// Enumerate the children of the directory at `path`
    fn read_dir(&self, path: &str) -> Result<ChildIter>;
}

/// An opened filesystem node
pub struct Handle {
    kind: EntryKind,
    size: u64,
    reader: Option<Box<dyn Read + Send>>,
}

impl Handle {
    pub fn file(size: u64, reader: Box<dyn Read + Send>) -> Self {
        Self {
            kind: EntryKind::File,
            size,
            reader: Some(reader),
        }
    }

    pub fn directory() -> Self {
        Self {
            kind: EntryKind::Directory,
            size: 0,
            reader: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Consume the handle, yielding the file contents (`None` for directories)
    pub fn into_reader(self) -> Option<Box<dyn Read + Send>> {
        self.reader
    }
}

impl std::fmt::Debug for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.kind)
            .field("size", &self.size)
            .finish()
    }
}

/// A file ready to be streamed to a client
pub struct Document {
    pub path: String,
    pub content_type: &'static str,
    pub size: u64,
    pub reader: Box<dyn Read + Send>,
}

impl Document {
    /// Serve as an attachment regardless of the resolved type
    pub fn force_download(mut self) -> Self {
        self.content_type = crate::content::OCTET_STREAM;
        self
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("path", &self.path)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish()
    }
}

/// The attached storage medium
#[derive(Clone)]
pub struct Medium {
    device: Arc<dyn SectorDevice>,
    volume: Arc<dyn Volume>,
}

impl Medium {
    pub fn new(device: Arc<dyn SectorDevice>, volume: Arc<dyn Volume>) -> Self {
        Self { device, volume }
    }

    /// Attach the medium described by `config`.
    ///
    /// Returns `None` when either the device or the mounted volume cannot be
    /// opened. The result is meant to be decided once per process.
    pub fn attach(config: &ServerConfig) -> Option<Self> {
        let device = match ImageDevice::open(&config.device, config.sector_size) {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!("Cannot open device {}: {}", config.device.display(), e);
                return None;
            }
        };

        let volume = match MountedVolume::open(&config.root) {
            Ok(volume) => volume,
            Err(e) => {
                tracing::warn!("Cannot open volume root {}: {}", config.root.display(), e);
                return None;
            }
        };

        tracing::info!(
            "Medium attached: {} ({} sectors of {} bytes), files from {}",
            device.describe(),
            device.sector_count(),
            device.sector_size(),
            config.root.display()
        );

        Some(Self::new(Arc::new(device), Arc::new(volume)))
    }

    pub fn device(&self) -> Arc<dyn SectorDevice> {
        Arc::clone(&self.device)
    }

    pub fn volume(&self) -> Arc<dyn Volume> {
        Arc::clone(&self.volume)
    }

    /// Open the document a resolution points at.
    ///
    /// A resolution that lands on a directory is re-targeted at that
    /// directory's index document and served as HTML. An index document
    /// that is itself a directory is not served.
    pub fn open_document(&self, resolution: Resolution) -> Result<Document> {
        let mut resolution = resolution;
        let mut handle = self.volume.open(&resolution.path)?;

        if handle.is_directory() {
            if resolution.directory_default {
                return Err(RecoveryError::Path(resolution.path));
            }
            resolution = resolution.into_directory_index();
            handle = self.volume.open(&resolution.path)?;
        }

        let size = handle.size();
        let reader = handle
            .into_reader()
            .ok_or_else(|| RecoveryError::Path(resolution.path.clone()))?;

        Ok(Document {
            path: resolution.path,
            content_type: resolution.content_type,
            size,
            reader,
        })
    }
}

impl std::fmt::Debug for Medium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Medium")
            .field("device", &self.device.describe())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{resolve, TEXT_HTML, TEXT_PLAIN};
    use std::fs;
    use tempfile::TempDir;

    fn medium_over(dir: &TempDir) -> Medium {
        let image = dir.path().join("card.img");
        fs::write(&image, vec![0u8; 1024]).unwrap();
        let root = dir.path().join("mnt");
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("index.htm"), "<h1>root</h1>").unwrap();
        fs::write(root.join("sub/index.htm"), "<h1>sub</h1>").unwrap();
        fs::write(root.join("notes.txt"), "hello").unwrap();

        Medium::new(
            Arc::new(ImageDevice::open(&image, 512).unwrap()),
            Arc::new(MountedVolume::open(&root).unwrap()),
        )
    }

    fn read_all(doc: Document) -> String {
        let mut out = String::new();
        let mut reader = doc.reader;
        reader.read_to_string(&mut out).unwrap();
        out
    }

    #[test]
    fn test_open_document_plain_file() {
        let dir = TempDir::new().unwrap();
        let medium = medium_over(&dir);

        let doc = medium.open_document(resolve("/notes.txt")).unwrap();
        assert_eq!(doc.content_type, TEXT_PLAIN);
        assert_eq!(doc.size, 5);
        assert_eq!(read_all(doc), "hello");
    }

    #[test]
    fn test_directory_without_marker_serves_index() {
        let dir = TempDir::new().unwrap();
        let medium = medium_over(&dir);

        let doc = medium.open_document(resolve("/sub")).unwrap();
        assert_eq!(doc.path, "/sub/index.htm");
        assert_eq!(doc.content_type, TEXT_HTML);
        assert_eq!(read_all(doc), "<h1>sub</h1>");
    }

    #[test]
    fn test_directory_marker_serves_index() {
        let dir = TempDir::new().unwrap();
        let medium = medium_over(&dir);

        let doc = medium.open_document(resolve("/sub/")).unwrap();
        assert_eq!(doc.path, "/sub/index.htm");
        assert_eq!(doc.content_type, TEXT_HTML);

        let doc = medium.open_document(resolve("/")).unwrap();
        assert_eq!(read_all(doc), "<h1>root</h1>");
    }

    #[test]
    fn test_index_directory_is_not_descended() {
        let dir = TempDir::new().unwrap();
        let medium = medium_over(&dir);
        fs::create_dir_all(dir.path().join("mnt/odd/index.htm")).unwrap();

        let err = medium.open_document(resolve("/odd/")).unwrap_err();
        assert!(matches!(err, RecoveryError::Path(p) if p == "/odd/index.htm"));
    }

    #[test]
    fn test_missing_document() {
        let dir = TempDir::new().unwrap();
        let medium = medium_over(&dir);

        let err = medium.open_document(resolve("/missing.jpg")).unwrap_err();
        assert!(matches!(err, RecoveryError::Path(_)));
    }

    #[test]
    fn test_attach_fails_without_device() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            device: dir.path().join("absent.img"),
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        assert!(Medium::attach(&config).is_none());
    }

    #[test]
    fn test_attach_fails_without_root() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("card.img");
        fs::write(&image, vec![0u8; 512]).unwrap();
        let config = ServerConfig {
            device: image,
            root: dir.path().join("not-mounted"),
            ..Default::default()
        };
        assert!(Medium::attach(&config).is_none());
    }

    #[test]
    fn test_attach_success() {
        let dir = TempDir::new().unwrap();
        let image = dir.path().join("card.img");
        fs::write(&image, vec![0u8; 4096]).unwrap();
        let config = ServerConfig {
            device: image,
            root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let medium = Medium::attach(&config).unwrap();
        assert_eq!(medium.device().sector_count(), 8);
    }
}
