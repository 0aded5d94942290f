//! File-level access through the operating system's mount of the medium

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use super::{ChildEntry, ChildIter, EntryKind, Handle, Volume};
use crate::error::{RecoveryError, Result};

/// A mounted filesystem rooted at a directory.
///
/// Request paths are interpreted relative to the root; `..` components
/// never resolve.
pub struct MountedVolume {
    root: PathBuf,
}

impl MountedVolume {
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let metadata = fs::metadata(root)?;
        if !metadata.is_dir() {
            return Err(RecoveryError::NotADirectory(root.display().to_string()));
        }
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Map a request path onto the host filesystem
    fn locate(&self, path: &str) -> Option<PathBuf> {
        let mut located = self.root.clone();
        for component in path.split('/') {
            match component {
                "" | "." => continue,
                ".." => return None,
                name if name.contains('\\') => return None,
                name => located.push(name),
            }
        }
        Some(located)
    }
}

impl Volume for MountedVolume {
    fn open(&self, path: &str) -> Result<Handle> {
        let located = self
            .locate(path)
            .ok_or_else(|| RecoveryError::Path(path.to_string()))?;

        let metadata = fs::metadata(&located).map_err(|e| not_found_as_path(e, path))?;
        if metadata.is_dir() {
            return Ok(Handle::directory());
        }

        let file = File::open(&located).map_err(|e| not_found_as_path(e, path))?;
        Ok(Handle::file(metadata.len(), Box::new(file)))
    }

    fn exists(&self, path: &str) -> bool {
        self.locate(path).is_some_and(|p| p.exists())
    }

    fn read_dir(&self, path: &str) -> Result<ChildIter> {
        let located = self
            .locate(path)
            .ok_or_else(|| RecoveryError::Path(path.to_string()))?;

        let entries = fs::read_dir(&located).map_err(|e| not_found_as_path(e, path))?;
        Ok(Box::new(entries.map(|entry| {
            let entry = entry?;
            let kind = if entry.file_type()?.is_dir() {
                EntryKind::Directory
            } else {
                EntryKind::File
            };
            Ok(ChildEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                kind,
            })
        })))
    }
}

fn not_found_as_path(e: io::Error, path: &str) -> RecoveryError {
    if e.kind() == io::ErrorKind::NotFound {
        RecoveryError::Path(path.to_string())
    } else {
        RecoveryError::Io(e)
    }
}
